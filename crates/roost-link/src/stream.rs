use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use url::Url;

use roost_engine::link::{LinkAction, LinkEvent, LinkSupervisor};
use roost_engine::state::FleetState;
use roost_proto::frames::ControlFrame;

use crate::api::{refresh_clients, ApiClient};

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,
    /// Fixed delay before the single scheduled reconnect attempt.
    pub reconnect_delay: Duration,
    /// Registry polling cadence while the stream is open.
    pub poll_interval: Duration,
}

/// Sending half handed to the dispatcher. Frames are dropped with a warning
/// while the stream is not connected.
#[derive(Clone)]
pub struct StreamHandle {
    pub(crate) tx: mpsc::Sender<ControlFrame>,
    pub(crate) supervisor: Arc<Mutex<LinkSupervisor>>,
}

impl StreamHandle {
    pub fn is_connected(&self) -> bool {
        self.supervisor.lock().unwrap().is_connected()
    }

    pub fn send(&self, frame: ControlFrame) {
        if !self.is_connected() {
            warn!("stream: dropping {} frame, not connected", frame.payload.command);
            return;
        }
        if self.tx.try_send(frame).is_err() {
            warn!("stream: outbound queue full, frame dropped");
        }
    }
}

/// Spawn the driver task. The task owns the socket, the poll interval, and
/// the reconnect delay for its whole life; it exits when every handle is
/// dropped.
pub fn spawn_stream_driver(
    cfg: StreamConfig,
    api: ApiClient,
    state: Arc<Mutex<FleetState>>,
) -> StreamHandle {
    let (tx, rx) = mpsc::channel(64);
    let supervisor = Arc::new(Mutex::new(LinkSupervisor::new()));
    let handle = StreamHandle { tx, supervisor: supervisor.clone() };
    tokio::spawn(run_driver(cfg, api, state, rx, supervisor));
    handle
}

/// Outcome of interpreting one batch of supervisor actions.
#[derive(Default)]
struct Interpreted {
    open_socket: bool,
    reconnect: bool,
}

async fn interpret(
    actions: Vec<LinkAction>,
    api: &ApiClient,
    state: &Arc<Mutex<FleetState>>,
) -> Interpreted {
    let mut out = Interpreted::default();
    for action in actions {
        match action {
            LinkAction::OpenSocket => out.open_socket = true,
            LinkAction::ScheduleReconnect => out.reconnect = true,
            LinkAction::RefreshClients => refresh_clients(api, state).await,
            LinkAction::ApplyTelemetry { client_id, fields } => {
                state.lock().unwrap().apply_telemetry(&client_id, fields);
            }
            LinkAction::ApplyBattery { client_id, battery_info } => {
                state.lock().unwrap().apply_battery(&client_id, battery_info);
            }
            LinkAction::Note(level, message) => {
                state.lock().unwrap().log.push(level, message);
            }
            // The poll interval lives inside the connected scope below; these
            // transitions are realized by entering and leaving that scope.
            LinkAction::StartRegistryPoll | LinkAction::StopRegistryPoll => {}
        }
    }
    out
}

async fn run_driver(
    cfg: StreamConfig,
    api: ApiClient,
    state: Arc<Mutex<FleetState>>,
    mut rx: mpsc::Receiver<ControlFrame>,
    supervisor: Arc<Mutex<LinkSupervisor>>,
) {
    loop {
        let actions = supervisor.lock().unwrap().on_event(LinkEvent::ConnectRequested);
        let step = interpret(actions, &api, &state).await;
        if !step.open_socket {
            return;
        }

        info!("stream: connecting to {}", cfg.url);
        let reconnect = match connect_async(cfg.url.as_str()).await {
            Ok((ws, _)) => {
                let opened = supervisor.lock().unwrap().on_event(LinkEvent::Opened);
                interpret(opened, &api, &state).await;
                let closed = connected_loop(ws, &cfg, &api, &state, &mut rx, &supervisor).await;
                match closed {
                    Some(actions) => interpret(actions, &api, &state).await.reconnect,
                    // Every handle dropped: shut the driver down.
                    None => return,
                }
            }
            Err(err) => {
                // A failed attempt is a close observed while Connecting.
                warn!("stream: connect failed: {}", err);
                state.lock().unwrap().log.error(format!("connect failed: {}", err));
                let actions = supervisor.lock().unwrap().on_event(LinkEvent::Closed(None));
                interpret(actions, &api, &state).await.reconnect
            }
        };

        if !reconnect {
            return;
        }
        tokio::time::sleep(cfg.reconnect_delay).await;
    }
}

/// Runs while the socket is open. Returns the close-transition actions, or
/// `None` when the outbound channel is gone and the driver should exit.
async fn connected_loop(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cfg: &StreamConfig,
    api: &ApiClient,
    state: &Arc<Mutex<FleetState>>,
    rx: &mut mpsc::Receiver<ControlFrame>,
    supervisor: &Arc<Mutex<LinkSupervisor>>,
) -> Option<Vec<LinkAction>> {
    let (mut sink, mut inbound) = ws.split();
    let mut poll = tokio::time::interval(cfg.poll_interval);
    // The open transition already refreshed; skip the interval's first
    // immediate tick.
    poll.tick().await;

    let close_actions = loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { return None; };
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(err) => {
                        warn!("stream: unserializable frame: {}", err);
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    let mut sup = supervisor.lock().unwrap();
                    let mut actions = sup.on_event(LinkEvent::StreamError(err.to_string()));
                    actions.extend(sup.on_event(LinkEvent::Closed(None)));
                    break actions;
                }
            }
            msg = inbound.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let actions = supervisor.lock().unwrap().on_event(LinkEvent::Inbound(text));
                        interpret(actions, api, state).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        break supervisor.lock().unwrap().on_event(LinkEvent::Closed(code));
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to route
                    Some(Err(err)) => {
                        let mut sup = supervisor.lock().unwrap();
                        let mut actions = sup.on_event(LinkEvent::StreamError(err.to_string()));
                        actions.extend(sup.on_event(LinkEvent::Closed(None)));
                        break actions;
                    }
                    None => {
                        break supervisor.lock().unwrap().on_event(LinkEvent::Closed(None));
                    }
                }
            }
            _ = poll.tick() => {
                refresh_clients(api, state).await;
            }
        }
    };

    // Drop the socket halves (the internal connection handle) and flush any
    // frames queued during the close window.
    drop(sink);
    while rx.try_recv().is_ok() {}
    Some(close_actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_proto::frames::CommandPayload;

    fn handle_pair(connected: bool) -> (StreamHandle, mpsc::Receiver<ControlFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let supervisor = Arc::new(Mutex::new(LinkSupervisor::new()));
        if connected {
            let mut sup = supervisor.lock().unwrap();
            sup.on_event(LinkEvent::ConnectRequested);
            sup.on_event(LinkEvent::Opened);
        }
        (StreamHandle { tx, supervisor }, rx)
    }

    #[tokio::test]
    async fn send_is_noop_when_disconnected() {
        let (handle, mut rx) = handle_pair(false);
        handle.send(ControlFrame::broadcast(CommandPayload::new("noop")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_queues_when_connected() {
        let (handle, mut rx) = handle_pair(true);
        handle.send(ControlFrame::to_vehicle("d1", CommandPayload::new("takeoff")));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.client_id, "d1");
        assert_eq!(frame.payload.command, "takeoff");
    }
}
