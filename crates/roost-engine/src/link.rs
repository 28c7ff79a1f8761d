use serde_json::{Map, Value};
use tracing::{error, info, warn};

use roost_proto::frames::InboundFrame;

use crate::log::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// What happened on the stream, as observed by the driver.
#[derive(Debug)]
pub enum LinkEvent {
    /// connect() intent, whether operator-issued or a reconnect firing.
    ConnectRequested,
    Opened,
    Inbound(String),
    StreamError(String),
    Closed(Option<u16>),
}

/// What the driver must do in response. The supervisor itself performs no
/// I/O; it owns the transition rules and the single-pending-reconnect guard.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    OpenSocket,
    StartRegistryPoll,
    StopRegistryPoll,
    RefreshClients,
    ApplyTelemetry { client_id: String, fields: Map<String, Value> },
    ApplyBattery { client_id: String, battery_info: Value },
    /// Exactly one of these is outstanding at a time; the driver re-issues
    /// `ConnectRequested` after the fixed delay.
    ScheduleReconnect,
    /// Operator-visible log entry for the bounded event log.
    Note(LogLevel, String),
}

/// Connection lifecycle state machine:
/// `Disconnected -> Connecting -> Connected -> Disconnected (retry) -> ...`
#[derive(Debug)]
pub struct LinkSupervisor {
    state: LinkState,
    reconnect_pending: bool,
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSupervisor {
    pub fn new() -> Self {
        Self { state: LinkState::Disconnected, reconnect_pending: false }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn on_event(&mut self, event: LinkEvent) -> Vec<LinkAction> {
        match event {
            LinkEvent::ConnectRequested => match self.state {
                LinkState::Connected => {
                    warn!("link: connect requested but stream already connected");
                    vec![LinkAction::Note(
                        LogLevel::Warn,
                        "connect ignored: already connected".into(),
                    )]
                }
                // An attempt is already in flight.
                LinkState::Connecting => Vec::new(),
                LinkState::Disconnected => {
                    self.reconnect_pending = false;
                    self.state = LinkState::Connecting;
                    vec![LinkAction::OpenSocket]
                }
            },
            LinkEvent::Opened => {
                info!("link: control stream connected");
                self.state = LinkState::Connected;
                vec![
                    LinkAction::Note(LogLevel::Info, "control stream connected".into()),
                    LinkAction::RefreshClients,
                    LinkAction::StartRegistryPoll,
                ]
            }
            LinkEvent::Inbound(text) => self.on_inbound(&text),
            LinkEvent::StreamError(err) => {
                error!("link: stream error: {}", err);
                self.state = LinkState::Disconnected;
                vec![
                    LinkAction::Note(LogLevel::Error, format!("stream error: {}", err)),
                    LinkAction::StopRegistryPoll,
                ]
            }
            LinkEvent::Closed(code) => {
                info!("link: stream closed (code {:?})", code);
                self.state = LinkState::Disconnected;
                let mut actions = vec![
                    LinkAction::Note(
                        LogLevel::Warn,
                        match code {
                            Some(c) => format!("stream closed (code {})", c),
                            None => "stream closed".into(),
                        },
                    ),
                    LinkAction::StopRegistryPoll,
                ];
                if !self.reconnect_pending {
                    self.reconnect_pending = true;
                    actions.push(LinkAction::ScheduleReconnect);
                }
                actions
            }
        }
    }

    /// Malformed payloads are logged and dropped; the connection stays open.
    fn on_inbound(&mut self, text: &str) -> Vec<LinkAction> {
        match serde_json::from_str::<InboundFrame>(text) {
            Ok(InboundFrame::Telemetry { client_id, telemetry }) => {
                vec![LinkAction::ApplyTelemetry { client_id, fields: telemetry }]
            }
            Ok(InboundFrame::Battery { client_id, battery_info }) => {
                vec![LinkAction::ApplyBattery { client_id, battery_info }]
            }
            Ok(InboundFrame::ClientUpdate) => vec![LinkAction::RefreshClients],
            Ok(InboundFrame::Unknown) => Vec::new(),
            Err(err) => {
                error!("link: unparsable control frame: {}", err);
                vec![LinkAction::Note(
                    LogLevel::Error,
                    format!("unparsable control frame: {}", err),
                )]
            }
        }
    }
}
