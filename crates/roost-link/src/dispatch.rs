use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use roost_engine::planner::{PathPlanner, PlanError};
use roost_engine::state::FleetState;
use roost_proto::frames::{CommandPayload, ControlFrame};

use crate::api::{ApiClient, ApiError};
use crate::stream::StreamHandle;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no target selected")]
    NoTargets,
    #[error("control stream not connected")]
    NotConnected,
    #[error("origin requires both latitude and longitude")]
    IncompleteOrigin,
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Fans imperative actions out to every currently targeted vehicle.
///
/// Request/response commands are best-effort across targets: each POST is
/// independent, nothing is rolled back on partial failure, and the first
/// error is what callers see. Streaming commands ride the control stream
/// without acknowledgment.
pub struct Dispatcher {
    api: ApiClient,
    stream: StreamHandle,
    state: Arc<Mutex<FleetState>>,
    /// True while the last forwarded stick frame had a non-zero axis. A
    /// zero frame is forwarded once as the stop edge, then suppressed.
    stick_active: AtomicBool,
}

impl Dispatcher {
    pub fn new(api: ApiClient, stream: StreamHandle, state: Arc<Mutex<FleetState>>) -> Self {
        Self { api, stream, state, stick_active: AtomicBool::new(false) }
    }

    fn resolve_targets(&self) -> Result<Vec<String>, DispatchError> {
        let mut state = self.state.lock().unwrap();
        let targets = state.current_targets();
        if targets.is_empty() {
            error!("dispatch: no target selected");
            state.log.error("dispatch: no target selected");
            return Err(DispatchError::NoTargets);
        }
        Ok(targets)
    }

    /// Request/response class: one concurrent request per target, resolved
    /// when all complete; `Ok` iff every target succeeded.
    pub async fn dispatch_command(
        &self,
        command: &str,
        fields: Map<String, Value>,
    ) -> Result<(), DispatchError> {
        let targets = self.resolve_targets()?;

        let requests = targets.iter().map(|id| self.api.send_command(id, command, &fields));
        let results = join_all(requests).await;

        let mut first_err: Option<ApiError> = None;
        let mut state = self.state.lock().unwrap();
        for (id, result) in targets.iter().zip(results) {
            match result {
                Ok(ack) => {
                    info!("dispatch: {} -> {}: {}", command, id, ack.message);
                    state.log.info(format!("{} -> {}: {}", command, id, ack.message));
                }
                Err(err) => {
                    warn!("dispatch: {} -> {} failed: {}", command, id, err);
                    state.log.error(format!("{} -> {} failed: {}", command, id, err));
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Streaming class: one frame per target, no acknowledgment. Stick frames
    /// get the edge-triggered stop treatment.
    pub fn send_control(&self, payload: CommandPayload) -> Result<(), DispatchError> {
        if payload.command == "vstick" {
            let zero = payload.is_zero_stick();
            if zero && !self.stick_active.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.stick_active.store(!zero, Ordering::SeqCst);
        }

        let targets = self.resolve_targets()?;
        for id in targets {
            self.stream.send(ControlFrame::to_vehicle(id, payload.clone()));
        }
        Ok(())
    }

    pub fn send_sticks(&self, lx: f64, ly: f64, rx: f64, ry: f64) -> Result<(), DispatchError> {
        self.send_control(CommandPayload::vstick(lx, ly, rx, ry))
    }

    pub fn position_control(&self, x: f64, y: f64, z: f64, yaw: f64) -> Result<(), DispatchError> {
        self.send_control(CommandPayload::position_control(x, y, z, yaw))
    }

    pub fn set_ros_target(&self, x: f64, y: f64, z: f64) -> Result<(), DispatchError> {
        self.send_control(CommandPayload::set_ros_target(x, y, z))
    }

    /// Always addressed to `"all"`; both coordinates are required.
    pub fn set_ros_origin(
        &self,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<(), DispatchError> {
        let (Some(lat), Some(lon)) = (lat, lon) else {
            error!("dispatch: origin requires both latitude and longitude");
            self.state
                .lock()
                .unwrap()
                .log
                .error("origin requires both latitude and longitude");
            return Err(DispatchError::IncompleteOrigin);
        };
        self.stream.send(ControlFrame::broadcast(CommandPayload::set_ros_origin(lat, lon)));
        Ok(())
    }

    /// Finalize the planned path into one aggregate `execute_path` frame per
    /// target. On dispatch failure (no targets, no connection) the planner
    /// re-enters Planning with the buffer intact so the operator can retry;
    /// an empty or inactive plan fails in Idle without re-entering.
    pub fn finalize_path(&self, planner: &mut PathPlanner) -> Result<(), DispatchError> {
        let path = match planner.finalize() {
            Ok(path) => path,
            Err(err) => {
                warn!("dispatch: path not sent: {}", err);
                self.state.lock().unwrap().log.error(format!("path not sent: {}", err));
                return Err(err.into());
            }
        };

        let targets = match self.resolve_targets() {
            Ok(targets) => targets,
            Err(err) => {
                planner.resume();
                return Err(err);
            }
        };
        if !self.stream.is_connected() {
            planner.resume();
            error!("dispatch: path not sent: control stream not connected");
            self.state.lock().unwrap().log.error("path not sent: control stream not connected");
            return Err(DispatchError::NotConnected);
        }

        let payload = CommandPayload::execute_path(&path);
        let target_count = targets.len();
        for id in targets {
            self.stream.send(ControlFrame::to_vehicle(id, payload.clone()));
        }
        info!("dispatch: path with {} waypoints sent to {} vehicle(s)", path.len(), target_count);
        self.state
            .lock()
            .unwrap()
            .log
            .info(format!("path with {} waypoints sent to {} vehicle(s)", path.len(), target_count));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_engine::link::{LinkEvent, LinkSupervisor};
    use roost_engine::planner::PlanState;
    use roost_proto::clients::VehicleDescriptor;
    use roost_proto::frames::Waypoint;
    use tokio::sync::mpsc;

    struct Rig {
        dispatcher: Dispatcher,
        rx: mpsc::Receiver<ControlFrame>,
        state: Arc<Mutex<FleetState>>,
    }

    fn rig(connected: bool, clients: &[&str]) -> Rig {
        let (tx, rx) = mpsc::channel(16);
        let supervisor = Arc::new(Mutex::new(LinkSupervisor::new()));
        if connected {
            let mut sup = supervisor.lock().unwrap();
            sup.on_event(LinkEvent::ConnectRequested);
            sup.on_event(LinkEvent::Opened);
        }
        let stream = StreamHandle { tx, supervisor };

        let state = Arc::new(Mutex::new(FleetState::new()));
        state
            .lock()
            .unwrap()
            .apply_client_list(clients.iter().map(|id| VehicleDescriptor::new(*id)).collect());

        let api = ApiClient::new("http://127.0.0.1:1", None);
        let dispatcher = Dispatcher::new(api, stream.clone(), state.clone());
        Rig { dispatcher, rx, state }
    }

    fn drain(rx: &mut mpsc::Receiver<ControlFrame>) -> Vec<ControlFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn zero_stick_sent_once_after_nonzero() {
        let mut r = rig(true, &["d1"]);

        r.dispatcher.send_sticks(0.0, 0.5, 0.0, 0.0).unwrap();
        r.dispatcher.send_sticks(0.0, 0.0, 0.0, 0.0).unwrap();
        r.dispatcher.send_sticks(0.0, 0.0, 0.0, 0.0).unwrap();

        let frames = drain(&mut r.rx);
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].payload.is_zero_stick());
        assert!(frames[1].payload.is_zero_stick());
    }

    #[tokio::test]
    async fn stick_resumes_after_stop_edge() {
        let mut r = rig(true, &["d1"]);

        r.dispatcher.send_sticks(0.0, 0.0, 0.0, 0.0).unwrap(); // suppressed: never active
        r.dispatcher.send_sticks(0.3, 0.0, 0.0, 0.0).unwrap();
        r.dispatcher.send_sticks(0.0, 0.0, 0.0, 0.0).unwrap(); // stop edge
        r.dispatcher.send_sticks(0.3, 0.0, 0.0, 0.0).unwrap();

        assert_eq!(drain(&mut r.rx).len(), 3);
    }

    #[tokio::test]
    async fn streaming_commands_fan_out_to_multi_selection() {
        let mut r = rig(true, &["d1", "d2", "d3"]);
        {
            let mut state = r.state.lock().unwrap();
            state.selection.toggle_multi_mode();
            state.selection.toggle_selection("d1");
            state.selection.toggle_selection("d3");
        }

        r.dispatcher.position_control(1.0, 2.0, 3.0, 0.0).unwrap();
        let frames = drain(&mut r.rx);
        let ids: Vec<_> = frames.iter().map(|f| f.client_id.as_str()).collect();
        assert_eq!(ids, ["d1", "d3"]);
    }

    #[tokio::test]
    async fn no_targets_short_circuits_with_log() {
        let mut r = rig(true, &[]);
        let err = r.dispatcher.send_control(CommandPayload::new("takeoff")).unwrap_err();
        assert!(matches!(err, DispatchError::NoTargets));
        assert!(drain(&mut r.rx).is_empty());
        assert!(r
            .state
            .lock()
            .unwrap()
            .log
            .entries()
            .any(|e| e.message.contains("no target selected")));
    }

    #[tokio::test]
    async fn origin_requires_both_coordinates() {
        let mut r = rig(true, &["d1"]);
        let err = r.dispatcher.set_ros_origin(Some(59.3), None).unwrap_err();
        assert!(matches!(err, DispatchError::IncompleteOrigin));
        assert!(drain(&mut r.rx).is_empty());

        r.dispatcher.set_ros_origin(Some(59.3), Some(18.1)).unwrap();
        let frames = drain(&mut r.rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].client_id, "all");
    }

    #[tokio::test]
    async fn finalize_sends_one_aggregate_frame_and_keeps_buffer() {
        let mut r = rig(true, &["d1"]);
        let mut planner = PathPlanner::new();
        planner.start();
        planner.add_waypoint(Waypoint { lat: 1.0, lng: 2.0, height: 10.0, heading: 0.0 });
        planner.add_waypoint(Waypoint { lat: 3.0, lng: 4.0, height: 10.0, heading: 90.0 });

        r.dispatcher.finalize_path(&mut planner).unwrap();

        let frames = drain(&mut r.rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].client_id, "d1");
        let v = serde_json::to_value(&frames[0].payload).unwrap();
        assert_eq!(v["command"], "execute_path");
        assert_eq!(v["path"][0]["lat"], 1.0);
        assert_eq!(v["path"][1]["heading"], 90.0);

        // Buffer survives success for review.
        assert_eq!(planner.waypoints().len(), 2);
        assert_eq!(planner.state(), PlanState::Idle);
    }

    #[tokio::test]
    async fn finalize_empty_path_sends_nothing_and_stays_idle() {
        let mut r = rig(true, &["d1"]);
        let mut planner = PathPlanner::new();
        planner.start();

        let err = r.dispatcher.finalize_path(&mut planner).unwrap_err();
        assert!(matches!(err, DispatchError::Plan(PlanError::EmptyPath)));
        assert!(drain(&mut r.rx).is_empty());
        assert_eq!(planner.state(), PlanState::Idle);
    }

    #[tokio::test]
    async fn finalize_without_connection_reenters_planning() {
        let mut r = rig(false, &["d1"]);
        let mut planner = PathPlanner::new();
        planner.start();
        planner.add_waypoint(Waypoint { lat: 1.0, lng: 2.0, height: 10.0, heading: 0.0 });

        let err = r.dispatcher.finalize_path(&mut planner).unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected));
        assert!(drain(&mut r.rx).is_empty());
        // Path retained and planning re-entered for a retry.
        assert_eq!(planner.state(), PlanState::Planning);
        assert_eq!(planner.waypoints().len(), 1);
    }

    #[tokio::test]
    async fn finalize_without_targets_reenters_planning() {
        let r = rig(true, &[]);
        let mut planner = PathPlanner::new();
        planner.start();
        planner.add_waypoint(Waypoint { lat: 1.0, lng: 2.0, height: 10.0, heading: 0.0 });

        let err = r.dispatcher.finalize_path(&mut planner).unwrap_err();
        assert!(matches!(err, DispatchError::NoTargets));
        assert_eq!(planner.state(), PlanState::Planning);
    }
}
