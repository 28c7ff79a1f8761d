use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use url::Url;

use roost_engine::planner::PathPlanner;
use roost_engine::state::FleetState;
use roost_engine::telemetry::DerivedStatus;
use roost_proto::clients::VehicleDescriptor;
use roost_proto::frames::Waypoint;

use crate::api::{refresh_clients, ApiClient};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::stream::{spawn_stream_driver, StreamConfig, StreamHandle};

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub api_base: String,
    pub api_token: Option<String>,
    pub stream_url: Url,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
}

/// One ground-control engine instance: shared fleet state, the stream driver,
/// the dispatcher, and the path planner. Everything it owns dies with it —
/// two stations in one process do not share a connection.
pub struct Station {
    state: Arc<Mutex<FleetState>>,
    planner: Mutex<PathPlanner>,
    api: ApiClient,
    stream: StreamHandle,
    dispatcher: Dispatcher,
}

impl Station {
    /// Build the engine and start connecting. Must run inside a tokio
    /// runtime; the spawned driver reconnects on its own until the station
    /// is dropped.
    pub fn connect(cfg: StationConfig) -> Self {
        let state = Arc::new(Mutex::new(FleetState::new()));
        let api = ApiClient::new(cfg.api_base, cfg.api_token);
        let stream = spawn_stream_driver(
            StreamConfig {
                url: cfg.stream_url,
                reconnect_delay: cfg.reconnect_delay,
                poll_interval: cfg.poll_interval,
            },
            api.clone(),
            state.clone(),
        );
        let dispatcher = Dispatcher::new(api.clone(), stream.clone(), state.clone());
        Self { state, planner: Mutex::new(PathPlanner::new()), api, stream, dispatcher }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    /// On-demand registry refresh, independent of the polling timer.
    pub async fn refresh(&self) {
        refresh_clients(&self.api, &self.state).await;
    }

    pub fn clients(&self) -> Vec<VehicleDescriptor> {
        self.state.lock().unwrap().clients().to_vec()
    }

    pub fn status(&self, vehicle_id: &str) -> DerivedStatus {
        self.state.lock().unwrap().project(vehicle_id)
    }

    pub fn select(&self, vehicle_id: Option<String>) {
        self.state.lock().unwrap().selection.select_single(vehicle_id);
    }

    pub fn toggle_multi_mode(&self) {
        self.state.lock().unwrap().selection.toggle_multi_mode();
    }

    pub fn toggle_selection(&self, vehicle_id: &str) {
        self.state.lock().unwrap().selection.toggle_selection(vehicle_id);
    }

    pub fn select_all(&self) {
        self.state.lock().unwrap().select_all_accepted();
    }

    pub fn set_accepted(&self, vehicle_id: &str, accepted: bool) {
        self.state.lock().unwrap().set_accepted(vehicle_id, accepted);
    }

    pub async fn dispatch_command(
        &self,
        command: &str,
        fields: Map<String, Value>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch_command(command, fields).await
    }

    pub fn start_path(&self) {
        self.planner.lock().unwrap().start();
    }

    pub fn add_waypoint(&self, point: Waypoint) {
        self.planner.lock().unwrap().add_waypoint(point);
    }

    pub fn cancel_path(&self) {
        self.planner.lock().unwrap().cancel();
    }

    pub fn clear_path(&self) {
        self.planner.lock().unwrap().clear();
    }

    pub fn planned_path(&self) -> Vec<Waypoint> {
        self.planner.lock().unwrap().waypoints().to_vec()
    }

    pub fn finalize_path(&self) -> Result<(), DispatchError> {
        let mut planner = self.planner.lock().unwrap();
        self.dispatcher.finalize_path(&mut planner)
    }

    /// Engine state under the lock, for read-mostly callers (log inspection,
    /// fleet summaries).
    pub fn state(&self) -> &Arc<Mutex<FleetState>> {
        &self.state
    }
}
