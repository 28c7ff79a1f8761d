use serde_json::{Map, Value};
use tracing::info;

use roost_proto::clients::VehicleDescriptor;

use crate::log::EventLog;
use crate::selection::SelectionModel;
use crate::telemetry::{DerivedStatus, TelemetryCache};

/// All cross-cutting engine state. Lives behind one lock at runtime so every
/// inbound event mutates it atomically.
#[derive(Debug, Default)]
pub struct FleetState {
    clients: Vec<VehicleDescriptor>,
    pub cache: TelemetryCache,
    pub selection: SelectionModel,
    pub log: EventLog,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> &[VehicleDescriptor] {
        &self.clients
    }

    pub fn in_registry(&self, vehicle_id: &str) -> bool {
        self.clients.iter().any(|c| c.id == vehicle_id)
    }

    /// Reconcile a successful registry poll. Replaces the snapshot only when
    /// it differs by value (and logs the change), seeds acceptance defaults
    /// for newly seen ids, and fixes up the single selection: an empty
    /// registry clears it, a non-empty registry with nothing selected
    /// auto-selects the first entry. Acceptance entries are never removed for
    /// vanished ids; operator intent survives transient disappearances.
    pub fn apply_client_list(&mut self, clients: Vec<VehicleDescriptor>) {
        if self.clients != clients {
            info!("registry: {} -> {} vehicles", self.clients.len(), clients.len());
            self.log.info(format!("registry updated: {} vehicles", clients.len()));
            self.clients = clients;
            for c in &self.clients {
                self.cache.ensure_acceptance_default(&c.id);
            }
        }

        if self.clients.is_empty() {
            self.selection.select_single(None);
        } else if self.selection.selected().is_none() {
            let first = self.clients[0].id.clone();
            self.selection.select_single(Some(first));
        }
    }

    /// A failed registry fetch clears the snapshot and the single selection;
    /// callers observe the failure only through the log and the cleared state.
    pub fn registry_fetch_failed(&mut self, reason: &str) {
        self.clients.clear();
        self.selection.select_single(None);
        self.log.error(format!("registry fetch failed: {}", reason));
    }

    pub fn apply_telemetry(&mut self, vehicle_id: &str, fields: Map<String, Value>) {
        self.cache.apply_update(vehicle_id, fields);
    }

    pub fn apply_battery(&mut self, vehicle_id: &str, battery_info: Value) {
        self.cache.apply_battery(vehicle_id, battery_info);
    }

    pub fn set_accepted(&mut self, vehicle_id: &str, accepted: bool) {
        self.cache.set_accepted(vehicle_id, accepted);
        if !accepted {
            self.log.info(format!("vehicle {}: updates rejected, cache purged", vehicle_id));
        }
    }

    pub fn project(&self, vehicle_id: &str) -> DerivedStatus {
        self.cache.project(vehicle_id, self.in_registry(vehicle_id))
    }

    pub fn current_targets(&self) -> Vec<String> {
        self.selection.current_targets()
    }

    /// Multi-select every listed vehicle whose acceptance flag is true.
    pub fn select_all_accepted(&mut self) {
        let eligible: Vec<String> = self
            .clients
            .iter()
            .filter(|c| self.cache.is_accepted(&c.id))
            .map(|c| c.id.clone())
            .collect();
        self.selection.select_all(eligible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogLevel;

    fn descriptors(ids: &[&str]) -> Vec<VehicleDescriptor> {
        ids.iter().map(|id| VehicleDescriptor::new(*id)).collect()
    }

    #[test]
    fn empty_poll_clears_selection() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1"]));
        assert_eq!(state.selection.selected(), Some("d1"));

        state.apply_client_list(descriptors(&[]));
        assert_eq!(state.selection.selected(), None);
    }

    #[test]
    fn first_entry_auto_selected_when_nothing_selected() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1", "d2"]));
        assert_eq!(state.selection.selected(), Some("d1"));

        // An existing selection is left alone.
        state.selection.select_single(Some("d2".into()));
        state.apply_client_list(descriptors(&["d1", "d2", "d3"]));
        assert_eq!(state.selection.selected(), Some("d2"));
    }

    #[test]
    fn unchanged_poll_logs_nothing() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1"]));
        let after_first = state.log.len();
        state.apply_client_list(descriptors(&["d1"]));
        assert_eq!(state.log.len(), after_first);
    }

    #[test]
    fn acceptance_flags_survive_vehicle_disappearance() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1"]));
        state.set_accepted("d1", false);

        state.apply_client_list(descriptors(&[]));
        state.apply_client_list(descriptors(&["d1"]));
        // Reappearance does not reset the operator's rejection.
        assert!(!state.cache.is_accepted("d1"));
    }

    #[test]
    fn failed_fetch_clears_state_and_logs() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1"]));
        state.registry_fetch_failed("connection refused");

        assert!(state.clients().is_empty());
        assert_eq!(state.selection.selected(), None);
        let newest = state.log.entries().next().unwrap();
        assert_eq!(newest.level, LogLevel::Error);
        assert!(newest.message.contains("connection refused"));
    }

    #[test]
    fn select_all_skips_rejected_vehicles() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1", "d2", "d3"]));
        state.set_accepted("d2", false);

        state.selection.toggle_multi_mode();
        state.select_all_accepted();
        assert_eq!(state.current_targets(), ["d1", "d3"]);
    }

    #[test]
    fn projection_connected_requires_registry_and_cache() {
        let mut state = FleetState::new();
        state.apply_client_list(descriptors(&["d1"]));
        assert!(!state.project("d1").is_connected);

        let fields = match serde_json::json!({"altitude": 5.0}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        state.apply_telemetry("d1", fields);
        assert!(state.project("d1").is_connected);
    }
}
