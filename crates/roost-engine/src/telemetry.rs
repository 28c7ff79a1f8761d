use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

const BATTERY_KEY: &str = "battery_info";
const FLIGHT_STATE_KEY: &str = "flight_state";

/// Normalized projection of one vehicle's raw telemetry. Recomputed on every
/// read from the authoritative record; never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedStatus {
    pub is_connected: bool,
    pub is_flying: bool,
    pub altitude: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub battery: BatteryLevel,
    /// Everything the vehicle reported, untouched.
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryLevel {
    pub percent: f64,
}

impl DerivedStatus {
    fn disconnected() -> Self {
        Self {
            is_connected: false,
            is_flying: false,
            altitude: 0.0,
            latitude: 0.0,
            longitude: 0.0,
            speed: 0.0,
            heading: 0.0,
            battery: BatteryLevel { percent: 0.0 },
            raw: Map::new(),
        }
    }
}

/// Latest known state per vehicle id, plus the per-vehicle acceptance gate.
///
/// Updates are partial shallow merges: a field absent from an update keeps its
/// last known value. `battery_info` is one field and is replaced wholesale.
#[derive(Debug, Default)]
pub struct TelemetryCache {
    records: HashMap<String, Map<String, Value>>,
    accepted: HashMap<String, bool>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial update onto the vehicle's record. Dropped silently when
    /// the vehicle is not accepted.
    pub fn apply_update(&mut self, vehicle_id: &str, fields: Map<String, Value>) {
        if !self.is_accepted(vehicle_id) {
            return;
        }
        let record = self.records.entry(vehicle_id.to_string()).or_default();
        for (k, v) in fields {
            record.insert(k, v);
        }
    }

    /// Replace the battery sub-object wholesale. Same acceptance gate as
    /// telemetry updates.
    pub fn apply_battery(&mut self, vehicle_id: &str, battery_info: Value) {
        if !self.is_accepted(vehicle_id) {
            return;
        }
        self.records
            .entry(vehicle_id.to_string())
            .or_default()
            .insert(BATTERY_KEY.to_string(), battery_info);
    }

    pub fn purge(&mut self, vehicle_id: &str) {
        self.records.remove(vehicle_id);
    }

    /// Flip the acceptance gate. Revoking acceptance purges the cached record
    /// immediately; later updates for the id are dropped until re-enabled.
    pub fn set_accepted(&mut self, vehicle_id: &str, accepted: bool) {
        self.accepted.insert(vehicle_id.to_string(), accepted);
        if !accepted {
            self.purge(vehicle_id);
        }
    }

    /// Unlisted vehicles default to accepted.
    pub fn is_accepted(&self, vehicle_id: &str) -> bool {
        self.accepted.get(vehicle_id).copied().unwrap_or(true)
    }

    /// Ensure an acceptance entry exists without touching an operator-set one.
    pub fn ensure_acceptance_default(&mut self, vehicle_id: &str) {
        self.accepted.entry(vehicle_id.to_string()).or_insert(true);
    }

    pub fn contains(&self, vehicle_id: &str) -> bool {
        self.records.contains_key(vehicle_id)
    }

    pub fn record(&self, vehicle_id: &str) -> Option<&Map<String, Value>> {
        self.records.get(vehicle_id)
    }

    /// Project the vehicle's record into normalized fields. `in_registry` is
    /// the caller's registry-membership check; a vehicle counts as connected
    /// only when it is both listed and has cached telemetry.
    ///
    /// Absent or null numeric fields project to 0.0 through explicit presence
    /// checks: a reported value of exactly zero is preserved, not defaulted.
    pub fn project(&self, vehicle_id: &str, in_registry: bool) -> DerivedStatus {
        let Some(record) = self.records.get(vehicle_id) else {
            return DerivedStatus::disconnected();
        };

        let battery = match record.get(BATTERY_KEY) {
            Some(Value::Object(info)) => BatteryLevel { percent: num_field(info, "percent") },
            _ => BatteryLevel { percent: 0.0 },
        };

        DerivedStatus {
            is_connected: in_registry,
            is_flying: num_field(record, FLIGHT_STATE_KEY) != 0.0,
            altitude: num_field(record, "altitude"),
            latitude: num_field(record, "latitude"),
            longitude: num_field(record, "longitude"),
            speed: num_field(record, "speed"),
            heading: num_field(record, "heading"),
            battery,
            raw: record.clone(),
        }
    }
}

fn num_field(map: &Map<String, Value>, key: &str) -> f64 {
    match map.get(key) {
        Some(v) if !v.is_null() => v.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}
