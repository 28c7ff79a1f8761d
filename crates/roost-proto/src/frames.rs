use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Broadcast address accepted by the control stream.
pub const BROADCAST_ID: &str = "all";

const STICK_FIELDS: [&str; 4] =
    ["left_stick_x", "left_stick_y", "right_stick_x", "right_stick_y"];

/// Inbound frame on the control stream. Tags outside the known set land in
/// `Unknown` and are ignored by the link supervisor.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    #[serde(rename = "telemetry_update")]
    Telemetry {
        client_id: String,
        #[serde(default)]
        telemetry: Map<String, Value>,
    },
    #[serde(rename = "battery_update")]
    Battery {
        client_id: String,
        #[serde(default)]
        battery_info: Value,
    },
    #[serde(rename = "client_update")]
    ClientUpdate,
    #[serde(other)]
    Unknown,
}

/// Outbound frame: one named command plus its fields, addressed to a single
/// vehicle id or to `"all"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlFrame {
    pub client_id: String,
    pub payload: CommandPayload,
}

impl ControlFrame {
    pub fn to_vehicle(id: impl Into<String>, payload: CommandPayload) -> Self {
        Self { client_id: id.into(), payload }
    }

    pub fn broadcast(payload: CommandPayload) -> Self {
        Self { client_id: BROADCAST_ID.into(), payload }
    }
}

/// Open-vocabulary command payload: the known constructors below cover the
/// defined commands, `new` + `field` cover everything else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandPayload {
    pub command: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandPayload {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), fields: Map::new() }
    }

    pub fn with_fields(command: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self { command: command.into(), fields }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Continuous joystick-style control input.
    pub fn vstick(lx: f64, ly: f64, rx: f64, ry: f64) -> Self {
        Self::new("vstick")
            .field("left_stick_x", lx)
            .field("left_stick_y", ly)
            .field("right_stick_x", rx)
            .field("right_stick_y", ry)
    }

    /// Position setpoint in the vehicle frame.
    pub fn position_control(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self::new("position_control")
            .field("x", x)
            .field("y", y)
            .field("z", z)
            .field("yaw", yaw)
    }

    /// Aggregate mission: the entire ordered waypoint sequence.
    pub fn execute_path(path: &[Waypoint]) -> Self {
        let points: Vec<Value> = path
            .iter()
            .map(|p| {
                serde_json::json!({
                    "lat": p.lat,
                    "lng": p.lng,
                    "height": p.height,
                    "heading": p.heading,
                })
            })
            .collect();
        Self::new("execute_path").field("path", Value::Array(points))
    }

    pub fn set_ros_origin(lat: f64, lon: f64) -> Self {
        Self::new("set_ros_origin").field("lat", lat).field("lon", lon)
    }

    pub fn set_ros_target(x: f64, y: f64, z: f64) -> Self {
        Self::new("set_ros_target").field("x", x).field("y", y).field("z", z)
    }

    /// True for a `vstick` frame whose four stick axes are all exactly zero.
    /// The dispatcher sends such a frame once as a stop edge, then suppresses
    /// repeats.
    pub fn is_zero_stick(&self) -> bool {
        self.command == "vstick"
            && STICK_FIELDS
                .iter()
                .all(|k| self.fields.get(*k).and_then(Value::as_f64) == Some(0.0))
    }
}

/// One point of a planned flight path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub height: f64,
    pub heading: f64,
}
