use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the backend's vehicle listing. The backend is free to add
/// vendor fields (model, firmware, link address, ...); everything besides
/// the identity key rides along in `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDescriptor {
    pub id: String,
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl VehicleDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), meta: Map::new() }
    }
}

/// Body of `GET /api/clients`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientList {
    #[serde(default)]
    pub clients: Vec<VehicleDescriptor>,
}

/// Success body of `POST /api/send-command`. Failure bodies carry the same
/// `message` field and are surfaced through the API error path.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub message: String,
}
