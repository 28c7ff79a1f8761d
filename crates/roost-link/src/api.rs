use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use roost_engine::state::FleetState;
use roost_proto::clients::{ClientList, CommandAck, VehicleDescriptor};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    /// The peer answered with an error body; `message` is its `message` field
    /// when present, else a status line.
    #[error("{message}")]
    Peer { status: StatusCode, message: String },
}

/// Thin facade over the external request/response API. The configured bearer
/// token is attached to every request; no session flow lives here.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// `GET /api/clients`
    pub async fn list_clients(&self) -> Result<Vec<VehicleDescriptor>, ApiError> {
        let resp = checked(self.request(reqwest::Method::GET, "/api/clients").send().await?).await?;
        Ok(resp.json::<ClientList>().await?.clients)
    }

    /// `POST /api/send-command` for a single vehicle.
    pub async fn send_command(
        &self,
        client_id: &str,
        command: &str,
        fields: &Map<String, Value>,
    ) -> Result<CommandAck, ApiError> {
        let mut body = fields.clone();
        body.insert("client_id".into(), Value::String(client_id.to_string()));
        body.insert("command".into(), Value::String(command.to_string()));

        let resp = checked(
            self.request(reqwest::Method::POST, "/api/send-command")
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        Ok(resp.json::<CommandAck>().await?)
    }

    /// `GET /api/network-metrics` — free-form pass-through.
    pub async fn network_metrics(&self) -> Result<Value, ApiError> {
        let resp =
            checked(self.request(reqwest::Method::GET, "/api/network-metrics").send().await?)
                .await?;
        Ok(resp.json::<Value>().await?)
    }
}

async fn checked(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<CommandAck>()
        .await
        .ok()
        .map(|body| body.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("request failed with status {}", status));
    Err(ApiError::Peer { status, message })
}

/// One registry refresh cycle: fetch, reconcile, never propagate failure —
/// a failed fetch clears the registry and selection and leaves an error log
/// entry behind.
pub async fn refresh_clients(api: &ApiClient, state: &Arc<Mutex<FleetState>>) {
    match api.list_clients().await {
        Ok(clients) => state.lock().unwrap().apply_client_list(clients),
        Err(err) => {
            warn!("registry: fetch failed: {}", err);
            state.lock().unwrap().registry_fetch_failed(&err.to_string());
        }
    }
}
