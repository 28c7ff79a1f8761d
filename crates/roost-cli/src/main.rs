use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use url::Url;

use roost_link::api::ApiClient;
use roost_link::station::{Station, StationConfig};

#[derive(Debug, Parser)]
#[command(name = "roost", version, about = "Roost - multi-vehicle ground control core")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration without touching the network.
    Doctor,
    /// One-shot vehicle listing through the API facade.
    Clients,
    /// One-shot request/response command to a single vehicle.
    Send {
        command: String,
        /// Target vehicle id.
        #[arg(long)]
        client: String,
        /// Extra command fields as a JSON object.
        #[arg(long)]
        payload: Option<String>,
    },
    /// One-shot network metrics readout through the API facade.
    Metrics,
    /// Connect the control stream and run until Ctrl-C.
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    api: ApiCfg,
    stream: StreamCfg,
    registry: Option<RegistryCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct ApiCfg {
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamCfg {
    url: String,
    /// Fixed reconnect delay after an unexpected close.
    reconnect_secs: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
struct RegistryCfg {
    poll_secs: Option<u64>,
}

const DEFAULT_RECONNECT_SECS: u64 = 5;
const DEFAULT_POLL_SECS: u64 = 5;

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

fn station_config(cfg: &Config) -> Result<StationConfig> {
    let stream_url = Url::parse(&cfg.stream.url).context("parse stream.url")?;
    Ok(StationConfig {
        api_base: cfg.api.base_url.clone(),
        api_token: cfg.api.token.clone(),
        stream_url,
        reconnect_delay: Duration::from_secs(
            cfg.stream.reconnect_secs.unwrap_or(DEFAULT_RECONNECT_SECS),
        ),
        poll_interval: Duration::from_secs(
            cfg.registry.as_ref().and_then(|r| r.poll_secs).unwrap_or(DEFAULT_POLL_SECS),
        ),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Clients => clients(&cfg).await?,
        Command::Send { command, client, payload } => send(&cfg, &command, &client, payload).await?,
        Command::Metrics => metrics(&cfg).await?,
        Command::Run => run(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    anyhow::ensure!(
        cfg.api.base_url.starts_with("http://") || cfg.api.base_url.starts_with("https://"),
        "api.base_url must be http(s)"
    );

    let stream_url = Url::parse(&cfg.stream.url).context("parse stream.url")?;
    anyhow::ensure!(
        stream_url.scheme() == "ws" || stream_url.scheme() == "wss",
        "stream.url must be ws(s)"
    );
    anyhow::ensure!(stream_url.host_str().is_some(), "stream.url missing host");

    let reconnect = cfg.stream.reconnect_secs.unwrap_or(DEFAULT_RECONNECT_SECS);
    anyhow::ensure!((1..=60).contains(&reconnect), "stream.reconnect_secs should be 1..60");

    let poll = cfg.registry.as_ref().and_then(|r| r.poll_secs).unwrap_or(DEFAULT_POLL_SECS);
    anyhow::ensure!((1..=60).contains(&poll), "registry.poll_secs should be 1..60");

    info!("doctor: OK");
    Ok(())
}

async fn clients(cfg: &Config) -> Result<()> {
    let api = ApiClient::new(cfg.api.base_url.clone(), cfg.api.token.clone());
    let clients = api.list_clients().await.context("list clients")?;
    if clients.is_empty() {
        println!("no vehicles listed");
        return Ok(());
    }
    for c in clients {
        if c.meta.is_empty() {
            println!("{}", c.id);
        } else {
            println!("{} {}", c.id, serde_json::to_string(&c.meta)?);
        }
    }
    Ok(())
}

async fn send(cfg: &Config, command: &str, client: &str, payload: Option<String>) -> Result<()> {
    let fields = match payload {
        Some(raw) => match serde_json::from_str(&raw).context("parse --payload json")? {
            serde_json::Value::Object(map) => map,
            _ => anyhow::bail!("--payload must be a json object"),
        },
        None => serde_json::Map::new(),
    };

    let api = ApiClient::new(cfg.api.base_url.clone(), cfg.api.token.clone());
    let ack = api.send_command(client, command, &fields).await.context("send command")?;
    println!("{}", ack.message);
    Ok(())
}

async fn metrics(cfg: &Config) -> Result<()> {
    let api = ApiClient::new(cfg.api.base_url.clone(), cfg.api.token.clone());
    let metrics = api.network_metrics().await.context("fetch network metrics")?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let station = Station::connect(station_config(cfg)?);

    let mut summary = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("run: shutting down");
                break;
            }
            _ = summary.tick() => summarize(&station),
        }
    }
    Ok(())
}

fn summarize(station: &Station) {
    let clients = station.clients();
    info!("fleet: stream_connected={} vehicles={}", station.is_connected(), clients.len());
    for c in clients {
        let st = station.status(&c.id);
        info!(
            "  {}: connected={} flying={} alt={:.1}m pos=({:.6},{:.6}) speed={:.1}m/s battery={:.0}%",
            c.id,
            st.is_connected,
            st.is_flying,
            st.altitude,
            st.latitude,
            st.longitude,
            st.speed,
            st.battery.percent
        );
    }
}
