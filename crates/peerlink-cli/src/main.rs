//! Peerlink server binary.

use clap::{Parser, Subcommand};
use peerlink_client::HttpTransport;
use peerlink_core::{AgentTransport, CoreConfig, EventBus};
use peerlink_gateway::{build_router, AppState};
use peerlink_registry::{AgentStore, HealthMonitor};
use peerlink_scheduler::{Scheduler, TaskLedger};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peerlink", about = "Peerlink — peer-agent orchestration platform")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "peerlink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the platform server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Fetch and print an agent's discovery document
    Card {
        /// Base URL of the agent
        url: String,
    },
}

#[derive(Deserialize, Default)]
struct PeerlinkConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    core: CoreConfig,
    /// Agent endpoints registered automatically at startup.
    #[serde(default)]
    seed_agents: Vec<String>,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // A missing config file is fine; defaults cover everything.
    let config: PeerlinkConfig = match tokio::fs::read_to_string(&cli.config).await {
        Ok(raw) => toml::from_str(&raw).map_err(|e| {
            anyhow::anyhow!("Failed to parse config '{}': {}", cli.config.display(), e)
        })?,
        Err(_) => {
            info!(path = %cli.config.display(), "No config file, using defaults");
            PeerlinkConfig::default()
        }
    };

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Card { url } => {
            let transport = HttpTransport::new(config.core);
            let card = transport.fetch_card(&url).await?;
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(())
        }
    }
}

async fn serve(
    config: PeerlinkConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let core = config.core;

    let bus = Arc::new(EventBus::default());
    let store = Arc::new(AgentStore::new(Arc::clone(&bus), core.max_tasks_per_agent));
    let ledger = Arc::new(TaskLedger::new(Arc::clone(&bus), core.ledger_capacity));
    let transport: Arc<dyn AgentTransport> = Arc::new(HttpTransport::new(core.clone()));

    let scheduler = Scheduler::new(
        Arc::clone(&store),
        ledger,
        Arc::clone(&transport),
        core.clone(),
    );
    let (monitor, failover_rx) = HealthMonitor::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        core.clone(),
    );
    scheduler.start(failover_rx);
    monitor.spawn();

    // Seed agents from config; a dead seed never blocks startup.
    for endpoint in &config.seed_agents {
        match transport.fetch_card(endpoint).await {
            Ok(card) => match store.register(card, true) {
                Ok(id) => info!(agent_id = %id, endpoint, "Seed agent registered"),
                Err(e) => warn!(endpoint, error = %e, "Seed agent rejected"),
            },
            Err(e) => warn!(endpoint, error = %e, "Seed agent unreachable"),
        }
    }

    let app = build_router(Arc::new(AppState {
        store,
        scheduler,
        bus,
        transport,
    }));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Peerlink gateway listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
