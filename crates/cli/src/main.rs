mod config;
mod db_commands;
mod doctor_commands;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use fluidmcp_gateway::{AppState, AuthConfig};
use fluidmcp_manager::{ServerManager, allowlist::CommandAllowlist};
use fluidmcp_persistence::Repository;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fluidmcp", about = "Gateway and lifecycle manager for a fleet of MCP subprocess servers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config file and env).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config file and env).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Path to a fluidmcp.toml config file (overrides discovery).
    #[arg(long, global = true, env = "FMCP_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Durable persistence URI, e.g. `sqlite://fluidmcp.db` (overrides
    /// config file and env; omit to run against the in-memory backend).
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is given).
    Gateway,
    /// Audit the resolved config and local environment.
    Doctor,
    /// Database management (reset, clear, migrate).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true)).init();
    }
}

async fn build_repo(config: &config::GatewayConfig) -> anyhow::Result<Arc<dyn Repository>> {
    match &config.database_url {
        Some(url) => {
            let repo = fluidmcp_persistence::SqliteRepository::connect(url, config.max_memory_logs).await?;
            Ok(Arc::new(repo))
        },
        None => Ok(Arc::new(fluidmcp_persistence::InMemoryRepository::with_log_cap(config.max_memory_logs))),
    }
}

async fn run_gateway(config: config::GatewayConfig) -> anyhow::Result<()> {
    let repo = build_repo(&config).await?;

    let allowlist = CommandAllowlist::new(config.allowed_commands.clone());
    let log_dir = directories::ProjectDirs::from("", "", "fluidmcp")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("./fluidmcp-logs"));
    std::fs::create_dir_all(&log_dir)?;

    let manager = Arc::new(
        ServerManager::new(repo.clone(), log_dir, allowlist)
            .with_shutdown_timeout(std::time::Duration::from_secs(config.shutdown_timeout_sec)),
    );

    let auth =
        if let Some(token) = config.bearer_token.clone().filter(|_| config.secure_mode) {
            AuthConfig::required(token)
        } else {
            AuthConfig::disabled()
        };

    #[cfg(feature = "metrics")]
    let state = {
        let metrics = fluidmcp_metrics::init_metrics(fluidmcp_metrics::MetricsRecorderConfig {
            enabled: true,
            global_labels: Vec::new(),
        })?;
        AppState::new(manager.clone(), repo, auth).with_metrics(metrics)
    };
    #[cfg(not(feature = "metrics"))]
    let state = AppState::new(manager.clone(), repo, auth);

    let router = fluidmcp_gateway::build_router(state);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, secure = config.secure_mode, "fluidmcp gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(manager.clone(), config.shutdown_timeout_sec))
        .await?;

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then drains running children within the
/// configured grace period before the listener actually stops accepting.
async fn shutdown_signal(manager: Arc<ServerManager>, shutdown_timeout_sec: u64) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining running servers");
    manager.shutdown_all(std::time::Duration::from_secs(shutdown_timeout_sec)).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "fluidmcp starting");

    let overrides = config::CliOverrides {
        bind: cli.bind,
        port: cli.port,
        config_path: cli.config,
        database_url: cli.database_url,
    };
    let gateway_config = config::load(overrides);

    match cli.command {
        None | Some(Commands::Gateway) => run_gateway(gateway_config).await,
        Some(Commands::Doctor) => doctor_commands::handle_doctor(&gateway_config).await,
        Some(Commands::Db { action }) => db_commands::handle_db(action, gateway_config.database_url).await,
    }
}
