//! Experiment Hub server entry point.
//!
//! Development defaults: bind 0.0.0.0:8000, auto-reload on, `info` logging.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use experiment_hub::config::load_config;
use experiment_hub::lifecycle::reload::{self, Supervisor};
use experiment_hub::lifecycle::signals::spawn_signal_listener;
use experiment_hub::observability::{init_logging, metrics, LogFormat};
use experiment_hub::{Application, Error, Shutdown};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "experiment-hub.toml";

#[derive(Parser, Debug)]
#[command(name = "experiment-hub", version, about = "Experiment Hub backend service")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "EXPERIMENT_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind (overrides config and HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config and PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable auto-reload.
    #[arg(long)]
    no_reload: bool,

    /// Base log level; RUST_LOG takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, env = "LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging comes first so configuration errors are reported through it.
    init_logging(&cli.log_level, cli.log_format).map_err(|e| e as Box<dyn std::error::Error>)?;

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Service terminated with error");
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config_path = cli.config.clone().or_else(|| {
        let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    });

    let mut settings = load_config(config_path.as_deref())?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if cli.no_reload {
        settings.server.reload = false;
    }

    tracing::info!(
        config = ?config_path,
        bind_address = %settings.bind_address(),
        reload = settings.server.reload,
        "Configuration loaded"
    );

    let is_worker = reload::is_worker();
    if settings.server.reload && !is_worker {
        let program = std::env::current_exe()?;
        let mut supervisor = Supervisor::new(
            program.clone(),
            std::env::args_os().skip(1).collect(),
            Duration::from_secs(settings.server.shutdown_grace_secs),
        )
        .watch(program);
        if let Some(path) = &config_path {
            supervisor = supervisor.watch(path);
        }

        let shutdown = Shutdown::new();
        spawn_signal_listener(shutdown.clone(), false);
        supervisor.run(shutdown).await?;
        tracing::info!("Reload supervisor stopped");
        return Ok(());
    }

    if settings.metrics.enabled {
        let addr: SocketAddr = settings
            .metrics
            .address
            .parse()
            .map_err(|e: AddrParseError| Error::Metrics(e.to_string()))?;
        metrics::init_metrics(addr)?;
    }

    let app = Application::new(settings)?;
    let listener = TcpListener::bind(app.settings().bind_address()).await?;

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone(), is_worker);

    app.serve(listener, shutdown.wait()).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
