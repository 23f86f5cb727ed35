//! scriptd: an HTTP server whose routes are scripts.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                    SCRIPTD                       │
//!   Client Request      │  ┌────────┐   ┌────────────┐   ┌─────────────┐  │
//!   ────────────────────┼─▶│  http  │──▶│ dispatcher │──▶│ route table │  │
//!                       │  │ server │   └─────┬──────┘   └─────────────┘  │
//!                       │  └────────┘         │                           │
//!                       │                     ▼                           │
//!                       │             ┌──────────────┐   ┌─────────────┐  │
//!                       │             │  serializer  │──▶│ Rhai engine │  │
//!                       │             │ (one worker) │   │ + bindings  │  │
//!                       │             └──────────────┘   └──────┬──────┘  │
//!                       │                                       │         │
//!   Client Response     │  ┌─────────────────┐   ┌──────────────▼──────┐  │
//!   ◀───────────────────┼──│ request context │◀──│ connection registry │  │
//!   (plain or stream)   │  └─────────────────┘   └─────────────────────┘  │
//!                       │                                                 │
//!                       │  config · observability · lifecycle · admin     │
//!                       └──────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::net::TcpListener;

use scriptd::config::{load_config, validate_config, ServerConfig};
use scriptd::lifecycle::{signals, Application};
use scriptd::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "scriptd")]
#[command(about = "Serve HTTP routes defined by a script", long_about = None)]
struct Cli {
    /// Startup script (overrides script.path)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides listener.bind_address)
    #[arg(long)]
    bind: Option<String>,

    /// Log level (overrides observability.log_level)
    #[arg(long)]
    log_level: Option<String>,

    /// Reload the script when it changes
    #[arg(long)]
    watch: bool,
}

fn resolve_config(cli: &Cli) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    if let Some(file) = &cli.file {
        config.script.path = file.display().to_string();
    }
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if cli.watch {
        config.script.watch = true;
    }

    validate_config(&config).map_err(scriptd::config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let format = logging::LogFormat::parse(&config.observability.log_format)
        .unwrap_or(logging::LogFormat::Pretty);
    logging::init(&config.observability.log_level, format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "scriptd starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        script = %config.script.path,
        watch = config.script.watch,
        keepalive_secs = config.streaming.keepalive_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = Application::new(config)?;
    let script_path = app.config().script.path.clone();
    app.load_script(Path::new(&script_path)).await?;

    let listener = TcpListener::bind(&app.config().listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    signals::spawn_signal_listener(app.shutdown_handle());
    app.serve(listener).await
}
