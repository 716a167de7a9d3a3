//! # Capture Relay CLI (`capture`)
//!
//! Runs either half of the pipeline and manages the document store.
//!
//! ## Usage
//!
//! ```bash
//! capture --config ./config/capture.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `capture serve [ADDRESS] [PORT]` | Accept events over HTTP and queue them |
//! | `capture transfer` | Move queued events into the document store |
//! | `capture init` | Create the document store schema |
//! | `capture stats` | Print document counts per collection |
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capture_relay::broker_redis::RedisBroker;
use capture_relay::config::{self, Config};
use capture_relay::{migrate, server, stats, transfer};

const DEFAULT_CONFIG: &str = "./config/capture.toml";

/// Capture Relay: browser analytics events → broker → document store.
#[derive(Parser)]
#[command(name = "capture", version)]
struct Cli {
    /// Path to configuration file.
    ///
    /// `*.toml` files are read as TOML, anything else as flat `KEY VALUE`
    /// lines. Defaults to `./config/capture.toml`; built-in defaults are used
    /// if that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture HTTP server.
    ///
    /// Blocks until the broker is reachable, then answers every request with
    /// 200 and queues well-formed bodies.
    Serve {
        /// Listen address, overriding the configuration.
        address: Option<String>,
        /// Listen port, overriding the configuration.
        port: Option<u16>,
    },

    /// Run the transfer worker.
    Transfer,

    /// Initialize the document store schema. Safe to run repeatedly.
    Init,

    /// Show what the document store holds.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let mut cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { address, port } => {
            if let Some(address) = address {
                cfg.server.http_address = address;
            }
            if let Some(port) = port {
                cfg.server.http_port = port;
            }
            let broker = Arc::new(RedisBroker::new(&cfg.broker));
            server::run_server(&cfg, broker).await?;
        }
        Commands::Transfer => {
            let broker = Arc::new(RedisBroker::new(&cfg.broker));
            transfer::run_transfer(&cfg, broker).await?;
        }
        Commands::Init => {
            migrate::run_init(&cfg).await?;
            println!("Document store initialized at {}.", cfg.store.url);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// An explicit `--config` must exist; a missing default file means defaults.
fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(default)
            } else {
                tracing::info!(path = DEFAULT_CONFIG, "no config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}
