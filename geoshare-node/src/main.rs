//! geoshare node: runs either the relay or a simulated walker.
//!
//! ```text
//! geoshare-node relay [relay.json] [--bind ADDR]  # fan-out relay
//! geoshare-node walk  [client.json] [--url URL]   # client walking a small square
//! ```
//!
//! `--bind` and `--url` (or `GEOSHARE_BIND` / `GEOSHARE_URL`) override the
//! addresses from the file. Log verbosity follows `RUST_LOG` (default `info`).

mod walker;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use geoshare_collab::{ClientConfig, RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(name = "geoshare-node", about = "Real-time location sharing relay and walker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the fan-out relay
    Relay {
        /// JSON relay configuration
        config: Option<PathBuf>,
        /// Address to bind to
        #[arg(long, env = "GEOSHARE_BIND")]
        bind: Option<String>,
    },
    /// Run a client walking a small square
    Walk {
        /// JSON client configuration
        config: Option<PathBuf>,
        /// WebSocket URL of the relay
        #[arg(long, env = "GEOSHARE_URL")]
        url: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Cli::parse()) {
        log::error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    match cli.command {
        Command::Relay { config, bind } => {
            let config = load_relay_config(config.as_deref(), bind)?;
            runtime.block_on(run_relay(config))
        }
        Command::Walk { config, url } => {
            let config = load_client_config(config.as_deref(), url)?;
            runtime.block_on(walker::walk(config))
        }
    }
}

fn load_relay_config(path: Option<&Path>, bind: Option<String>) -> Result<RelayConfig> {
    let mut config = match path {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load relay config from {}", path.display()))?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    Ok(config)
}

fn load_client_config(path: Option<&Path>, url: Option<String>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load client config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = url {
        config.server_url = url;
    }
    Ok(config)
}

async fn run_relay(config: RelayConfig) -> Result<()> {
    info!("Starting geoshare relay on {}...", config.bind_addr);
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run() => result.map_err(|e| anyhow::anyhow!(e)).context("relay stopped"),
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connection(s) served, {} location(s) relayed, {} rejected",
                stats.total_connections, stats.messages_relayed, stats.messages_rejected
            );
            Ok(())
        }
    }
}
