#![forbid(unsafe_code)]
//! nomadcoin node: REST API, block explorer and peer sync in one process.

use clap::Parser;
use nomadcoin::config::{load_config, load_config_from, ConfigError, Mode};
use nomadcoin::node::Node;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a config.toml; defaults to ./config.toml when present
    #[arg(long)]
    config: Option<PathBuf>,
    /// Port for the REST API and peer upgrades
    #[arg(long)]
    rest_port: Option<u16>,
    /// Port for the HTML explorer
    #[arg(long)]
    html_port: Option<u16>,
    /// Which servers to run
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// Peer to dial at startup, as host:port (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), ConfigError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(port) = cli.rest_port {
        config.network.rest_port = port;
    }
    if let Some(port) = cli.html_port {
        config.network.html_port = port;
    }
    if let Some(mode) = cli.mode {
        config.network.mode = mode;
    }
    config.network.bootstrap_peers.extend(cli.peers);
    config.validate()?;

    tracing::info!(
        rest_port = config.network.rest_port,
        html_port = config.network.html_port,
        mode = ?config.network.mode,
        "Starting nomadcoin node"
    );

    let node = Arc::new(Node::init(config)?);
    node.start().await?;
    Ok(())
}
