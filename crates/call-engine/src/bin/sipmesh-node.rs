//! sipmesh node
//!
//! Loads configuration (file, then `SIPMESH_*` environment, then flags),
//! binds the signaling socket and serves until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sipmesh_call_engine::logging::{setup_logging, LoggingConfig};
use sipmesh_call_engine::transport::UdpSignaling;
use sipmesh_call_engine::{NodeConfig, NodeServer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Distributed SIP signaling and media relay node")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SIP listen address, e.g. 0.0.0.0:5060
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Identity of this node on the hash ring
    #[arg(long)]
    instance_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;

    if let Some(listen) = args.listen {
        config.signaling.listen_addr = listen;
    }
    if let Some(instance_id) = &args.instance_id {
        config.cluster.instance_id = instance_id.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    setup_logging(LoggingConfig::from_config(&config.logging)?)?;

    let transport = match UdpSignaling::bind(config.signaling.listen_addr).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Failed to start SIP listener: {}", e);
            std::process::exit(1);
        }
    };

    let server = NodeServer::new(config)?;
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    server.run(transport, shutdown).await?;
    Ok(())
}
