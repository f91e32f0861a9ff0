mod host;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use nerve_core::{bootstrap::load_config, logging};
use nerve_discovery::NerveDiscovery;

use host::DiscoveryHost;

/// Discover monitorable service instances registered in ZooKeeper
#[derive(Parser, Debug)]
#[command(name = "nerve", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON); must exist when given.
    /// Without it, `NERVE_CONFIG_PATH` and then `./nerve.yaml` are tried.
    #[arg(long, short, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one discovery pass and print the endpoints as JSON
    Discover {
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Re-run discovery on the configured period until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    match args.command {
        Command::Discover { pretty } => {
            let discovery = NerveDiscovery::from_config(&config)?;
            let endpoints = discovery.discover().await.map_err(|e| {
                error!("Discovery failed: {}", e);
                anyhow::anyhow!("Discovery failed: {e}")
            })?;

            let output = if pretty {
                serde_json::to_string_pretty(&endpoints)?
            } else {
                serde_json::to_string(&endpoints)?
            };
            println!("{output}");
        }
        Command::Watch => {
            info!("Nerve discovery host starting...");
            let host = DiscoveryHost::init(args.config, config)?;

            shutdown_signal().await;

            host.stop().await;
            info!("Nerve discovery host shut down");
        }
    }

    Ok(())
}

/// Wait for SIGTERM or Ctrl+C
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
