//! virtfs-server binary.
//!
//! Usage:
//!   # Run until Ctrl-C
//!   cargo run -p virtfs-server -- serve
//!
//!   # Start, print volume info and the root listing, stop
//!   cargo run -p virtfs-server -- probe
//!
//!   # Show the effective configuration
//!   cargo run -p virtfs-server -- --config ./server.ron config

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use virtfs_server::{LoggingDispatcher, ServerConfig, Service, build_transport, probe};

/// Service host for the virtio-fs provider bridge.
#[derive(Parser, Debug)]
#[command(name = "virtfs-server")]
#[command(about = "Expose a virtio-fs device as a provider volume")]
struct Args {
    /// Config file (defaults to <config dir>/virtfs/server.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the service and run until Ctrl-C
    Serve,
    /// Start, report volume info and the root listing, then stop
    Probe,
    /// Print the effective configuration as RON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.config.clone().or_else(ServerConfig::default_path) {
        Some(path) => ServerConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };

    // RUST_LOG wins over the config file
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter.as_deref().unwrap_or("info"))
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match args.command {
        Command::Serve => serve(config).await,
        Command::Probe => run_probe(config),
        Command::Config => {
            println!("{}", config.to_ron()?);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let transport = build_transport(&config.transport)?;
    let mut service = Service::new(config, LoggingDispatcher::default());
    service.start(transport)?;

    tracing::info!("serving, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    service.stop();
    Ok(())
}

fn run_probe(config: ServerConfig) -> Result<()> {
    let transport = build_transport(&config.transport)?;
    let mut service = Service::new(config, LoggingDispatcher::default());
    let fs = service.start(transport)?;

    let report = probe(&*fs);
    drop(fs);
    service.stop();

    print!("{}", report?);
    Ok(())
}
