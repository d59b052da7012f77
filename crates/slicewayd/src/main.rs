//! slicewayd: runs a Sliceway server.
//!
//! # Usage
//!
//! ```text
//! slicewayd serve --port 8080
//! slicewayd serve --config sliceway.toml --host 127.0.0.1
//! ```
//!
//! The daemon serves the built-in echo slice until interrupted.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sliceway_server::{ServerConfig, SliceServer, echo_slice};
use tracing::info;

#[derive(Parser)]
#[command(name = "slicewayd", about = "Sliceway HTTP daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the echo slice over HTTP/1.1.
    Serve {
        /// TOML config file; flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Interface to bind.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (0 picks a free port).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sliceway_server=debug,slicewayd=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let config = load_config(config, host, port)?;
            serve(config).await
        }
    }
}

fn load_config(path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(path) => ServerConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let server = SliceServer::new(echo_slice(), config);
    let port = server.start().await?;
    info!(host = %server.config().host, port, "slicewayd ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    server.close().await?;
    Ok(())
}
