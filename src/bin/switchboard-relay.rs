// ABOUTME: Relay server binary: configuration, logging, and serve loop
// ABOUTME: Binds the configured address and runs the relay until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

#![deny(unsafe_code)]

//! # Switchboard Relay Binary
//!
//! Starts the tool-call relay on the configured address. Configuration
//! comes from environment variables (`SWITCHBOARD_*`) with command-line
//! overrides for the common knobs.

use anyhow::Result;
use clap::Parser;
use switchboard::config::RelayConfig;
use switchboard::logging::LoggingConfig;
use switchboard::relay::RelayServer;
use tracing::info;

#[derive(Parser)]
#[command(name = "switchboard-relay")]
#[command(about = "Tool-call relay brokering browser tools to AI agents")]
struct Args {
    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = setup_configuration(&args)?;
    run_server(config).await
}

fn setup_configuration(args: &Args) -> Result<RelayConfig> {
    let mut config = RelayConfig::from_env()?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if args.debug {
        config.debug = true;
    }

    LoggingConfig::from_env().with_debug(config.debug).init()?;
    info!("Starting Switchboard relay");
    info!("{}", config.summary());

    Ok(config)
}

async fn run_server(config: RelayConfig) -> Result<()> {
    let server = RelayServer::new(config);
    server.serve().await?;
    Ok(())
}
