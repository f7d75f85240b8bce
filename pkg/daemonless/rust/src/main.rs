// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use daemonless::config::{default_config_path, load_config};
use daemonless::{Supervisor, trigger};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

#[derive(Parser, Debug)]
#[command(name = "daemonless", version, about = "Start daemons on demand, stop them once idle")]
struct Args {
    /// Configuration file (default: $DAEMONLESS_CONFIG or /etc/daemonless/daemonless.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the activation server listens on
    #[arg(long, default_value = "localhost:2000")]
    bind: String,

    #[arg(long, default_value = "info")]
    log_level: log::Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    simple_logger::init_with_level(args.log_level)?;
    info!(
        "daemonless starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let path = args.config.unwrap_or_else(default_config_path);
    let config = load_config(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    info!("loaded {} manager(s)", config.managers.len());
    let supervisor = Arc::new(Supervisor::from_config(&config));

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!("listening on {}", listener.local_addr()?);

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    };

    trigger::serve(
        listener,
        Arc::clone(&supervisor),
        trigger::Timeouts::default(),
        shutdown,
    )
    .await?;

    supervisor.shutdown().await;
    info!("daemonless shutting down");
    Ok(())
}
