//! The gpupgrade hub.

mod agents;
mod app;
mod checklist;
mod cluster_pair;
mod config;
mod database;
mod error;
mod exec;
#[cfg(test)]
mod fixtures;
mod markers;
mod server;
mod tasks;
mod upgrade;
mod utils;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;
use crate::server::HubDeps;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_ansi(true))
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        cli_to_hub_port = %cfg.cli_to_hub_port,
        hub_to_agent_port = %cfg.hub_to_agent_port,
        state_dir = %cfg.state_dir().display(),
        agent_timeout = ?cfg.agent_timeout(),
        "starting gpupgrade hub",
    );
    let deps = HubDeps::from_config(&cfg);
    let res = match App::new(cfg, deps).await {
        Ok(app) => app.run().await,
        Err(err) => Err(err),
    };
    if let Err(err) = &res {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}
