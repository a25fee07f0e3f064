//! The gpupgrade CLI.

mod client;
mod cmd;
pub mod error;
pub mod monitor;
pub mod reporter;

use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::client::HubClient;
use crate::error::CliError;
use gpupgrade_core::DEFAULT_CLI_TO_HUB_PORT;

/// The name of the directory, relative to `$HOME`, holding upgrade state.
const STATE_DIR_NAME: &str = ".gp_upgrade";

/// The gpupgrade CLI.
#[derive(StructOpt)]
#[structopt(name = "gpupgrade")]
pub struct Gpupgrade {
    #[structopt(subcommand)]
    action: Option<GpupgradeSubcommands>,
    /// Enable debug logging.
    #[structopt(short, global = true)]
    verbose: bool,
    /// Set the URL of the hub to interact with.
    #[structopt(long, env = "GPUPGRADE_HUB_URL")]
    hub_url: Option<String>,
}

impl Gpupgrade {
    pub async fn run(self) -> Result<()> {
        // Initialize logging based on CLI config. Stdout is reserved for report output.
        let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
        let filter_layer;
        let level_filter;
        if self.verbose {
            filter_layer = EnvFilter::new("debug");
            level_filter = LevelFilter::DEBUG;
        } else {
            filter_layer = EnvFilter::new("info");
            level_filter = LevelFilter::INFO;
        }
        let _res = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(level_filter)
            .try_init();

        match &self.action {
            Some(GpupgradeSubcommands::Prepare(inner)) => inner.run(&self).await,
            Some(GpupgradeSubcommands::Check(inner)) => inner.run(&self).await,
            Some(GpupgradeSubcommands::Status(inner)) => inner.run(&self).await,
            Some(GpupgradeSubcommands::Upgrade(inner)) => inner.run(&self).await,
            Some(GpupgradeSubcommands::Version(inner)) => inner.run(&self).await,
            Some(GpupgradeSubcommands::Monitor(inner)) => inner.run(&self).await,
            Some(GpupgradeSubcommands::Other(_)) | None => Err(CliError::Usage.into()),
        }
    }

    /// The URL of the hub, defaulting to the hub port on localhost.
    pub fn hub_url(&self) -> String {
        self.hub_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", DEFAULT_CLI_TO_HUB_PORT))
    }

    /// Get a new hub client based on runtime config.
    pub async fn get_client(&self) -> Result<HubClient> {
        client::connect(&self.hub_url()).await
    }

    /// The directory holding upgrade state, `$STATE_DIR` or else `$HOME/.gp_upgrade`.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os("STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(home_dir()?.join(STATE_DIR_NAME))
    }
}

/// The current user's home directory.
pub(crate) fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).context("HOME is not set")
}

#[derive(StructOpt)]
pub enum GpupgradeSubcommands {
    /// Prepare the clusters for upgrade.
    #[structopt(name = "prepare")]
    Prepare(cmd::prepare::Prepare),
    /// Check the old cluster's readiness for upgrade.
    #[structopt(name = "check")]
    Check(cmd::check::Check),
    /// Report upgrade progress.
    #[structopt(name = "status")]
    Status(cmd::status::Status),
    /// Upgrade the master and primary segments.
    #[structopt(name = "upgrade")]
    Upgrade(cmd::upgrade::Upgrade),
    /// Print the version of this CLI.
    #[structopt(name = "version")]
    Version(cmd::version::Version),
    /// Report whether pg_upgrade is running on a segment host.
    #[structopt(name = "monitor")]
    Monitor(cmd::monitor::Monitor),
    #[structopt(external_subcommand)]
    Other(Vec<String>),
}
