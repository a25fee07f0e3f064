//! Runtime configuration.

use std::path::PathBuf;
#[cfg(test)]
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use gpupgrade_core::{DEFAULT_CLI_TO_HUB_PORT, DEFAULT_HUB_TO_AGENT_PORT};

/// The name of the directory, relative to `$HOME`, holding hub state by default.
pub const DEFAULT_STATE_DIR_NAME: &str = ".gp_upgrade";
/// The default deadline applied to each individual agent call.
const DEFAULT_AGENT_TIMEOUT_SECONDS: u64 = 30;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,
    /// The port on which the hub serves CLI traffic.
    #[serde(default = "Config::default_cli_to_hub_port")]
    pub cli_to_hub_port: u16,
    /// The port on which agents serve hub traffic.
    #[serde(default = "Config::default_hub_to_agent_port")]
    pub hub_to_agent_port: u16,

    /// The directory holding saved cluster configs, the checklist and shutdown markers.
    ///
    /// Defaults to `$HOME/.gp_upgrade`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// The deadline in seconds applied to each individual agent call.
    #[serde(default = "Config::default_agent_timeout_seconds")]
    pub agent_timeout_seconds: u64,
    /// The installation root of the old cluster, used to locate the agent binary on segment hosts.
    #[serde(default)]
    pub gphome: Option<PathBuf>,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let mut config: Config = envy::from_env().context("error building config from env")?;
        if config.state_dir.is_none() {
            let home = std::env::var("HOME").context("STATE_DIR is not set and HOME is not available")?;
            config.state_dir = Some(PathBuf::from(home).join(DEFAULT_STATE_DIR_NAME));
        }
        Ok(config)
    }

    /// The directory holding all hub state.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR_NAME))
    }

    /// The deadline applied to each individual agent call.
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_seconds)
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_cli_to_hub_port() -> u16 {
        DEFAULT_CLI_TO_HUB_PORT
    }

    fn default_hub_to_agent_port() -> u16 {
        DEFAULT_HUB_TO_AGENT_PORT
    }

    fn default_agent_timeout_seconds() -> u64 {
        DEFAULT_AGENT_TIMEOUT_SECONDS
    }

    /// Build a config for tests, rooted in a fresh temporary state directory.
    #[cfg(test)]
    pub fn new_test() -> Result<(Arc<Self>, tempfile::TempDir)> {
        let tmpdir = tempfile::tempdir_in("/tmp").context("error creating tmp dir in /tmp")?;
        Ok((
            Arc::new(Self {
                rust_log: "error".into(),
                cli_to_hub_port: DEFAULT_CLI_TO_HUB_PORT,
                hub_to_agent_port: DEFAULT_HUB_TO_AGENT_PORT,
                state_dir: Some(tmpdir.path().to_path_buf()),
                agent_timeout_seconds: 2,
                gphome: None,
            }),
            tmpdir,
        ))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
