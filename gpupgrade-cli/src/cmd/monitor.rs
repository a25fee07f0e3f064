//! Report whether pg_upgrade is running on a segment host.

use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use crate::error::CliError;
use crate::monitor::{self, MonitorTarget, RusshConnector};
use crate::{home_dir, Gpupgrade};
use gpupgrade_core::cluster::{SegmentConfigs, OLD_CLUSTER_CONFIG_FILE};

/// The ssh user used when neither `--user` nor `$USER` is set.
const FALLBACK_USER: &str = "gpadmin";

/// Report whether pg_upgrade is running on a segment host.
#[derive(StructOpt)]
#[structopt(name = "monitor")]
pub struct Monitor {
    /// The host on which the segment lives.
    #[structopt(long)]
    host: Option<String>,
    /// The content id of the segment to observe.
    #[structopt(long)]
    segment_id: Option<i32>,
    /// The ssh port of the host.
    #[structopt(long, default_value = "22")]
    port: u16,
    /// The ssh user, defaulting to the current user.
    #[structopt(long)]
    user: Option<String>,
    /// The private key used to authenticate, defaulting to `~/.ssh/id_rsa`.
    #[structopt(long, alias = "private_key", parse(from_os_str))]
    private_key: Option<PathBuf>,
}

impl Monitor {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let (host, segment_id) = match (&self.host, self.segment_id) {
            (Some(host), Some(segment_id)) => (host.clone(), segment_id),
            _ => return Err(CliError::MissingMonitorFlags.into()),
        };
        let key_path = match &self.private_key {
            Some(path) => path.clone(),
            None => monitor::default_private_key(&home_dir()?),
        };
        let connector = RusshConnector::from_key_file(&key_path)?;

        let config_path = base.state_dir()?.join(OLD_CLUSTER_CONFIG_FILE);
        let configs = SegmentConfigs::load(&config_path)
            .await
            .with_context(|| format!("error reading cluster configuration {}", config_path.display()))?;

        let target = MonitorTarget { host, port: self.port, user: self.user(), segment_id };
        monitor::monitor(&connector, &target, &configs, &mut std::io::stdout()).await?;
        Ok(())
    }

    fn user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok().filter(|user| !user.is_empty()))
            .unwrap_or_else(|| FALLBACK_USER.into())
    }
}
