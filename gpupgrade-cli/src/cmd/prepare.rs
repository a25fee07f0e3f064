//! Prepare the clusters for upgrade.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use structopt::StructOpt;

use crate::error::CliError;
use crate::reporter::Reporter;
use crate::Gpupgrade;
use gpupgrade_core::grpc::cli;

/// The name of the hub binary, expected next to this CLI or on `$PATH`.
const HUB_BINARY: &str = "gpupgrade_hub";
/// How many times a freshly started hub is pinged before giving up.
const START_HUB_ATTEMPTS: usize = 20;
const START_HUB_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Prepare the clusters for upgrade.
#[derive(StructOpt)]
#[structopt(name = "prepare")]
pub struct Prepare {
    #[structopt(subcommand)]
    action: PrepareSubcommands,
}

impl Prepare {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        match &self.action {
            PrepareSubcommands::StartHub(inner) => inner.run(base).await,
            PrepareSubcommands::InitCluster(inner) => inner.run(base).await,
            PrepareSubcommands::StartAgents(inner) => inner.run(base).await,
            PrepareSubcommands::ShutdownClusters(inner) => inner.run(base).await,
        }
    }
}

#[derive(StructOpt)]
enum PrepareSubcommands {
    /// Start the hub in the background.
    StartHub(StartHub),
    /// Initialize the new cluster.
    InitCluster(InitCluster),
    /// Start the agent on every segment host.
    StartAgents(StartAgents),
    /// Shut down the old and new clusters.
    ShutdownClusters(ShutdownClusters),
}

/// Start the hub in the background.
#[derive(StructOpt)]
pub struct StartHub {}

impl StartHub {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        if hub_answers(base).await {
            bail!("a hub is already running at {}", base.hub_url());
        }

        let hub = hub_binary();
        tracing::debug!(hub = %hub.display(), "starting hub");
        tokio::process::Command::new(&hub)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("error starting {}", hub.display()))?;

        for _ in 0..START_HUB_ATTEMPTS {
            tokio::time::sleep(START_HUB_POLL_INTERVAL).await;
            if hub_answers(base).await {
                return Reporter::new(std::io::stdout()).line(&format!("{} started", HUB_BINARY));
            }
        }
        Err(CliError::HubUnreachable(format!("{} did not answer after being started", HUB_BINARY)).into())
    }
}

/// The hub binary next to the running CLI if present, else the bare name for `$PATH` lookup.
fn hub_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .map(|exe| exe.with_file_name(HUB_BINARY))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(HUB_BINARY))
}

async fn hub_answers(base: &Gpupgrade) -> bool {
    match base.get_client().await {
        Ok(mut client) => client.ping(cli::PingRequest {}).await.is_ok(),
        Err(_) => false,
    }
}

/// Initialize the new cluster.
#[derive(StructOpt)]
pub struct InitCluster {
    /// The bin dir of the new installation.
    #[structopt(long = "new-bindir")]
    new_bindir: String,
}

impl InitCluster {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        client
            .prepare_init_cluster(cli::PrepareInitClusterRequest { new_bin_dir: self.new_bindir.clone() })
            .await
            .map_err(CliError::from_status)?;
        Reporter::new(std::io::stdout()).line("Starting new cluster initialization")
    }
}

/// Start the agent on every segment host.
#[derive(StructOpt)]
pub struct StartAgents {}

impl StartAgents {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        client
            .prepare_start_agents(cli::PrepareStartAgentsRequest {})
            .await
            .map_err(CliError::from_status)?;
        Reporter::new(std::io::stdout()).line("Started agents in background, check status upgrade to confirm")
    }
}

/// Shut down the old and new clusters.
#[derive(StructOpt)]
pub struct ShutdownClusters {
    /// The bin dir of the old installation.
    #[structopt(long = "old-bindir")]
    old_bindir: String,
    /// The bin dir of the new installation.
    #[structopt(long = "new-bindir")]
    new_bindir: String,
}

impl ShutdownClusters {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        client
            .prepare_shutdown_clusters(cli::PrepareShutdownClustersRequest {
                old_bin_dir: self.old_bindir.clone(),
                new_bin_dir: self.new_bindir.clone(),
            })
            .await
            .map_err(CliError::from_status)?;
        Reporter::new(std::io::stdout()).line("request to shutdown clusters sent to hub")
    }
}
