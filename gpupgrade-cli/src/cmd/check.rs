//! Check the old cluster's readiness for upgrade.

use anyhow::Result;
use structopt::StructOpt;

use crate::error::CliError;
use crate::reporter::Reporter;
use crate::Gpupgrade;
use gpupgrade_core::grpc::cli;

/// Check the old cluster's readiness for upgrade.
#[derive(StructOpt)]
#[structopt(name = "check")]
pub struct Check {
    #[structopt(subcommand)]
    action: CheckSubcommands,
}

impl Check {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        match &self.action {
            CheckSubcommands::Config(inner) => inner.run(base).await,
            CheckSubcommands::Seginstall(inner) => inner.run(base).await,
            CheckSubcommands::ObjectCount(inner) => inner.run(base).await,
            CheckSubcommands::Version(inner) => inner.run(base).await,
            CheckSubcommands::DiskSpace(inner) => inner.run(base).await,
        }
    }
}

#[derive(StructOpt)]
enum CheckSubcommands {
    /// Save the old cluster's configuration for use by later steps.
    Config(Config),
    /// Verify the upgrade binaries are installed on every segment host.
    Seginstall(Seginstall),
    /// Count append-optimized and heap tables per database.
    ObjectCount(ObjectCount),
    /// Verify the old cluster's version can be upgraded.
    Version(Version),
    /// Report filesystem usage on every segment host.
    DiskSpace(DiskSpace),
}

/// Save the old cluster's configuration for use by later steps.
#[derive(StructOpt)]
pub struct Config {
    /// The port of the old cluster's master.
    #[structopt(long, default_value = "15432")]
    master_port: i32,
}

impl Config {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        let reply = client
            .check_config(cli::CheckConfigRequest { db_port: self.master_port })
            .await
            .map_err(CliError::from_status)?
            .into_inner();
        tracing::debug!(status = %reply.config_status, "configuration check finished");
        Reporter::new(std::io::stdout()).line("Check config request is processed.")
    }
}

/// Verify the upgrade binaries are installed on every segment host.
#[derive(StructOpt)]
pub struct Seginstall {}

impl Seginstall {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        client
            .check_seginstall(cli::CheckSeginstallRequest {})
            .await
            .map_err(CliError::from_status)?;
        Reporter::new(std::io::stdout()).line("Check seginstall request is processed.")
    }
}

/// Count append-optimized and heap tables per database.
#[derive(StructOpt)]
pub struct ObjectCount {
    /// The port of the old cluster's master.
    #[structopt(long, default_value = "15432")]
    master_port: i32,
}

impl ObjectCount {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        let reply = client
            .check_object_count(cli::CheckObjectCountRequest { db_port: self.master_port })
            .await
            .map_err(CliError::from_status)?
            .into_inner();
        let mut reporter = Reporter::new(std::io::stdout());
        reporter.object_counts(&reply.list_of_counts)?;
        reporter.line("Check object count request is processed.")
    }
}

/// Verify the old cluster's version can be upgraded.
#[derive(StructOpt)]
pub struct Version {
    /// The host of the old cluster's master.
    #[structopt(long, default_value = "localhost")]
    master_host: String,
    /// The port of the old cluster's master.
    #[structopt(long, default_value = "15432")]
    master_port: i32,
}

impl Version {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        let reply = client
            .check_version(cli::CheckVersionRequest { db_port: self.master_port, host: self.master_host.clone() })
            .await
            .map_err(CliError::from_status)?
            .into_inner();
        let verdict = if reply.is_version_compatible { "OK" } else { "Failed" };
        Reporter::new(std::io::stdout()).line(&format!("gpupgrade: Version Compatibility Check [{}]", verdict))
    }
}

/// Report filesystem usage on every segment host.
#[derive(StructOpt)]
pub struct DiskSpace {}

impl DiskSpace {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        let reply = client
            .check_disk_usage(cli::CheckDiskUsageRequest {})
            .await
            .map_err(CliError::from_status)?
            .into_inner();
        let mut reporter = Reporter::new(std::io::stdout());
        reporter.lines(&reply.segment_file_sys_usage)?;
        reporter.line("Check disk space request is processed.")
    }
}
