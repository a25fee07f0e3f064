//! Upgrade the master and primary segments.

use anyhow::Result;
use structopt::StructOpt;

use crate::error::CliError;
use crate::reporter::Reporter;
use crate::Gpupgrade;
use gpupgrade_core::grpc::cli;

/// Upgrade the master and primary segments.
#[derive(StructOpt)]
#[structopt(name = "upgrade")]
pub struct Upgrade {
    #[structopt(subcommand)]
    action: UpgradeSubcommands,
}

impl Upgrade {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        match &self.action {
            UpgradeSubcommands::ConvertMaster(inner) => inner.run(base).await,
            UpgradeSubcommands::ConvertPrimaries(inner) => inner.run(base).await,
        }
    }
}

#[derive(StructOpt)]
enum UpgradeSubcommands {
    /// Start pg_upgrade on the master in the background.
    ConvertMaster(ConvertMaster),
    /// Upgrade every primary segment through its host's agent.
    ConvertPrimaries(ConvertPrimaries),
}

/// Start pg_upgrade on the master in the background.
#[derive(StructOpt)]
pub struct ConvertMaster {
    /// The bin dir of the old installation.
    #[structopt(long = "old-bindir")]
    old_bindir: String,
    /// The bin dir of the new installation.
    #[structopt(long = "new-bindir")]
    new_bindir: String,
    /// The data dir of the old master.
    #[structopt(long = "old-datadir")]
    old_datadir: String,
    /// The data dir of the new master.
    #[structopt(long = "new-datadir")]
    new_datadir: String,
}

impl ConvertMaster {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        client
            .upgrade_convert_master(cli::UpgradeConvertMasterRequest {
                old_bin_dir: self.old_bindir.clone(),
                new_bin_dir: self.new_bindir.clone(),
                old_data_dir: self.old_datadir.clone(),
                new_data_dir: self.new_datadir.clone(),
            })
            .await
            .map_err(CliError::from_status)?;
        Reporter::new(std::io::stdout()).line("Kicked off pg_upgrade request.")
    }
}

/// Upgrade every primary segment through its host's agent.
#[derive(StructOpt)]
pub struct ConvertPrimaries {
    /// The bin dir of the old installation.
    #[structopt(long = "old-bindir")]
    old_bindir: String,
    /// The bin dir of the new installation.
    #[structopt(long = "new-bindir")]
    new_bindir: String,
}

impl ConvertPrimaries {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        let mut client = base.get_client().await?;
        client
            .upgrade_convert_primaries(cli::UpgradeConvertPrimariesRequest {
                old_bin_dir: self.old_bindir.clone(),
                new_bin_dir: self.new_bindir.clone(),
            })
            .await
            .map_err(CliError::from_status)?;
        Reporter::new(std::io::stdout()).line("Primary segments upgraded.")
    }
}
