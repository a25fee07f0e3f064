//! Report upgrade progress.

use anyhow::Result;
use structopt::StructOpt;

use crate::error::CliError;
use crate::reporter::Reporter;
use crate::Gpupgrade;
use gpupgrade_core::grpc::cli;

/// Report upgrade progress.
#[derive(StructOpt)]
#[structopt(name = "status")]
pub struct Status {
    #[structopt(subcommand)]
    action: StatusSubcommands,
}

impl Status {
    pub async fn run(&self, base: &Gpupgrade) -> Result<()> {
        match &self.action {
            StatusSubcommands::Upgrade => {
                let mut client = base.get_client().await?;
                let reply = client
                    .status_upgrade(cli::StatusUpgradeRequest {})
                    .await
                    .map_err(CliError::from_status)?
                    .into_inner();
                Reporter::new(std::io::stdout()).upgrade_status(&reply.list_of_upgrade_step_statuses)
            }
        }
    }
}

#[derive(StructOpt)]
enum StatusSubcommands {
    /// Report the status of every upgrade step.
    Upgrade,
}
