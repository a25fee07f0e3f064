//! Upgrade steps and their statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grpc::cli;

/// A phase of the upgrade.
///
/// Steps are conceptually ordered, but each step's status is tracked independently. Enforcing
/// the overall order is left to whoever issues the commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpgradeStep {
    UnknownStep,
    CheckConfig,
    SegInstall,
    PrepareInitCluster,
    PrepareStartAgents,
    MasterUpgrade,
    StoppedCluster,
}

impl UpgradeStep {
    /// All steps tracked by the upgrade checklist, in report order.
    pub const TRACKED: [UpgradeStep; 6] = [
        UpgradeStep::CheckConfig,
        UpgradeStep::SegInstall,
        UpgradeStep::PrepareInitCluster,
        UpgradeStep::PrepareStartAgents,
        UpgradeStep::MasterUpgrade,
        UpgradeStep::StoppedCluster,
    ];

    /// The checklist description of this step, as rendered in status reports.
    pub fn description(&self) -> &'static str {
        match self {
            UpgradeStep::UnknownStep => "- Unknown step",
            UpgradeStep::CheckConfig => "- Configuration Check",
            UpgradeStep::SegInstall => "- Install binaries on segments",
            UpgradeStep::PrepareInitCluster => "- Initialize upgrade target cluster",
            UpgradeStep::PrepareStartAgents => "- Agents Started on Cluster",
            UpgradeStep::MasterUpgrade => "- Run pg_upgrade on master",
            UpgradeStep::StoppedCluster => "- Shutdown clusters",
        }
    }
}

impl From<UpgradeStep> for cli::UpgradeSteps {
    fn from(step: UpgradeStep) -> Self {
        match step {
            UpgradeStep::UnknownStep => cli::UpgradeSteps::UnknownStep,
            UpgradeStep::CheckConfig => cli::UpgradeSteps::CheckConfig,
            UpgradeStep::SegInstall => cli::UpgradeSteps::SegInstall,
            UpgradeStep::PrepareInitCluster => cli::UpgradeSteps::PrepareInitCluster,
            UpgradeStep::PrepareStartAgents => cli::UpgradeSteps::PrepareStartAgents,
            UpgradeStep::MasterUpgrade => cli::UpgradeSteps::MasterUpgrade,
            UpgradeStep::StoppedCluster => cli::UpgradeSteps::StoppedCluster,
        }
    }
}

impl From<cli::UpgradeSteps> for UpgradeStep {
    fn from(step: cli::UpgradeSteps) -> Self {
        match step {
            cli::UpgradeSteps::UnknownStep => UpgradeStep::UnknownStep,
            cli::UpgradeSteps::CheckConfig => UpgradeStep::CheckConfig,
            cli::UpgradeSteps::SegInstall => UpgradeStep::SegInstall,
            cli::UpgradeSteps::PrepareInitCluster => UpgradeStep::PrepareInitCluster,
            cli::UpgradeSteps::PrepareStartAgents => UpgradeStep::PrepareStartAgents,
            cli::UpgradeSteps::MasterUpgrade => UpgradeStep::MasterUpgrade,
            cli::UpgradeSteps::StoppedCluster => UpgradeStep::StoppedCluster,
        }
    }
}

/// The status of a single upgrade step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Unknown,
    Pending,
    Running,
    Complete,
    Failed,
}

impl StepStatus {
    /// Returns true if no further transition may leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            StepStatus::Unknown => "UNKNOWN_STATUS",
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Complete => "COMPLETE",
            StepStatus::Failed => "FAILED",
        };
        f.write_str(val)
    }
}

impl From<StepStatus> for cli::StepStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Unknown => cli::StepStatus::UnknownStatus,
            StepStatus::Pending => cli::StepStatus::Pending,
            StepStatus::Running => cli::StepStatus::Running,
            StepStatus::Complete => cli::StepStatus::Complete,
            StepStatus::Failed => cli::StepStatus::Failed,
        }
    }
}

impl From<cli::StepStatus> for StepStatus {
    fn from(status: cli::StepStatus) -> Self {
        match status {
            cli::StepStatus::UnknownStatus => StepStatus::Unknown,
            cli::StepStatus::Pending => StepStatus::Pending,
            cli::StepStatus::Running => StepStatus::Running,
            cli::StepStatus::Complete => StepStatus::Complete,
            cli::StepStatus::Failed => StepStatus::Failed,
        }
    }
}

impl cli::UpgradeStepStatus {
    /// Build a wire status entry from its domain values.
    pub fn from_domain(step: UpgradeStep, status: StepStatus) -> Self {
        let mut val = Self::default();
        val.set_step(step.into());
        val.set_status(status.into());
        val
    }

    /// Render this entry as a checklist report line, e.g. `PENDING - Install binaries on segments`.
    pub fn report_line(&self) -> String {
        let step = UpgradeStep::from(self.step());
        let status = StepStatus::from(self.status());
        format!("{} {}", status, step.description())
    }
}
