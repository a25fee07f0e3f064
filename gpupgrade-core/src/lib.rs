pub mod cluster;
pub mod error;
pub mod grpc;
pub mod steps;
pub mod version;

pub use error::AppError;
pub use steps::{StepStatus, UpgradeStep};

/// The default port on which the hub listens for CLI traffic.
pub const DEFAULT_CLI_TO_HUB_PORT: u16 = 7527;
/// The default port on which agents listen for hub traffic.
pub const DEFAULT_HUB_TO_AGENT_PORT: u16 = 6416;
/// The name of the database upgrade binary observed and invoked by gpupgrade.
pub const PG_UPGRADE_BINARY: &str = "pg_upgrade";
