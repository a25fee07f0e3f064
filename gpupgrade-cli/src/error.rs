//! CLI error abstractions.

use std::path::PathBuf;

use thiserror::Error;
use tonic::{Code, Status};

/// The message printed when no known command is given.
pub const USAGE: &str = "Please specify one command of: prepare, check, status or version";

/// CLI error variants with user-facing messages.
#[derive(Debug, Error)]
pub enum CliError {
    /// No command, or an unknown one, was given.
    #[error("{}", USAGE)]
    Usage,
    /// The monitor command was invoked without its target.
    #[error("the required flags `--host' and `--segment-id' were not specified")]
    MissingMonitorFlags,
    /// The hub could not be reached at all.
    #[error("Unable to connect to hub: {0}")]
    HubUnreachable(String),
    /// The hub was reached and reported a failure of the requested operation.
    #[error("hub reported failure: {0}")]
    HubFailure(String),
    /// An explicitly given private key could not be loaded.
    #[error("unable to load private key {}: {source}", path.display())]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// A remote host could not be reached over ssh.
    #[error("error connecting to {host}:{port} over ssh: {source}")]
    SshConnection {
        host: String,
        port: u16,
        #[source]
        source: anyhow::Error,
    },
}

impl CliError {
    /// Classify a gRPC status returned by the hub.
    ///
    /// `Unavailable` comes only from the transport, meaning the call never reached a running hub;
    /// the hub reports its own downstream outages under other codes. Everything else is a
    /// failure the hub itself reported.
    pub fn from_status(status: Status) -> Self {
        match status.code() {
            Code::Unavailable => Self::HubUnreachable(status.message().to_string()),
            _ => Self::HubFailure(status.message().to_string()),
        }
    }
}
