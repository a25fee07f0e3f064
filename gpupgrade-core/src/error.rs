//! gpupgrade error abstractions.

use thiserror::Error;

use crate::steps::{StepStatus, UpgradeStep};

/// Application error variants.
#[derive(Debug, Error)]
pub enum AppError {
    /// A hub, database or remote host could not be reached.
    #[error("error connecting to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: anyhow::Error,
    },
    /// A checklist transition was attempted from an illegal source status.
    #[error("invalid transition for step {step:?}: cannot move from {from} to {to}")]
    InvalidTransition { step: UpgradeStep, from: StepStatus, to: StepStatus },
    /// The given step is not tracked by the checklist.
    #[error("the step {0:?} is not tracked by the upgrade checklist")]
    UnknownStep(UpgradeStep),
    /// A version string did not match the expected pattern.
    #[error("could not determine database version from {0:?}")]
    VersionParse(String),
    /// A cluster's stop command returned a non-zero outcome.
    #[error("error shutting down the {label} cluster: {source}")]
    ShutdownFailure {
        label: String,
        #[source]
        source: anyhow::Error,
    },
    /// A marker or state file operation failed.
    #[error("filesystem error on {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The requested resource is not found.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// The server has hit an internal error, but will remain online.
    #[error("internal server error")]
    Ise(anyhow::Error),
}

impl AppError {
    /// Build a connection error for the given target.
    pub fn connection(target: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Connection { target: target.into(), source: source.into() }
    }

    /// Build a filesystem error for the given path.
    pub fn filesystem(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Filesystem { path: path.as_ref().display().to_string(), source }
    }
}
