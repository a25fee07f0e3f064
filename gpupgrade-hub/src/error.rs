//! Hub error abstractions.

use tonic::{Code, Status};

pub use gpupgrade_core::AppError;

/// An extension trait for the gpupgrade core `AppError`.
pub trait AppErrorExt {
    /// Get the gRPC status for this error.
    fn into_status(self) -> Status;

    /// Translate the given error as an app error and map into a gRPC status object.
    fn grpc(err: anyhow::Error) -> Status;
}

impl AppErrorExt for AppError {
    /// Get the gRPC status for this error.
    ///
    /// A `Connection` error raised by the hub always concerns a downstream database, agent or
    /// host. It is never `Unavailable`, which callers read as the hub itself being unreachable.
    fn into_status(self) -> Status {
        match self {
            AppError::Connection { .. } => Status::failed_precondition(self.to_string()),
            AppError::InvalidTransition { .. } => Status::failed_precondition(self.to_string()),
            AppError::UnknownStep(_) | AppError::InvalidInput(_) => Status::invalid_argument(self.to_string()),
            AppError::ResourceNotFound(_) => Status::not_found(self.to_string()),
            AppError::VersionParse(_) | AppError::ShutdownFailure { .. } | AppError::Filesystem { .. } => Status::internal(self.to_string()),
            AppError::Ise(err) => Status::internal(format!("internal server error: {:#}", err)),
        }
    }

    /// Translate the given error as an app error and map into a gRPC status object.
    fn grpc(err: anyhow::Error) -> Status {
        // A status here was returned by an agent, so it is relayed under the hub's own context.
        if let Some(status) = err.downcast_ref::<Status>() {
            let code = match status.code() {
                Code::Unavailable => Code::FailedPrecondition,
                code => code,
            };
            return Status::new(code, format!("{:#}", err));
        }
        err.downcast::<Self>()
            .map(Self::into_status)
            .unwrap_or_else(|err| Self::Ise(err).into_status())
    }
}

/// The error type used to indicate that a system shutdown is required.
#[derive(Debug, thiserror::Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// A result type where the error is a `ShutdownError`.
pub type ShutdownResult<T> = ::std::result::Result<T, ShutdownError>;

/// A result type used with the gRPC system.
pub type RpcResult<T> = ::std::result::Result<T, tonic::Status>;
