use thiserror::Error;

/// Errors surfaced by the console transport seam.
///
/// The transport performs no retries; every failure is immediate and local,
/// and callers decide whether to propagate or log.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver has not finished connecting yet.
    #[error("console not connected")]
    NotConnected,
    /// The target device is unknown or has already left.
    #[error("no such device: {0}")]
    UnknownDevice(u32),
    /// The delivery channel for the target device is gone.
    #[error("delivery channel closed for device {0}")]
    ChannelClosed(u32),
    /// A payload could not be serialized for the wire.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The underlying console transport failed.
    #[error("console driver error")]
    Driver(#[from] DriverError),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InvalidInput(format!("malformed payload: {err}"))
    }
}
