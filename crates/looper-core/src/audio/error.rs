//! Driver error types

use thiserror::Error;

/// Errors that can occur while starting or talking to an audio/MIDI driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Driver kind is not compiled in or not supported on this platform
    #[error("Driver not available: {0}")]
    Unavailable(String),

    /// Failed to connect to the audio server
    #[error("Failed to start driver: {0}")]
    StartFailed(String),

    /// Failed to register or unregister a port
    #[error("Port error: {0}")]
    PortError(String),

    /// Driver was used before `start()`
    #[error("Driver is not started")]
    NotStarted,
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
