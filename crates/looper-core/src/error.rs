//! Engine error types
//!
//! Errors raised on the process thread are never returned to a control
//! thread directly: the graph step or command that failed is logged and the
//! cycle continues. Control-facing calls (session API, command queue)
//! return them to the caller.

use looper_midi::MidiError;
use thiserror::Error;

use crate::audio::DriverError;

/// Errors that can occur in the looper engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LooperError {
    /// Access outside of stored data or a buffer
    #[error("{what} out of bounds (position {position}, length {length})")]
    OutOfBounds {
        what: &'static str,
        position: i64,
        length: usize,
    },

    /// A copy was requested without a source or target buffer
    #[error("Missing buffer: {0}")]
    MissingBuffer(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A handle refers to an object that was destroyed
    #[error("{0} handle is expired")]
    Expired(&'static str),

    /// The process thread did not complete a command in time
    #[error("Timed out waiting for the process thread")]
    Timeout,

    /// The command queue stayed full for the whole timeout
    #[error("Command queue is full")]
    QueueFull,

    /// Scheduling bug (zero-length or over-long chunk, runaway POI loop)
    #[error("Internal scheduling error: {0}")]
    Internal(&'static str),

    /// A helper thread could not be started
    #[error("Failed to start the {0} thread")]
    Spawn(&'static str),

    /// The processing graph cannot be ordered
    #[error("Processing graph contains a cycle involving {0}")]
    GraphCycle(String),

    #[error(transparent)]
    Midi(#[from] MidiError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Result type for engine operations
pub type LooperResult<T> = Result<T, LooperError>;
