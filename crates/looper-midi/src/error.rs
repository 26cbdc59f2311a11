//! MIDI error types

use thiserror::Error;

/// Errors raised by the MIDI containers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MidiError {
    /// Message does not fit the inline payload
    #[error("MIDI message of {size} bytes exceeds the inline limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Empty messages carry no status byte
    #[error("Empty MIDI message")]
    EmptyMessage,

    /// Storage reached its fixed capacity
    #[error("MIDI storage is full ({0} events)")]
    StorageFull(usize),

    /// Appended event is older than the last stored one
    #[error("MIDI event at {time} is earlier than the last stored event at {last}")]
    OutOfOrder { time: u32, last: u32 },

    /// Merge buffer pool reached its fixed capacity
    #[error("MIDI merge buffer is full ({0} events)")]
    MergeBufferFull(usize),

    /// Merge buffer was read before `sort()`
    #[error("MIDI merge buffer read before it was sorted")]
    NotSorted,
}

/// Result type for MIDI operations
pub type MidiResult<T> = Result<T, MidiError>;
