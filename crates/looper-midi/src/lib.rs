//! MIDI data plumbing for the looper engine
//!
//! This crate provides the allocation-free MIDI building blocks used by the
//! real-time core:
//! - [`MidiMessage`]: a timestamped message with inline payload storage
//! - [`MidiStateTracker`]: running note/controller state and catch-up messages
//! - [`MidiMergeBuffer`]: two-phase fan-in buffer (write in any order, sort, read)
//! - [`MidiStorage`]: bounded, time-ordered event storage with a play cursor
//! - [`MidiRingbuffer`]: always-on capture ring with wrap-safe time stamps
//!
//! # Architecture
//!
//! ```text
//! input port ──► MidiRingbuffer ──(adopt)──► MidiStorage ──► MidiMergeBuffer ──► output port
//!      │                                         ▲                 ▲
//!      └──────────► MidiStateTracker ────────────┴── catch-up ─────┘
//! ```
//!
//! Everything here is sized at construction. Operations that would need to
//! grow a container on the process thread fail with a [`MidiError`] instead.

mod error;
mod merge;
mod message;
mod ringbuffer;
mod state;
mod storage;

pub use error::{MidiError, MidiResult};
pub use merge::MidiMergeBuffer;
pub use message::{
    MidiEvent, MidiMessage, MidiSequenceEvent, ALL_NOTES_OFF_CC, ALL_SOUND_OFF_CC,
    MAX_MIDI_BYTES, STATE_RESTORE_TIME,
};
pub use ringbuffer::MidiRingbuffer;
pub use state::MidiStateTracker;
pub use storage::{MidiStorage, MidiStorageCursor};
