//! Loops, channels and the chunked scheduler that drives them
//!
//! - [`transport`]: mode, position, length, planned transitions
//! - [`audio_channel`] / [`midi_channel`]: per-track record/playback state
//! - [`looper`]: a transport with its channels, ringbuffer adoption
//! - [`scheduler`]: point-of-interest chunking over sync-coupled loops

pub mod audio_channel;
pub mod looper;
pub mod midi_channel;
pub mod mode;
pub mod poi;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod transport;

pub use audio_channel::{AudioChannel, StoreTarget};
pub use looper::{AdoptRequest, CaptureRings, ChannelKind, Loop, LoopChannel};
pub use midi_channel::MidiChannel;
pub use mode::{channel_process_flags, ProcessFlags};
pub use scheduler::LoopScheduler;
pub use status::{ChannelSnapshot, ChannelStatus};
pub use transport::{LoopSnapshot, LoopStatus, SyncView};
