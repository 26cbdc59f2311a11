//! Loop mode x channel mode -> per-cycle process flags
//!
//! A channel has no transport of its own. Each cycle it looks at the mode
//! of its loop, its own channel mode and the loop's next planned
//! transition, and derives what to do with the samples of that cycle.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::types::{ChannelMode, LoopMode};

/// What a channel does with the samples of one processing chunk
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessFlags(u8);

impl ProcessFlags {
    pub const NONE: Self = Self(0);
    /// Mix stored data into the output
    pub const PLAYBACK: Self = Self(1);
    /// Append input to the stored data
    pub const RECORD: Self = Self(1 << 1);
    /// Overwrite stored data at the play position
    pub const REPLACE: Self = Self(1 << 2);
    /// Capture input into a scratch store ahead of a planned recording
    pub const PRERECORD: Self = Self(1 << 3);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag of `other` is set
    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for ProcessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProcessFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Debug for ProcessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::PLAYBACK, "PLAYBACK"),
            (Self::RECORD, "RECORD"),
            (Self::REPLACE, "REPLACE"),
            (Self::PRERECORD, "PRERECORD"),
        ];
        let mut list = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                list.entry(&format_args!("{}", name));
            }
        }
        list.finish()
    }
}

/// Flags a channel in `channel_mode` gets while its loop is in `loop_mode`
pub fn channel_process_flags(loop_mode: LoopMode, channel_mode: ChannelMode) -> ProcessFlags {
    use ChannelMode as C;
    use LoopMode as L;

    match (channel_mode, loop_mode) {
        (C::Disabled, _) => ProcessFlags::NONE,

        // The wet signal already carries a plain playback
        (C::Dry, L::Playing) => ProcessFlags::NONE,
        // Feed the effect chain with the dry recording
        (C::Dry, L::PlayingDryThroughWet | L::RecordingDryIntoWet) => ProcessFlags::PLAYBACK,

        // The live effect output is the signal
        (C::Wet, L::PlayingDryThroughWet) => ProcessFlags::NONE,
        (C::Wet | C::Direct, L::RecordingDryIntoWet) => ProcessFlags::REPLACE,
        (C::Direct, L::PlayingDryThroughWet) => ProcessFlags::PLAYBACK,

        (_, L::Playing) => ProcessFlags::PLAYBACK,
        (_, L::Recording) => ProcessFlags::RECORD,
        (_, L::Replacing) => ProcessFlags::REPLACE,
        (_, L::Stopped | L::Unknown) => ProcessFlags::NONE,
    }
}

/// Loop-side view of the next planned transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlannedTransition {
    pub mode: Option<LoopMode>,
    /// Sync triggers to wait before the transition fires
    pub delay: Option<u32>,
    /// Samples until the next trigger
    pub eta: Option<u32>,
}

impl PlannedTransition {
    /// Next mode if it fires on the very next trigger with a known ETA
    #[inline]
    fn imminent(&self) -> Option<(LoopMode, u32)> {
        match (self.mode, self.delay, self.eta) {
            (Some(mode), Some(0), Some(eta)) => Some((mode, eta)),
            _ => None,
        }
    }
}

/// Outcome of [`channel_process_params`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessParams {
    pub flags: ProcessFlags,
    /// Position in the channel's data; negative while pre-playing far ahead
    pub position: i64,
}

/// Derive the flags and data position for one chunk
///
/// `position` is the loop position; the channel's `start_offset` maps it
/// onto the stored data. A stopped channel about to start playback pre-plays
/// from `start_offset - eta`; a channel about to start recording pre-records.
pub fn channel_process_params(
    loop_mode: LoopMode,
    next: &PlannedTransition,
    position: usize,
    start_offset: i64,
    channel_mode: ChannelMode,
) -> ProcessParams {
    let mut params = ProcessParams {
        flags: channel_process_flags(loop_mode, channel_mode),
        position: position as i64 + start_offset,
    };

    if let Some((next_mode, eta)) = next.imminent() {
        let next_flags = channel_process_flags(next_mode, channel_mode);
        if params.flags.is_empty() && next_flags.contains(ProcessFlags::PLAYBACK) {
            params.position = start_offset - eta as i64;
            params.flags.insert(ProcessFlags::PLAYBACK);
        } else if !params.flags.contains(ProcessFlags::RECORD)
            && next_flags.contains(ProcessFlags::RECORD)
        {
            params.flags.insert(ProcessFlags::PRERECORD);
        }
    }
    params
}
