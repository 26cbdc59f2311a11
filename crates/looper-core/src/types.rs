//! Core types shared across the engine

use serde::{Deserialize, Serialize};

/// Audio sample type used throughout the engine
pub type Sample = f32;

/// Maximum frames per process cycle; port buffers are pre-allocated to this
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Transport mode of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoopMode {
    /// Sentinel for "no mode", e.g. no planned transition
    #[default]
    Unknown,
    Stopped,
    Playing,
    Recording,
    Replacing,
    /// Dry channels play into the effect chain, wet channels pass through
    PlayingDryThroughWet,
    /// Dry channels play into the effect chain, wet channels re-record its output
    RecordingDryIntoWet,
}

impl LoopMode {
    /// Modes in which the transport position advances
    #[inline]
    pub fn is_playing(self) -> bool {
        matches!(
            self,
            Self::Playing | Self::Replacing | Self::PlayingDryThroughWet | Self::RecordingDryIntoWet
        )
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Stopped,
            2 => Self::Playing,
            3 => Self::Recording,
            4 => Self::Replacing,
            5 => Self::PlayingDryThroughWet,
            6 => Self::RecordingDryIntoWet,
            _ => Self::Unknown,
        }
    }
}

/// How a channel participates in its loop's mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelMode {
    #[default]
    Disabled,
    /// Follows the loop mode one-to-one
    Direct,
    /// Carries the unprocessed signal, feeds effect chains
    Dry,
    /// Carries the effect-processed signal
    Wet,
}

impl ChannelMode {
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Direct,
            2 => Self::Dry,
            3 => Self::Wet,
            _ => Self::Disabled,
        }
    }
}

/// Direction of a port as seen from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Data enters the engine (driver capture, effect chain output)
    Input,
    /// Data leaves the engine (driver playback, effect chain input)
    Output,
}

/// Data type carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDataType {
    Audio,
    Midi,
}
