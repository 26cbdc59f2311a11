//! MIDI message types
//!
//! [`MidiMessage`] is the unit that flows through every MIDI container in the
//! engine. The payload is stored inline so that copying a message never
//! allocates, which is what lets storage and merge buffers be filled from the
//! process thread.

use serde::{Deserialize, Serialize};

use crate::error::{MidiError, MidiResult};

/// Largest payload a message can carry inline
///
/// Channel voice messages need at most 3 bytes. The extra room admits short
/// SysEx messages (e.g. universal realtime).
pub const MAX_MIDI_BYTES: usize = 16;

/// Controller number of "All Sound Off"
pub const ALL_SOUND_OFF_CC: u8 = 120;

/// Controller number of "All Notes Off"
pub const ALL_NOTES_OFF_CC: u8 = 123;

/// Time value marking a state-restore message in transferred sequences
pub const STATE_RESTORE_TIME: i64 = -1;

/// A timestamped MIDI message with inline payload
///
/// The meaning of `time` depends on the container: a frame offset within
/// the current cycle for port buffers, a position within the loop for
/// channel storage, or an absolute (wrapping) sample count inside a
/// [`crate::MidiRingbuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    time: u32,
    size: u8,
    data: [u8; MAX_MIDI_BYTES],
}

impl MidiMessage {
    /// Create a message, copying `bytes` inline
    pub fn new(time: u32, bytes: &[u8]) -> MidiResult<Self> {
        if bytes.is_empty() {
            return Err(MidiError::EmptyMessage);
        }
        if bytes.len() > MAX_MIDI_BYTES {
            log::warn!(
                "Rejected {}-byte MIDI message at {} (max {})",
                bytes.len(),
                time,
                MAX_MIDI_BYTES
            );
            return Err(MidiError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_MIDI_BYTES,
            });
        }
        let mut data = [0u8; MAX_MIDI_BYTES];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            time,
            size: bytes.len() as u8,
            data,
        })
    }

    /// Create a three-byte channel message
    #[inline]
    pub fn short(time: u32, status: u8, data1: u8, data2: u8) -> Self {
        let mut data = [0u8; MAX_MIDI_BYTES];
        data[0] = status;
        data[1] = data1;
        data[2] = data2;
        Self {
            time,
            size: 3,
            data,
        }
    }

    #[inline]
    pub fn time(&self) -> u32 {
        self.time
    }

    #[inline]
    pub fn set_time(&mut self, time: u32) {
        self.time = time;
    }

    /// Copy of this message with a different timestamp
    #[inline]
    pub fn with_time(mut self, time: u32) -> Self {
        self.time = time;
        self
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Parse the payload as a channel voice event
    pub fn event(&self) -> Option<MidiEvent> {
        MidiEvent::parse(self.bytes())
    }
}

/// Parsed channel voice message
///
/// Only the message kinds that carry state worth restoring are represented;
/// everything else (system messages, SysEx) parses to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, value: u8 },
    ControlChange { channel: u8, cc: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, value: u8 },
    /// 14-bit value, 0x2000 is centered
    PitchWheel { channel: u8, value: u16 },
}

impl MidiEvent {
    /// Parse raw MIDI bytes
    ///
    /// Status layout: upper nibble is the message type, lower nibble the
    /// channel. Note On with velocity 0 is treated as Note Off.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        let channel = status & 0x0F;

        match status & 0xF0 {
            0x80 if data.len() >= 3 => Some(Self::NoteOff {
                channel,
                note: data[1],
                velocity: data[2],
            }),
            0x90 if data.len() >= 3 => {
                if data[2] == 0 {
                    Some(Self::NoteOff {
                        channel,
                        note: data[1],
                        velocity: 0,
                    })
                } else {
                    Some(Self::NoteOn {
                        channel,
                        note: data[1],
                        velocity: data[2],
                    })
                }
            }
            0xA0 if data.len() >= 3 => Some(Self::PolyPressure {
                channel,
                note: data[1],
                value: data[2],
            }),
            0xB0 if data.len() >= 3 => Some(Self::ControlChange {
                channel,
                cc: data[1],
                value: data[2],
            }),
            0xC0 if data.len() >= 2 => Some(Self::ProgramChange {
                channel,
                program: data[1],
            }),
            0xD0 if data.len() >= 2 => Some(Self::ChannelPressure {
                channel,
                value: data[1],
            }),
            0xE0 if data.len() >= 3 => Some(Self::PitchWheel {
                channel,
                value: (data[1] as u16 & 0x7F) | ((data[2] as u16 & 0x7F) << 7),
            }),
            _ => None,
        }
    }

    /// Encode back to raw bytes
    ///
    /// Returns the byte array and the number of valid bytes in it.
    pub fn encode(&self) -> ([u8; 3], usize) {
        match *self {
            Self::NoteOff {
                channel,
                note,
                velocity,
            } => ([0x80 | channel, note, velocity], 3),
            Self::NoteOn {
                channel,
                note,
                velocity,
            } => ([0x90 | channel, note, velocity], 3),
            Self::PolyPressure {
                channel,
                note,
                value,
            } => ([0xA0 | channel, note, value], 3),
            Self::ControlChange { channel, cc, value } => ([0xB0 | channel, cc, value], 3),
            Self::ProgramChange { channel, program } => ([0xC0 | channel, program, 0], 2),
            Self::ChannelPressure { channel, value } => ([0xD0 | channel, value, 0], 2),
            Self::PitchWheel { channel, value } => (
                [0xE0 | channel, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8],
                3,
            ),
        }
    }

    /// The MIDI channel (0-15)
    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOff { channel, .. }
            | Self::NoteOn { channel, .. }
            | Self::PolyPressure { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::ChannelPressure { channel, .. }
            | Self::PitchWheel { channel, .. } => channel,
        }
    }
}

/// One event of a transferred MIDI sequence
///
/// This is the exchange shape for MIDI channel contents. A `time` of
/// [`STATE_RESTORE_TIME`] (or any negative value) marks a state-restore
/// message that is applied before time zero when playback starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiSequenceEvent {
    pub time: i64,
    pub data: Vec<u8>,
}

impl MidiSequenceEvent {
    pub fn new(time: i64, data: &[u8]) -> Self {
        Self {
            time,
            data: data.to_vec(),
        }
    }

    #[inline]
    pub fn is_state_restore(&self) -> bool {
        self.time < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_stores_bytes_inline() {
        let msg = MidiMessage::new(12, &[0x90, 60, 100]).unwrap();
        assert_eq!(msg.time(), 12);
        assert_eq!(msg.bytes(), &[0x90, 60, 100]);
        assert_eq!(msg.size(), 3);
    }

    #[test]
    fn test_message_rejects_oversized_and_empty() {
        let _ = env_logger::builder().is_test(true).try_init();
        let big = [0xF0u8; MAX_MIDI_BYTES + 1];
        assert_eq!(
            MidiMessage::new(0, &big),
            Err(MidiError::MessageTooLarge {
                size: MAX_MIDI_BYTES + 1,
                max: MAX_MIDI_BYTES
            })
        );
        assert_eq!(MidiMessage::new(0, &[]), Err(MidiError::EmptyMessage));
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        assert_eq!(
            MidiEvent::parse(&[0x93, 64, 0]),
            Some(MidiEvent::NoteOff {
                channel: 3,
                note: 64,
                velocity: 0
            })
        );
    }

    #[test]
    fn test_parse_encode_pitch_wheel() {
        let ev = MidiEvent::parse(&[0xE1, 0x7F, 0x40]).unwrap();
        assert_eq!(
            ev,
            MidiEvent::PitchWheel {
                channel: 1,
                value: 0x207F
            }
        );
        assert_eq!(ev.encode(), ([0xE1, 0x7F, 0x40], 3));
    }

    #[test]
    fn test_parse_ignores_system_and_truncated() {
        assert_eq!(MidiEvent::parse(&[0xF8]), None);
        assert_eq!(MidiEvent::parse(&[0x90, 60]), None);
        assert_eq!(MidiEvent::parse(&[]), None);
    }
}
