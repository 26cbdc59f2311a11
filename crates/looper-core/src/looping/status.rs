//! Channel state published to control threads
//!
//! The process thread owns every channel. Control threads read its state
//! from these relaxed atomics, refreshed after each cycle and after each
//! command that touches the channel.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::types::ChannelMode;

#[derive(Debug, Default)]
pub struct ChannelStatus {
    mode: AtomicU8,
    length: AtomicUsize,
    start_offset: AtomicI64,
    pre_play_samples: AtomicUsize,
    /// -1 when not playing
    played_back_sample: AtomicI64,
    data_seq_nr: AtomicU64,
    gain_bits: AtomicU32,
    output_peak_bits: AtomicU32,
    n_events_triggered: AtomicU32,
    n_notes_active: AtomicU32,
}

/// Point-in-time copy of a [`ChannelStatus`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub mode: ChannelMode,
    pub length: usize,
    pub start_offset: i64,
    pub pre_play_samples: usize,
    pub played_back_sample: Option<usize>,
    pub data_seq_nr: u64,
    /// Audio only; 1.0 for MIDI
    pub gain: f32,
    /// Audio only
    pub output_peak: f32,
    /// MIDI only
    pub n_events_triggered: u32,
    /// MIDI only
    pub n_notes_active: u32,
}

/// Values a channel publishes
#[derive(Debug, Clone, Copy)]
pub(crate) struct Published {
    pub mode: ChannelMode,
    pub length: usize,
    pub start_offset: i64,
    pub pre_play_samples: usize,
    pub played_back_sample: Option<usize>,
    pub data_seq_nr: u64,
    pub gain: f32,
    pub n_notes_active: u32,
}

impl ChannelStatus {
    pub fn new() -> Self {
        let status = Self::default();
        status.gain_bits.store(1.0f32.to_bits(), Ordering::Relaxed);
        status.played_back_sample.store(-1, Ordering::Relaxed);
        status
    }

    pub(crate) fn publish(&self, p: &Published) {
        self.mode.store(p.mode.to_u8(), Ordering::Relaxed);
        self.length.store(p.length, Ordering::Relaxed);
        self.start_offset.store(p.start_offset, Ordering::Relaxed);
        self.pre_play_samples.store(p.pre_play_samples, Ordering::Relaxed);
        self.played_back_sample.store(
            p.played_back_sample.map_or(-1, |s| s as i64),
            Ordering::Relaxed,
        );
        self.data_seq_nr.store(p.data_seq_nr, Ordering::Relaxed);
        self.gain_bits.store(p.gain.to_bits(), Ordering::Relaxed);
        self.n_notes_active.store(p.n_notes_active, Ordering::Relaxed);
    }

    /// Raise the output peak to at least `peak`
    pub(crate) fn raise_output_peak(&self, peak: f32) {
        let current = f32::from_bits(self.output_peak_bits.load(Ordering::Relaxed));
        if peak > current {
            self.output_peak_bits.store(peak.to_bits(), Ordering::Relaxed);
        }
    }

    pub(crate) fn add_events_triggered(&self, n: u32) {
        if n > 0 {
            self.n_events_triggered.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Read the output peak and reset it to zero
    pub fn take_output_peak(&self) -> f32 {
        f32::from_bits(self.output_peak_bits.swap(0, Ordering::Relaxed))
    }

    /// Read the number of MIDI events played since the last call and reset it
    pub fn take_n_events_triggered(&self) -> u32 {
        self.n_events_triggered.swap(0, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let played = self.played_back_sample.load(Ordering::Relaxed);
        ChannelSnapshot {
            mode: ChannelMode::from_u8(self.mode.load(Ordering::Relaxed)),
            length: self.length.load(Ordering::Relaxed),
            start_offset: self.start_offset.load(Ordering::Relaxed),
            pre_play_samples: self.pre_play_samples.load(Ordering::Relaxed),
            played_back_sample: usize::try_from(played).ok(),
            data_seq_nr: self.data_seq_nr.load(Ordering::Relaxed),
            gain: f32::from_bits(self.gain_bits.load(Ordering::Relaxed)),
            output_peak: f32::from_bits(self.output_peak_bits.load(Ordering::Relaxed)),
            n_events_triggered: self.n_events_triggered.load(Ordering::Relaxed),
            n_notes_active: self.n_notes_active.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_and_counters_reset_on_take() {
        let status = ChannelStatus::new();
        status.raise_output_peak(0.5);
        status.raise_output_peak(0.25);
        status.add_events_triggered(3);
        assert_eq!(status.snapshot().output_peak, 0.5);
        assert_eq!(status.take_output_peak(), 0.5);
        assert_eq!(status.take_output_peak(), 0.0);
        assert_eq!(status.take_n_events_triggered(), 3);
        assert_eq!(status.snapshot().n_events_triggered, 0);
    }

    #[test]
    fn test_defaults() {
        let snap = ChannelStatus::new().snapshot();
        assert_eq!(snap.gain, 1.0);
        assert_eq!(snap.played_back_sample, None);
        assert_eq!(snap.mode, ChannelMode::Disabled);
    }
}
