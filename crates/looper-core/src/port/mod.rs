//! Engine-side ports
//!
//! A port is where data enters or leaves the engine: a driver port, or one
//! side of an effect chain. Channels record from input ports and play into
//! output ports; port-to-port connections pass data straight through.
//!
//! ```text
//!  driver in ──► AudioPort(Input) ──► channel ──► AudioPort(Output) ──► driver out
//!                     │  └─► capture ring           ▲
//!                     └──────── passthrough ────────┘
//! ```

pub mod audio;
pub mod midi;
pub mod ringbuffer;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub use audio::AudioPort;
pub use midi::MidiPort;
pub use ringbuffer::AudioRingbuffer;

use crate::types::{PortDataType, PortDirection};

/// Port state published to control threads
#[derive(Debug)]
pub struct PortStatus {
    gain_bits: AtomicU32,
    muted: AtomicBool,
    input_peak_bits: AtomicU32,
    output_peak_bits: AtomicU32,
    n_events_in: AtomicU32,
    n_events_out: AtomicU32,
    ringbuffer_samples: AtomicU32,
}

/// Point-in-time copy of a [`PortStatus`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortSnapshot {
    pub gain: f32,
    pub muted: bool,
    pub input_peak: f32,
    pub output_peak: f32,
    pub n_events_in: u32,
    pub n_events_out: u32,
    /// Capture ring depth, 0 when there is none
    pub ringbuffer_samples: u32,
}

impl Default for PortStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PortStatus {
    pub fn new() -> Self {
        Self {
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            input_peak_bits: AtomicU32::new(0),
            output_peak_bits: AtomicU32::new(0),
            n_events_in: AtomicU32::new(0),
            n_events_out: AtomicU32::new(0),
            ringbuffer_samples: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_settings(&self, gain: f32, muted: bool, ringbuffer_samples: u32) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
        self.muted.store(muted, Ordering::Relaxed);
        self.ringbuffer_samples
            .store(ringbuffer_samples, Ordering::Relaxed);
    }

    pub(crate) fn raise_peaks(&self, input: f32, output: f32) {
        raise(&self.input_peak_bits, input);
        raise(&self.output_peak_bits, output);
    }

    pub(crate) fn add_events(&self, n_in: u32, n_out: u32) {
        if n_in > 0 {
            self.n_events_in.fetch_add(n_in, Ordering::Relaxed);
        }
        if n_out > 0 {
            self.n_events_out.fetch_add(n_out, Ordering::Relaxed);
        }
    }

    /// Read the input peak and reset it
    pub fn take_input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak_bits.swap(0, Ordering::Relaxed))
    }

    /// Read the output peak and reset it
    pub fn take_output_peak(&self) -> f32 {
        f32::from_bits(self.output_peak_bits.swap(0, Ordering::Relaxed))
    }

    /// Read the MIDI event counters and reset them
    pub fn take_event_counts(&self) -> (u32, u32) {
        (
            self.n_events_in.swap(0, Ordering::Relaxed),
            self.n_events_out.swap(0, Ordering::Relaxed),
        )
    }

    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            gain: f32::from_bits(self.gain_bits.load(Ordering::Relaxed)),
            muted: self.muted.load(Ordering::Relaxed),
            input_peak: f32::from_bits(self.input_peak_bits.load(Ordering::Relaxed)),
            output_peak: f32::from_bits(self.output_peak_bits.load(Ordering::Relaxed)),
            n_events_in: self.n_events_in.load(Ordering::Relaxed),
            n_events_out: self.n_events_out.load(Ordering::Relaxed),
            ringbuffer_samples: self.ringbuffer_samples.load(Ordering::Relaxed),
        }
    }
}

fn raise(bits: &AtomicU32, peak: f32) {
    if peak > f32::from_bits(bits.load(Ordering::Relaxed)) {
        bits.store(peak.to_bits(), Ordering::Relaxed);
    }
}

/// Process-side state of one port
#[derive(Debug)]
pub enum Port {
    Audio(AudioPort),
    Midi(MidiPort),
}

impl Port {
    pub fn direction(&self) -> PortDirection {
        match self {
            Port::Audio(p) => p.direction(),
            Port::Midi(p) => p.direction(),
        }
    }

    pub fn data_type(&self) -> PortDataType {
        match self {
            Port::Audio(_) => PortDataType::Audio,
            Port::Midi(_) => PortDataType::Midi,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioPort> {
        match self {
            Port::Audio(p) => Some(p),
            Port::Midi(_) => None,
        }
    }

    pub fn as_audio_mut(&mut self) -> Option<&mut AudioPort> {
        match self {
            Port::Audio(p) => Some(p),
            Port::Midi(_) => None,
        }
    }

    pub fn as_midi(&self) -> Option<&MidiPort> {
        match self {
            Port::Midi(p) => Some(p),
            Port::Audio(_) => None,
        }
    }

    pub fn as_midi_mut(&mut self) -> Option<&mut MidiPort> {
        match self {
            Port::Midi(p) => Some(p),
            Port::Audio(_) => None,
        }
    }

    /// Start a cycle of `n_frames`
    pub fn prepare(&mut self, n_frames: u32) {
        match self {
            Port::Audio(p) => p.prepare(n_frames),
            Port::Midi(p) => p.prepare(n_frames),
        }
    }

    /// Close the cycle: gain, peaks, counters and capture ring
    pub fn finish(&mut self) {
        match self {
            Port::Audio(p) => p.finish(),
            Port::Midi(p) => p.finish(),
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        if let Port::Audio(p) = self {
            p.set_gain(gain);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        match self {
            Port::Audio(p) => p.set_muted(muted),
            Port::Midi(p) => p.set_muted(muted),
        }
    }

    pub fn ringbuffer_samples(&self) -> u32 {
        match self {
            Port::Audio(p) => p.ringbuffer_samples(),
            Port::Midi(p) => p.ringbuffer_samples(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_take_resets() {
        let status = PortStatus::new();
        status.raise_peaks(0.5, 0.25);
        status.raise_peaks(0.1, 0.75);
        status.add_events(2, 1);
        assert_eq!(status.take_input_peak(), 0.5);
        assert_eq!(status.take_output_peak(), 0.75);
        assert_eq!(status.take_event_counts(), (2, 1));
        let snap = status.snapshot();
        assert_eq!((snap.input_peak, snap.output_peak), (0.0, 0.0));
        assert_eq!(snap.gain, 1.0);
    }
}
