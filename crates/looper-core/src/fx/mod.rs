//! Effect processing chains
//!
//! The engine does not host plugins itself. A chain is anything that takes
//! a fixed set of audio and MIDI inputs and produces a fixed set of audio
//! outputs per cycle. The session wraps each chain input and output as an
//! internal port, so channels connect to chains exactly like they connect
//! to driver ports:
//!
//! ```text
//!   dry channel ──► port(Output) ──► ChainBuffers.audio_in ─┐
//!                                                            ▼
//!                                                  ProcessingChain::process
//!                                                            │
//!   wet channel ◄── port(Input) ◄── ChainBuffers.audio_out ◄┘
//! ```

mod gain;

pub use gain::GainChain;

use looper_midi::MidiMessage;

use crate::error::LooperResult;
use crate::types::{Sample, MAX_BUFFER_SIZE};

/// Number of ports a chain exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainPorts {
    pub audio_inputs: usize,
    pub audio_outputs: usize,
    pub midi_inputs: usize,
}

/// Per-cycle buffers lent to a chain
///
/// Allocated once when the chain is added; each cycle only changes the
/// visible length.
#[derive(Debug)]
pub struct ChainBuffers {
    audio_in: Vec<Vec<Sample>>,
    audio_out: Vec<Vec<Sample>>,
    midi_in: Vec<Vec<MidiMessage>>,
}

impl ChainBuffers {
    pub fn new(ports: ChainPorts, midi_capacity: usize) -> Self {
        let audio = |n: usize| {
            (0..n)
                .map(|_| Vec::with_capacity(MAX_BUFFER_SIZE))
                .collect::<Vec<_>>()
        };
        Self {
            audio_in: audio(ports.audio_inputs),
            audio_out: audio(ports.audio_outputs),
            midi_in: (0..ports.midi_inputs)
                .map(|_| Vec::with_capacity(midi_capacity))
                .collect(),
        }
    }

    /// Size every buffer to `n_frames` of silence and drop old MIDI
    pub fn prepare(&mut self, n_frames: u32) {
        for buf in self.audio_in.iter_mut().chain(self.audio_out.iter_mut()) {
            let n = (n_frames as usize).min(buf.capacity());
            buf.clear();
            buf.resize(n, 0.0);
        }
        for buf in &mut self.midi_in {
            buf.clear();
        }
    }

    pub fn audio_in(&self, idx: usize) -> Option<&[Sample]> {
        self.audio_in.get(idx).map(Vec::as_slice)
    }

    pub fn audio_in_mut(&mut self, idx: usize) -> Option<&mut [Sample]> {
        self.audio_in.get_mut(idx).map(Vec::as_mut_slice)
    }

    pub fn audio_out(&self, idx: usize) -> Option<&[Sample]> {
        self.audio_out.get(idx).map(Vec::as_slice)
    }

    pub fn audio_out_mut(&mut self, idx: usize) -> Option<&mut [Sample]> {
        self.audio_out.get_mut(idx).map(Vec::as_mut_slice)
    }

    /// Input `input` and output `output` at the same time
    pub fn audio_io(&mut self, input: usize, output: usize) -> Option<(&[Sample], &mut [Sample])> {
        let src = self.audio_in.get(input)?;
        let dst = self.audio_out.get_mut(output)?;
        Some((src.as_slice(), dst.as_mut_slice()))
    }

    pub fn midi_in(&self, idx: usize) -> Option<&[MidiMessage]> {
        self.midi_in.get(idx).map(Vec::as_slice)
    }

    /// Append to MIDI input `idx`; messages past its capacity are dropped
    pub fn push_midi_in(&mut self, idx: usize, msg: MidiMessage) -> bool {
        match self.midi_in.get_mut(idx) {
            Some(buf) if buf.len() < buf.capacity() => {
                buf.push(msg);
                true
            }
            _ => false,
        }
    }
}

/// An effect chain hosted outside the engine
pub trait ProcessingChain: Send {
    fn ports(&self) -> ChainPorts;

    /// Whether the chain can process at all (e.g. plugins loaded)
    fn is_ready(&self) -> bool;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Read `buffers.audio_in`/`midi_in`, write `buffers.audio_out`
    ///
    /// Called on the process thread; must not block.
    fn process(&mut self, n_frames: u32, buffers: &mut ChainBuffers) -> LooperResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_follow_cycle_length() {
        let mut bufs = ChainBuffers::new(
            ChainPorts {
                audio_inputs: 2,
                audio_outputs: 1,
                midi_inputs: 1,
            },
            1,
        );
        bufs.prepare(4);
        assert_eq!(bufs.audio_in(1).map(<[Sample]>::len), Some(4));
        assert!(bufs.audio_in(2).is_none());
        bufs.audio_in_mut(0).unwrap()[0] = 1.0;
        let (src, dst) = bufs.audio_io(0, 0).unwrap();
        dst[0] = src[0];
        assert_eq!(bufs.audio_out(0).unwrap()[0], 1.0);

        assert!(bufs.push_midi_in(0, MidiMessage::short(0, 0x90, 60, 1)));
        assert!(!bufs.push_midi_in(0, MidiMessage::short(1, 0x90, 61, 1)));
        bufs.prepare(2);
        assert_eq!(bufs.midi_in(0).map(<[MidiMessage]>::len), Some(0));
        assert_eq!(bufs.audio_out(0), Some(&[0.0, 0.0][..]));
    }
}
