//! Constant gain chain

use crate::error::LooperResult;
use crate::fx::{ChainBuffers, ChainPorts, ProcessingChain};

/// Multiplies each input by a fixed gain into the matching output
///
/// Useful as a stand-in effect: `GainChain::new(0.5)` halves a mono signal.
#[derive(Debug, Clone)]
pub struct GainChain {
    gain: f32,
    channels: usize,
    active: bool,
}

impl GainChain {
    /// Mono chain
    pub fn new(gain: f32) -> Self {
        Self::with_channels(gain, 1)
    }

    pub fn with_channels(gain: f32, channels: usize) -> Self {
        Self {
            gain,
            channels,
            active: true,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl ProcessingChain for GainChain {
    fn ports(&self) -> ChainPorts {
        ChainPorts {
            audio_inputs: self.channels,
            audio_outputs: self.channels,
            midi_inputs: 0,
        }
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn process(&mut self, _n_frames: u32, buffers: &mut ChainBuffers) -> LooperResult<()> {
        for ch in 0..self.channels {
            if let Some((src, dst)) = buffers.audio_io(ch, ch) {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = *s * self.gain;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scales_each_channel() {
        let mut chain = GainChain::with_channels(0.5, 2);
        let mut bufs = ChainBuffers::new(chain.ports(), 0);
        bufs.prepare(2);
        bufs.audio_in_mut(0).unwrap().copy_from_slice(&[2.0, 4.0]);
        bufs.audio_in_mut(1).unwrap().copy_from_slice(&[-1.0, 1.0]);
        chain.process(2, &mut bufs).unwrap();
        assert_eq!(bufs.audio_out(0).unwrap(), &[1.0, 2.0]);
        assert_eq!(bufs.audio_out(1).unwrap(), &[-0.5, 0.5]);
    }
}
