//! Audio port

use std::sync::Arc;

use crate::port::ringbuffer::AudioRingbuffer;
use crate::port::PortStatus;
use crate::types::{PortDirection, Sample, MAX_BUFFER_SIZE};

/// One mono audio port and its cycle buffer
///
/// The buffer holds exactly the current cycle's frames. Input ports get it
/// filled by the driver or an effect chain; output ports start every cycle
/// silent and are mixed into.
#[derive(Debug)]
pub struct AudioPort {
    direction: PortDirection,
    gain: f32,
    muted: bool,
    buffer: Vec<Sample>,
    ring: Option<AudioRingbuffer>,
    status: Arc<PortStatus>,
}

impl AudioPort {
    pub fn new(direction: PortDirection) -> Self {
        Self::with_status(direction, Arc::new(PortStatus::new()))
    }

    /// Create a port that publishes into an existing status
    pub fn with_status(direction: PortDirection, status: Arc<PortStatus>) -> Self {
        let port = Self {
            direction,
            gain: 1.0,
            muted: false,
            buffer: Vec::with_capacity(MAX_BUFFER_SIZE),
            ring: None,
            status,
        };
        port.publish();
        port
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn status(&self) -> Arc<PortStatus> {
        Arc::clone(&self.status)
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
        self.publish();
    }

    #[inline]
    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.publish();
    }

    pub fn ringbuffer(&self) -> Option<&AudioRingbuffer> {
        self.ring.as_ref()
    }

    pub fn ringbuffer_samples(&self) -> u32 {
        self.ring
            .as_ref()
            .map_or(0, |r| u32::try_from(r.n_samples()).unwrap_or(u32::MAX))
    }

    /// Swap in a capture ring built off the process thread
    ///
    /// The previous ring is handed back so its buffers can be released
    /// where freeing is allowed.
    pub fn replace_ringbuffer(&mut self, ring: Option<AudioRingbuffer>) -> Option<AudioRingbuffer> {
        let old = std::mem::replace(&mut self.ring, ring);
        self.publish();
        old
    }

    /// Size the cycle buffer to `n_frames` and silence it
    pub fn prepare(&mut self, n_frames: u32) {
        let n = (n_frames as usize).min(self.buffer.capacity());
        self.buffer.clear();
        self.buffer.resize(n, 0.0);
    }

    #[inline]
    pub fn buffer(&self) -> &[Sample] {
        &self.buffer
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [Sample] {
        &mut self.buffer
    }

    /// Overwrite the cycle buffer; missing samples read as silence
    pub fn fill_from(&mut self, src: &[Sample]) {
        let n = src.len().min(self.buffer.len());
        self.buffer[..n].copy_from_slice(&src[..n]);
        self.buffer[n..].fill(0.0);
    }

    /// Add `src` to the cycle buffer
    pub fn mix_from(&mut self, src: &[Sample]) {
        for (dst, s) in self.buffer.iter_mut().zip(src) {
            *dst += *s;
        }
    }

    /// Apply gain and mute, measure peaks and feed the capture ring
    ///
    /// Runs once per cycle after the buffer holds its final input.
    pub fn finish(&mut self) {
        let in_peak = peak(&self.buffer);
        let gain = if self.muted { 0.0 } else { self.gain };
        if gain != 1.0 {
            for s in &mut self.buffer {
                *s *= gain;
            }
        }
        self.status.raise_peaks(in_peak, in_peak * gain.abs());
        if self.direction == PortDirection::Input {
            if let Some(ring) = &mut self.ring {
                ring.put(&self.buffer);
            }
        }
    }

    fn publish(&self) {
        self.status
            .set_settings(self.gain, self.muted, self.ringbuffer_samples());
    }
}

fn peak(buf: &[Sample]) -> f32 {
    buf.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pool::BufferPool;

    #[test]
    fn test_gain_mute_and_peaks() {
        let mut port = AudioPort::new(PortDirection::Input);
        port.set_gain(0.5);
        port.prepare(4);
        port.fill_from(&[1.0, -2.0, 0.5]);
        port.finish();
        assert_eq!(port.buffer(), &[0.5, -1.0, 0.25, 0.0]);
        let status = port.status();
        assert_eq!(status.take_input_peak(), 2.0);
        assert_eq!(status.take_output_peak(), 1.0);

        port.set_muted(true);
        port.prepare(2);
        port.fill_from(&[1.0, 1.0]);
        port.finish();
        assert_eq!(port.buffer(), &[0.0, 0.0]);
        assert!(status.snapshot().muted);
    }

    #[test]
    fn test_input_feeds_ring() {
        let pool = BufferPool::new(4, 8, 0);
        let mut port = AudioPort::new(PortDirection::Input);
        assert!(port
            .replace_ringbuffer(Some(AudioRingbuffer::new(4, &pool)))
            .is_none());
        assert_eq!(port.status().snapshot().ringbuffer_samples, 4);
        for chunk in [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            port.prepare(3);
            port.fill_from(&chunk);
            port.finish();
        }
        let mut window = [0.0; 4];
        port.ringbuffer().unwrap().read_window(0, &mut window);
        assert_eq!(window, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_output_mixes() {
        let mut port = AudioPort::new(PortDirection::Output);
        port.prepare(3);
        port.mix_from(&[1.0, 1.0, 1.0]);
        port.mix_from(&[0.5, 0.5]);
        port.finish();
        assert_eq!(port.buffer(), &[1.5, 1.5, 1.0]);
    }
}
