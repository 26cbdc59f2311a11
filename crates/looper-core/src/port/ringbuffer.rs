//! Always-on audio capture ring
//!
//! Keeps the last `n_samples` samples that passed through a port, as a
//! rotating list of pool buffers. The ring starts out full of silence, so
//! its logical window is always exactly `n_samples` long.
//!
//! ```text
//!  oldest                                        newest (active)
//!  ┌────────┬────────┬────────┬────────┐
//!  │ bs     │ bs     │ bs     │ fill   │   stored = (len-1)*bs + fill >= n
//!  └────────┴────────┴────────┴────────┘
//!        ◄──────── logical window (n) ────────►
//! ```

use std::collections::VecDeque;

use crate::engine::pool::{Buffer, BufferPool};
use crate::types::Sample;

#[derive(Debug)]
pub struct AudioRingbuffer {
    buffers: VecDeque<Buffer>,
    buffer_size: usize,
    n_samples: usize,
    active_fill: usize,
}

impl AudioRingbuffer {
    /// Allocate a silent ring of `n_samples` from `pool`
    pub fn new(n_samples: usize, pool: &BufferPool) -> Self {
        let buffer_size = pool.buffer_size();
        let n_buffers = n_samples.div_ceil(buffer_size) + 1;
        let mut buffers = VecDeque::with_capacity(n_buffers);
        for _ in 0..n_buffers {
            buffers.push_back(pool.acquire());
        }
        Self {
            buffers,
            buffer_size,
            n_samples,
            active_fill: buffer_size,
        }
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn stored(&self) -> usize {
        (self.buffers.len() - 1) * self.buffer_size + self.active_fill
    }

    /// Append samples, overwriting the oldest ones
    pub fn put(&mut self, mut data: &[Sample]) {
        while !data.is_empty() {
            if self.active_fill == self.buffer_size {
                // Recycle the oldest buffer as the new active one
                if let Some(mut oldest) = self.buffers.pop_front() {
                    oldest.clear();
                    self.buffers.push_back(oldest);
                }
                self.active_fill = 0;
            }
            let n = (self.buffer_size - self.active_fill).min(data.len());
            if let Some(active) = self.buffers.back_mut() {
                active[self.active_fill..self.active_fill + n].copy_from_slice(&data[..n]);
            }
            self.active_fill += n;
            data = &data[n..];
        }
    }

    /// Copy window samples `offset..offset + dst.len()` into `dst`
    ///
    /// Offset 0 is the oldest sample in the window; anything past the window
    /// reads as silence.
    pub fn read_window(&self, offset: usize, dst: &mut [Sample]) {
        let base = self.stored() - self.n_samples;
        for (i, out) in dst.iter_mut().enumerate() {
            let logical = offset + i;
            *out = if logical < self.n_samples {
                let idx = base + logical;
                self.buffers
                    .get(idx / self.buffer_size)
                    .map_or(0.0, |b| b[idx % self.buffer_size])
            } else {
                0.0
            };
        }
    }

    /// Hand every buffer back to `pool`
    pub fn release_into(self, pool: &BufferPool) {
        for buffer in self.buffers {
            pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(rb: &AudioRingbuffer) -> Vec<Sample> {
        let mut out = vec![0.0; rb.n_samples()];
        rb.read_window(0, &mut out);
        out
    }

    #[test]
    fn test_starts_silent() {
        let pool = BufferPool::new(4, 8, 0);
        let rb = AudioRingbuffer::new(6, &pool);
        assert_eq!(window(&rb), vec![0.0; 6]);
    }

    #[test]
    fn test_keeps_last_n_samples() {
        let pool = BufferPool::new(4, 8, 0);
        let mut rb = AudioRingbuffer::new(6, &pool);
        rb.put(&[1.0, 2.0, 3.0]);
        assert_eq!(window(&rb), vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        let more: Vec<Sample> = (4..=11).map(|i| i as Sample).collect();
        rb.put(&more);
        assert_eq!(window(&rb), vec![6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);

        let mut tail = [0.0; 4];
        rb.read_window(4, &mut tail);
        assert_eq!(tail, [10.0, 11.0, 0.0, 0.0]);
    }

    #[test]
    fn test_release_returns_buffers() {
        let pool = BufferPool::new(4, 8, 0);
        let rb = AudioRingbuffer::new(8, &pool);
        assert_eq!(pool.stats().available, 5);
        rb.release_into(&pool);
        assert_eq!(pool.stats().available, 8);
    }
}
