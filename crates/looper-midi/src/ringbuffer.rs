//! Always-on MIDI capture ring
//!
//! Keeps the MIDI input of the last `n_samples` samples. Messages are stored
//! with an absolute sample time taken from a free-running `u32` counter that
//! advances by each cycle's length. The counter wraps around after about a
//! day at 48kHz, so every comparison goes through wrapping arithmetic: a
//! message's age is `end.wrapping_sub(time)`, never `end - time`.
//!
//! ```text
//!            depth (n_samples)
//!   ◄─────────────────────────────────►
//!   ┌──────────────────────┬───────────┐
//!   │   older cycles       │  current  │
//!   └──────────────────────┴───────────┘
//!   ▲                      ▲           ▲
//!   end - depth            start       end = start + len
//! ```

use std::collections::VecDeque;

use crate::error::MidiResult;
use crate::message::MidiMessage;
use crate::storage::MidiStorage;

/// Bounded-depth MIDI capture buffer with wrap-safe time
#[derive(Debug, Clone)]
pub struct MidiRingbuffer {
    events: VecDeque<MidiMessage>,
    capacity: usize,
    n_samples: u32,
    current_start: u32,
    current_len: u32,
}

impl MidiRingbuffer {
    /// Create a ring of `n_samples` depth holding at most `capacity` events
    pub fn new(n_samples: u32, capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            n_samples,
            current_start: 0,
            current_len: 0,
        }
    }

    #[inline]
    pub fn n_samples(&self) -> u32 {
        self.n_samples
    }

    /// Change the depth; takes effect at the next [`Self::next_buffer`]
    pub fn set_n_samples(&mut self, n_samples: u32) {
        self.n_samples = n_samples;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Absolute time of the start of the current cycle
    #[inline]
    pub fn current_start_time(&self) -> u32 {
        self.current_start
    }

    /// Absolute time one past the end of the current cycle
    #[inline]
    pub fn current_end_time(&self) -> u32 {
        self.current_start.wrapping_add(self.current_len)
    }

    /// Begin a new cycle of `n_frames` frames
    ///
    /// Messages that fall out of the depth window are removed and passed to
    /// `dropped` (oldest first), so the caller can fold them into a tail
    /// state tracker.
    pub fn next_buffer(&mut self, n_frames: u32, mut dropped: impl FnMut(&MidiMessage)) {
        self.current_start = self.current_end_time();
        self.current_len = n_frames;
        let end = self.current_end_time();
        while let Some(front) = self.events.front() {
            if end.wrapping_sub(front.time()) <= self.n_samples {
                break;
            }
            if let Some(msg) = self.events.pop_front() {
                dropped(&msg);
            }
        }
    }

    /// Store a message captured at frame `msg.time()` of the current cycle
    ///
    /// When the ring is full the oldest message is evicted and returned.
    pub fn put(&mut self, msg: MidiMessage) -> Option<MidiMessage> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        if self.capacity > 0 {
            let time = self.current_start.wrapping_add(msg.time());
            self.events.push_back(msg.with_time(time));
        }
        evicted
    }

    /// Copy the window contents into `out`
    ///
    /// Output times are relative to the start of the window
    /// (`end - n_samples`), so they lie in `0..=n_samples` regardless of
    /// where the absolute counter currently is.
    pub fn snapshot(&self, out: &mut MidiStorage) -> MidiResult<()> {
        out.clear();
        let end = self.current_end_time();
        let window_start = end.wrapping_sub(self.n_samples);
        for msg in &self.events {
            if end.wrapping_sub(msg.time()) > self.n_samples {
                continue;
            }
            out.append(msg.with_time(msg.time().wrapping_sub(window_start)))?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
