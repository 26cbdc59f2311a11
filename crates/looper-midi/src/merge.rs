//! Two-phase MIDI merge buffer
//!
//! Several producers (port passthrough, channel playback, catch-up state)
//! write into one buffer per output port and cycle, in whatever order they
//! happen to run. [`MidiMergeBuffer::sort`] then orders everything by time,
//! and only after that may the buffer be read.
//!
//! Messages can be written by value (copied into a pool reserved at
//! construction) or by reference (zero-copy, borrowed for the buffer's
//! lifetime `'a`). The buffer is reused across cycles through
//! [`MidiMergeBuffer::recycle`], which keeps the allocations and drops the
//! borrow.

use crate::error::{MidiError, MidiResult};
use crate::message::MidiMessage;

#[derive(Debug, Clone, Copy)]
enum Entry<'a> {
    /// Index into the owned pool
    Owned(usize),
    Borrowed(&'a MidiMessage),
}

/// Fan-in buffer that orders MIDI messages from several sources
#[derive(Debug)]
pub struct MidiMergeBuffer<'a> {
    pool: Vec<MidiMessage>,
    entries: Vec<Entry<'a>>,
    /// Merge target, swapped with `entries` after each pass
    scratch: Vec<Entry<'a>>,
    /// Start indices of ordered runs
    runs: Vec<usize>,
    sorted: bool,
}

impl<'a> MidiMergeBuffer<'a> {
    /// Create a buffer holding up to `capacity` messages per cycle
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: Vec::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            scratch: Vec::with_capacity(capacity),
            runs: Vec::with_capacity(capacity),
            // An empty buffer is trivially ordered
            sorted: true,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Copy a message into the buffer
    pub fn write_value(&mut self, msg: MidiMessage) -> MidiResult<()> {
        if self.pool.len() == self.pool.capacity() || self.entries.len() == self.entries.capacity()
        {
            return Err(MidiError::MergeBufferFull(self.entries.capacity()));
        }
        self.pool.push(msg);
        self.entries.push(Entry::Owned(self.pool.len() - 1));
        self.sorted = false;
        Ok(())
    }

    /// Reference a message without copying it
    pub fn write_ref(&mut self, msg: &'a MidiMessage) -> MidiResult<()> {
        if self.entries.len() == self.entries.capacity() {
            return Err(MidiError::MergeBufferFull(self.entries.capacity()));
        }
        self.entries.push(Entry::Borrowed(msg));
        self.sorted = false;
        Ok(())
    }

    /// Stable sort by timestamp
    ///
    /// Bottom-up merge of the ordered runs the producers left behind:
    /// linear when every producer wrote in order, `n log r` for `r` runs.
    /// Works in the scratch space reserved at construction.
    pub fn sort(&mut self) {
        let Self {
            pool,
            entries,
            scratch,
            runs,
            sorted,
        } = self;
        let time_of = |e: &Entry<'a>| match *e {
            Entry::Owned(idx) => pool[idx].time(),
            Entry::Borrowed(msg) => msg.time(),
        };
        let len = entries.len();
        if len < 2 {
            *sorted = true;
            return;
        }

        runs.clear();
        runs.push(0);
        for i in 1..len {
            if time_of(&entries[i - 1]) > time_of(&entries[i]) {
                runs.push(i);
            }
        }

        let mut n_runs = runs.len();
        while n_runs > 1 {
            scratch.clear();
            let mut merged = 0;
            for r in (0..n_runs).step_by(2) {
                let start = runs[r];
                let mid = if r + 1 < n_runs { runs[r + 1] } else { len };
                let end = if r + 2 < n_runs { runs[r + 2] } else { len };
                runs[merged] = start;
                merged += 1;

                let (mut i, mut j) = (start, mid);
                while i < mid && j < end {
                    // Ties go left to keep the sort stable
                    if time_of(&entries[j]) < time_of(&entries[i]) {
                        scratch.push(entries[j]);
                        j += 1;
                    } else {
                        scratch.push(entries[i]);
                        i += 1;
                    }
                }
                scratch.extend_from_slice(&entries[i..mid]);
                scratch.extend_from_slice(&entries[j..end]);
            }
            std::mem::swap(entries, scratch);
            n_runs = merged;
        }
        *sorted = true;
    }

    /// Iterate messages in time order
    ///
    /// Fails with [`MidiError::NotSorted`] when written to since the last sort.
    pub fn messages(&self) -> MidiResult<impl Iterator<Item = &MidiMessage> + '_> {
        if !self.sorted {
            return Err(MidiError::NotSorted);
        }
        Ok(self.entries.iter().map(move |e| match *e {
            Entry::Owned(idx) => &self.pool[idx],
            Entry::Borrowed(msg) => msg,
        }))
    }

    /// Drop all messages, keeping the allocations
    pub fn clear(&mut self) {
        self.pool.clear();
        self.entries.clear();
        self.scratch.clear();
        self.sorted = true;
    }

    /// Clear and rebind to a new borrow lifetime, keeping the allocations
    ///
    /// Lets a long-lived owner store the buffer as `MidiMergeBuffer<'static>`
    /// between cycles and lend it out with a cycle-local lifetime.
    pub fn recycle<'b>(self) -> MidiMergeBuffer<'b> {
        let Self {
            mut pool,
            entries,
            scratch,
            mut runs,
            ..
        } = self;
        pool.clear();
        runs.clear();
        // Empty in-place collects reuse the allocations
        let entries: Vec<Entry<'b>> = entries.into_iter().filter_map(|_| None).collect();
        let scratch: Vec<Entry<'b>> = scratch.into_iter().filter_map(|_| None).collect();
        MidiMergeBuffer {
            pool,
            entries,
            scratch,
            runs,
            sorted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(time: u32, note: u8) -> MidiMessage {
        MidiMessage::short(time, 0x90, note, 100)
    }

    fn times(buf: &MidiMergeBuffer<'_>) -> Vec<u32> {
        buf.messages().unwrap().map(|m| m.time()).collect()
    }

    #[test]
    fn test_read_before_sort_fails() {
        let mut buf = MidiMergeBuffer::with_capacity(4);
        assert!(buf.messages().is_ok());
        buf.write_value(msg(3, 60)).unwrap();
        assert_eq!(buf.messages().err(), Some(MidiError::NotSorted));
        buf.sort();
        assert_eq!(times(&buf), vec![3]);
        buf.write_value(msg(1, 61)).unwrap();
        assert!(buf.messages().is_err());
    }

    #[test]
    fn test_sort_is_stable_across_values_and_refs() {
        let a = msg(5, 1);
        let b = msg(2, 2);
        let mut buf = MidiMergeBuffer::with_capacity(8);
        buf.write_ref(&a).unwrap();
        buf.write_value(msg(5, 3)).unwrap();
        buf.write_ref(&b).unwrap();
        buf.write_value(msg(0, 4)).unwrap();
        buf.sort();

        let notes: Vec<u8> = buf.messages().unwrap().map(|m| m.bytes()[1]).collect();
        assert_eq!(notes, vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_sort_merges_interleaved_producers() {
        // Four producers, each in order, written round-robin
        let mut buf = MidiMergeBuffer::with_capacity(64);
        for step in 0..16u32 {
            let producer = (step % 4) as u8;
            buf.write_value(msg(step / 4 + u32::from(producer) * 3, producer)).unwrap();
        }
        buf.sort();
        let sorted = times(&buf);
        assert_eq!(sorted.len(), 16);
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));

        // Fully reversed input is one run per message
        buf.clear();
        for t in (0..32u32).rev() {
            buf.write_value(msg(t, 0)).unwrap();
        }
        buf.sort();
        assert_eq!(times(&buf), (0..32).collect::<Vec<_>>());
        assert_eq!(buf.capacity(), 64);
    }

    #[test]
    fn test_full_buffer_rejects_writes() {
        let mut buf = MidiMergeBuffer::with_capacity(2);
        buf.write_value(msg(0, 1)).unwrap();
        buf.write_value(msg(0, 2)).unwrap();
        assert_eq!(
            buf.write_value(msg(0, 3)),
            Err(MidiError::MergeBufferFull(2))
        );
    }

    #[test]
    fn test_recycle_keeps_capacity() {
        let mut buf: MidiMergeBuffer<'static> = MidiMergeBuffer::with_capacity(16);
        {
            let local = msg(1, 1);
            let mut cycle = buf.recycle();
            cycle.write_ref(&local).unwrap();
            cycle.write_value(msg(0, 2)).unwrap();
            cycle.sort();
            assert_eq!(times(&cycle), vec![0, 1]);
            buf = cycle.recycle();
        }
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 16);
    }
}
