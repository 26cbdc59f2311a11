//! Bounded, time-ordered MIDI event storage
//!
//! A MIDI channel keeps its recorded events in a [`MidiStorage`]. Events are
//! appended in time order only, capacity is reserved up front, and playback
//! walks the events with a separate [`MidiStorageCursor`] so that the storage
//! itself stays immutable while it is being played.

use crate::error::{MidiError, MidiResult};
use crate::message::MidiMessage;

/// Fixed-capacity, time-ordered list of MIDI messages
#[derive(Debug, Clone)]
pub struct MidiStorage {
    events: Vec<MidiMessage>,
}

impl MidiStorage {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn events(&self) -> &[MidiMessage] {
        &self.events
    }

    /// Time of the last event
    pub fn last_time(&self) -> Option<u32> {
        self.events.last().map(|m| m.time())
    }

    /// Append one event
    ///
    /// Fails without modifying the storage when full or when `msg` is older
    /// than the last stored event.
    pub fn append(&mut self, msg: MidiMessage) -> MidiResult<()> {
        if self.events.len() == self.events.capacity() {
            return Err(MidiError::StorageFull(self.events.capacity()));
        }
        if let Some(last) = self.last_time() {
            if msg.time() < last {
                return Err(MidiError::OutOfOrder {
                    time: msg.time(),
                    last,
                });
            }
        }
        self.events.push(msg);
        Ok(())
    }

    pub fn append_bytes(&mut self, time: u32, bytes: &[u8]) -> MidiResult<()> {
        self.append(MidiMessage::new(time, bytes)?)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Index of the first event at or after `time`
    pub fn first_index_at_or_after(&self, time: u32) -> usize {
        self.events.partition_point(|m| m.time() < time)
    }

    /// Drop every event at or after `time`
    pub fn truncate_from(&mut self, time: u32) {
        let idx = self.first_index_at_or_after(time);
        self.events.truncate(idx);
    }

    /// Drop every event before `time`, passing each dropped event to `dropped`
    ///
    /// Remaining event times are left untouched.
    pub fn drop_before(&mut self, time: u32, mut dropped: impl FnMut(&MidiMessage)) {
        let idx = self.first_index_at_or_after(time);
        for msg in self.events.drain(..idx) {
            dropped(&msg);
        }
    }

    /// Replace contents with a copy of `other`
    ///
    /// Allocation-free as long as `other` fits the reserved capacity.
    pub fn copy_from(&mut self, other: &MidiStorage) -> MidiResult<()> {
        if other.len() > self.capacity() {
            return Err(MidiError::StorageFull(self.capacity()));
        }
        self.events.clear();
        self.events.extend_from_slice(&other.events);
        Ok(())
    }

    /// Exchange contents with `other`
    pub fn swap(&mut self, other: &mut MidiStorage) {
        std::mem::swap(&mut self.events, &mut other.events);
    }
}

/// Read position into a [`MidiStorage`]
///
/// A cursor is only an index; it must be reset whenever the storage it
/// refers to is truncated or replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiStorageCursor {
    index: usize,
}

impl MidiStorageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.index = 0;
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Event under the cursor
    pub fn peek<'s>(&self, storage: &'s MidiStorage) -> Option<&'s MidiMessage> {
        storage.events.get(self.index)
    }

    /// Move past the current event
    pub fn advance(&mut self, storage: &MidiStorage) {
        if self.index < storage.len() {
            self.index += 1;
        }
    }

    /// Advance to the first event at or after `time`
    ///
    /// Every event stepped over is passed to `skipped`. Never moves
    /// backwards: a cursor already past `time` stays where it is.
    pub fn find_time_forward(
        &mut self,
        storage: &MidiStorage,
        time: u32,
        mut skipped: impl FnMut(&MidiMessage),
    ) {
        while let Some(msg) = storage.events.get(self.index) {
            if msg.time() >= time {
                break;
            }
            skipped(msg);
            self.index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(times: &[u32]) -> MidiStorage {
        let mut s = MidiStorage::with_capacity(16);
        for (i, &t) in times.iter().enumerate() {
            s.append(MidiMessage::short(t, 0x90, i as u8, 100)).unwrap();
        }
        s
    }

    #[test]
    fn test_append_rejects_out_of_order_and_full() {
        let mut s = MidiStorage::with_capacity(2);
        s.append_bytes(5, &[0x90, 60, 100]).unwrap();
        assert_eq!(
            s.append_bytes(4, &[0x80, 60, 0]),
            Err(MidiError::OutOfOrder { time: 4, last: 5 })
        );
        s.append_bytes(5, &[0x80, 60, 0]).unwrap();
        assert_eq!(
            s.append_bytes(6, &[0x90, 61, 100]),
            Err(MidiError::StorageFull(2))
        );
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_truncate_and_drop_before() {
        let mut s = storage_with(&[1, 3, 3, 7, 9]);
        s.truncate_from(7);
        assert_eq!(s.len(), 3);

        let mut dropped = Vec::new();
        s.drop_before(3, |m| dropped.push(m.time()));
        assert_eq!(dropped, vec![1]);
        assert_eq!(s.events()[0].time(), 3);
    }

    #[test]
    fn test_cursor_skips_forward_only() {
        let s = storage_with(&[0, 2, 4, 6]);
        let mut cursor = MidiStorageCursor::new();
        let mut skipped = Vec::new();
        cursor.find_time_forward(&s, 3, |m| skipped.push(m.time()));
        assert_eq!(skipped, vec![0, 2]);
        assert_eq!(cursor.peek(&s).map(|m| m.time()), Some(4));

        cursor.find_time_forward(&s, 1, |_| panic!("must not move back"));
        assert_eq!(cursor.index(), 2);

        cursor.advance(&s);
        cursor.advance(&s);
        cursor.advance(&s);
        assert_eq!(cursor.peek(&s), None);
        assert_eq!(cursor.index(), 4);
    }

    #[test]
    fn test_copy_from_respects_capacity() {
        let src = storage_with(&[0, 1, 2]);
        let mut small = MidiStorage::with_capacity(2);
        assert_eq!(small.copy_from(&src), Err(MidiError::StorageFull(2)));
        let mut big = MidiStorage::with_capacity(8);
        big.copy_from(&src).unwrap();
        assert_eq!(big.events(), src.events());
    }
}
