//! MIDI port
//!
//! Every producer of a cycle (driver input, passthrough connections,
//! channel playback) writes into the port's merge buffer in whatever order
//! it runs. [`MidiPort::finish`] sorts once and exposes the result as a
//! time-ordered slice.

use std::sync::Arc;

use looper_midi::{MidiMergeBuffer, MidiMessage, MidiRingbuffer, MidiStateTracker};

use crate::port::PortStatus;
use crate::types::PortDirection;

#[derive(Debug)]
pub struct MidiPort {
    direction: PortDirection,
    muted: bool,
    merge: MidiMergeBuffer<'static>,
    messages: Vec<MidiMessage>,
    /// Channel playback target, merged in by `finish`
    pending: Vec<MidiMessage>,
    ring: MidiRingbuffer,
    input_state: Box<MidiStateTracker>,
    /// State of everything that fell out of the ring
    tail_state: Box<MidiStateTracker>,
    n_dropped: u32,
    status: Arc<PortStatus>,
}

impl MidiPort {
    /// `merge_capacity` bounds the events per cycle, `ring_capacity` the
    /// events kept by the capture ring
    pub fn new(
        direction: PortDirection,
        merge_capacity: usize,
        ring_capacity: usize,
        status: Arc<PortStatus>,
    ) -> Self {
        let port = Self {
            direction,
            muted: false,
            merge: MidiMergeBuffer::with_capacity(merge_capacity),
            messages: Vec::with_capacity(merge_capacity),
            pending: Vec::with_capacity(merge_capacity),
            ring: MidiRingbuffer::new(0, ring_capacity),
            input_state: Box::new(MidiStateTracker::new()),
            tail_state: Box::new(MidiStateTracker::new()),
            n_dropped: 0,
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

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.publish();
    }

    #[inline]
    pub fn ringbuffer_samples(&self) -> u32 {
        self.ring.n_samples()
    }

    /// Change the capture depth; 0 keeps only the running cycle
    pub fn set_ringbuffer_samples(&mut self, n_samples: u32) {
        self.ring.set_n_samples(n_samples);
        self.publish();
    }

    pub fn ringbuffer(&self) -> (&MidiRingbuffer, &MidiStateTracker) {
        (&self.ring, &self.tail_state)
    }

    /// Notes and controllers as last seen on this port
    pub fn input_state(&self) -> &MidiStateTracker {
        &self.input_state
    }

    pub fn prepare(&mut self, n_frames: u32) {
        self.merge.clear();
        self.messages.clear();
        self.pending.clear();
        let tail = &mut self.tail_state;
        self.ring
            .next_buffer(n_frames, |msg| tail.process_msg(msg.bytes()));
    }

    /// Add one message of the running cycle
    pub fn write(&mut self, msg: MidiMessage) {
        if self.merge.write_value(msg).is_err() {
            self.n_dropped += 1;
        }
    }

    /// Buffer that channel playback appends to
    pub fn pending_mut(&mut self) -> &mut Vec<MidiMessage> {
        &mut self.pending
    }

    /// Sort everything written this cycle and update state and ring
    pub fn finish(&mut self) {
        for i in 0..self.pending.len() {
            let msg = self.pending[i];
            self.write(msg);
        }
        self.pending.clear();
        self.merge.sort();
        if !self.muted {
            if let Ok(sorted) = self.merge.messages() {
                self.messages.extend(sorted.copied());
            }
        }
        if self.direction == PortDirection::Input {
            for msg in &self.messages {
                self.input_state.process_msg(msg.bytes());
                if let Some(evicted) = self.ring.put(*msg) {
                    self.tail_state.process_msg(evicted.bytes());
                }
            }
        }
        let n = u32::try_from(self.messages.len()).unwrap_or(u32::MAX);
        match self.direction {
            PortDirection::Input => self.status.add_events(n, 0),
            PortDirection::Output => self.status.add_events(0, n),
        }
        if self.n_dropped > 0 {
            log::warn!(
                "MIDI port dropped {} message(s): merge buffer full",
                self.n_dropped
            );
            self.n_dropped = 0;
        }
    }

    /// This cycle's messages in time order, valid after `finish`
    #[inline]
    pub fn messages(&self) -> &[MidiMessage] {
        &self.messages
    }

    fn publish(&self) {
        self.status
            .set_settings(1.0, self.muted, self.ring.n_samples());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_midi::MidiStorage;

    fn port(direction: PortDirection) -> MidiPort {
        MidiPort::new(direction, 16, 16, Arc::new(PortStatus::new()))
    }

    fn times(msgs: &[MidiMessage]) -> Vec<u32> {
        msgs.iter().map(|m| m.time()).collect()
    }

    #[test]
    fn test_merges_sources_in_time_order() {
        let mut p = port(PortDirection::Output);
        p.prepare(16);
        p.write(MidiMessage::short(9, 0x90, 60, 100));
        p.pending_mut().push(MidiMessage::short(2, 0x90, 61, 100));
        p.write(MidiMessage::short(5, 0x80, 60, 0));
        p.finish();
        assert_eq!(times(p.messages()), vec![2, 5, 9]);
        assert_eq!(p.status().take_event_counts(), (0, 3));

        p.prepare(16);
        p.finish();
        assert!(p.messages().is_empty());
    }

    #[test]
    fn test_input_tracks_state_and_ring() {
        let mut p = port(PortDirection::Input);
        p.set_ringbuffer_samples(10);
        p.prepare(8);
        p.write(MidiMessage::short(1, 0xB0, 7, 90));
        p.write(MidiMessage::short(3, 0x90, 60, 100));
        p.finish();
        assert_eq!(p.input_state().cc_value(0, 7), Some(90));
        assert_eq!(p.input_state().n_notes_active(), 1);

        // The CC falls out of the 10-sample window and lands in the tail
        p.prepare(4);
        p.finish();
        let (ring, tail) = p.ringbuffer();
        assert_eq!(tail.cc_value(0, 7), Some(90));
        let mut snap = MidiStorage::with_capacity(8);
        ring.snapshot(&mut snap).unwrap();
        assert_eq!(times(snap.events()), vec![1]);
    }

    #[test]
    fn test_muted_port_passes_nothing() {
        let mut p = port(PortDirection::Input);
        p.set_muted(true);
        p.prepare(4);
        p.write(MidiMessage::short(0, 0x90, 60, 100));
        p.finish();
        assert!(p.messages().is_empty());
        assert_eq!(p.input_state().n_notes_active(), 0);
    }
}
