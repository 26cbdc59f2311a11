//! Property-based tests for the MIDI containers

use looper_midi::{MidiMergeBuffer, MidiMessage, MidiRingbuffer, MidiStateTracker, MidiStorage};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Whatever order producers write in, a sorted merge buffer reads back
    /// in non-decreasing time order and loses nothing.
    #[test]
    fn merge_buffer_reads_sorted(
        values in prop::collection::vec(0u32..512, 0..64),
        refs in prop::collection::vec(0u32..512, 0..64),
    ) {
        let borrowed: Vec<MidiMessage> = refs
            .iter()
            .map(|&t| MidiMessage::short(t, 0x90, 60, 100))
            .collect();
        let mut buf = MidiMergeBuffer::with_capacity(128);

        // Interleave the two kinds of writes
        let mut vi = values.iter();
        let mut ri = borrowed.iter();
        loop {
            let v = vi.next();
            let r = ri.next();
            if v.is_none() && r.is_none() {
                break;
            }
            if let Some(&t) = v {
                buf.write_value(MidiMessage::short(t, 0x80, 60, 0)).unwrap();
            }
            if let Some(m) = r {
                buf.write_ref(m).unwrap();
            }
        }

        if !buf.is_empty() {
            prop_assert!(buf.messages().is_err());
        }
        buf.sort();
        let times: Vec<u32> = buf.messages().unwrap().map(|m| m.time()).collect();
        prop_assert_eq!(times.len(), values.len() + refs.len());
        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    /// Snapshot times stay within the window no matter where the absolute
    /// counter sits relative to the wrap point.
    #[test]
    fn ringbuffer_snapshot_within_window(
        start in 0u32..64,
        depth in 1u32..256,
        cycles in prop::collection::vec((1u32..64, prop::collection::vec(0u32..64, 0..4)), 1..16),
    ) {
        let mut rb = MidiRingbuffer::new(depth, 256);
        rb.next_buffer(u32::MAX - start, |_| {});
        for (n, frames) in &cycles {
            rb.next_buffer(*n, |_| {});
            let mut sorted = frames.clone();
            sorted.sort_unstable();
            for f in sorted.into_iter().filter(|f| f < n) {
                rb.put(MidiMessage::short(f, 0x90, 60, 100));
            }
        }
        let mut out = MidiStorage::with_capacity(256);
        rb.snapshot(&mut out).unwrap();
        for m in out.events() {
            prop_assert!(m.time() <= depth);
        }
    }

    /// Any note stream ends with as many active notes as it left on.
    #[test]
    fn state_tracker_counts_held_notes(
        events in prop::collection::vec((0u8..4, 0u8..16, any::<bool>()), 0..128),
    ) {
        let mut tracker = MidiStateTracker::new();
        let mut held = std::collections::HashSet::new();
        for (ch, note, on) in events {
            if on {
                tracker.process_msg(&[0x90 | ch, note, 100]);
                held.insert((ch, note));
            } else {
                tracker.process_msg(&[0x80 | ch, note, 0]);
                held.remove(&(ch, note));
            }
        }
        prop_assert_eq!(tracker.n_notes_active() as usize, held.len());

        let mut restarted = 0;
        tracker.for_each_catch_up_message(|m| if m[0] & 0xF0 == 0x90 { restarted += 1 });
        prop_assert_eq!(restarted, held.len());
    }
}
