//! Running MIDI state
//!
//! [`MidiStateTracker`] follows a message stream and remembers which notes
//! are held and the last value of every controller, program, channel
//! pressure and pitch wheel. From that it can synthesize the messages a
//! listener needs to reach the same state ("catch-up"), either from scratch
//! or starting from another tracker's state.
//!
//! The tracker is a fixed-size value: cloning it is a plain memory copy, so
//! snapshots can be taken on the process thread.

use crate::message::{MidiEvent, ALL_NOTES_OFF_CC, ALL_SOUND_OFF_CC};

const N_CHANNELS: usize = 16;
const N_NOTES: usize = 128;
const UNKNOWN: u8 = 0xFF;
const UNKNOWN_WHEEL: u16 = 0xFFFF;

/// Note, controller and channel state derived from a MIDI stream
#[derive(Clone, PartialEq, Eq)]
pub struct MidiStateTracker {
    /// Velocity of each held note, 0 when released
    notes: [[u8; N_NOTES]; N_CHANNELS],
    n_notes_active: u32,
    /// Last controller values, `UNKNOWN` when never seen
    controls: [[u8; N_NOTES]; N_CHANNELS],
    programs: [u8; N_CHANNELS],
    pressures: [u8; N_CHANNELS],
    pitch_wheels: [u16; N_CHANNELS],
}

impl Default for MidiStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MidiStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiStateTracker")
            .field("n_notes_active", &self.n_notes_active)
            .finish_non_exhaustive()
    }
}

impl MidiStateTracker {
    pub fn new() -> Self {
        Self {
            notes: [[0; N_NOTES]; N_CHANNELS],
            n_notes_active: 0,
            controls: [[UNKNOWN; N_NOTES]; N_CHANNELS],
            programs: [UNKNOWN; N_CHANNELS],
            pressures: [UNKNOWN; N_CHANNELS],
            pitch_wheels: [UNKNOWN_WHEEL; N_CHANNELS],
        }
    }

    /// Forget all state
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Update state from one raw message
    ///
    /// Messages that carry no trackable state are ignored.
    pub fn process_msg(&mut self, data: &[u8]) {
        let Some(event) = MidiEvent::parse(data) else {
            return;
        };
        match event {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => self.set_note(channel, note, velocity),
            MidiEvent::NoteOff { channel, note, .. } => self.set_note(channel, note, 0),
            MidiEvent::ControlChange { channel, cc, value } => {
                if cc == ALL_NOTES_OFF_CC || cc == ALL_SOUND_OFF_CC {
                    self.release_channel(channel);
                } else if (cc as usize) < N_NOTES {
                    self.controls[channel as usize][cc as usize] = value & 0x7F;
                }
            }
            MidiEvent::ProgramChange { channel, program } => {
                self.programs[channel as usize] = program & 0x7F;
            }
            MidiEvent::ChannelPressure { channel, value } => {
                self.pressures[channel as usize] = value & 0x7F;
            }
            MidiEvent::PitchWheel { channel, value } => {
                self.pitch_wheels[channel as usize] = value;
            }
            MidiEvent::PolyPressure { .. } => {}
        }
    }

    fn set_note(&mut self, channel: u8, note: u8, velocity: u8) {
        let slot = &mut self.notes[channel as usize][(note & 0x7F) as usize];
        match (*slot > 0, velocity > 0) {
            (false, true) => self.n_notes_active += 1,
            (true, false) => self.n_notes_active -= 1,
            _ => {}
        }
        *slot = velocity;
    }

    fn release_channel(&mut self, channel: u8) {
        for note in 0..N_NOTES {
            self.set_note(channel, note as u8, 0);
        }
    }

    /// Number of notes currently held, across all channels
    #[inline]
    pub fn n_notes_active(&self) -> u32 {
        self.n_notes_active
    }

    /// Velocity of a held note, `None` when released
    pub fn note_velocity(&self, channel: u8, note: u8) -> Option<u8> {
        match self.notes[(channel & 0x0F) as usize][(note & 0x7F) as usize] {
            0 => None,
            v => Some(v),
        }
    }

    pub fn cc_value(&self, channel: u8, cc: u8) -> Option<u8> {
        known(self.controls[(channel & 0x0F) as usize][(cc & 0x7F) as usize])
    }

    pub fn program(&self, channel: u8) -> Option<u8> {
        known(self.programs[(channel & 0x0F) as usize])
    }

    pub fn channel_pressure(&self, channel: u8) -> Option<u8> {
        known(self.pressures[(channel & 0x0F) as usize])
    }

    pub fn pitch_wheel(&self, channel: u8) -> Option<u16> {
        match self.pitch_wheels[(channel & 0x0F) as usize] {
            UNKNOWN_WHEEL => None,
            v => Some(v),
        }
    }

    /// Emit the messages that bring a fresh listener to this state
    ///
    /// Order: programs, controllers, channel pressure, pitch wheel, then
    /// note-ons for held notes, so that sounding notes start with the right
    /// patch and controller settings.
    pub fn for_each_catch_up_message(&self, mut emit: impl FnMut(&[u8])) {
        self.for_each_diff_message(None, &mut emit);
    }

    /// Emit the messages that bring a listener in state `from` to this state
    ///
    /// Notes held in `from` but not here are released; notes held here but
    /// not in `from` (or with a different velocity) are (re)started. Values
    /// only known in `from` are left alone since there is nothing to restore.
    pub fn for_each_diff_message(&self, from: Option<&Self>, mut emit: impl FnMut(&[u8])) {
        for ch in 0..N_CHANNELS {
            let status_ch = ch as u8;
            let program = self.programs[ch];
            if program != UNKNOWN && from.map_or(true, |f| f.programs[ch] != program) {
                emit(&[0xC0 | status_ch, program]);
            }
            for cc in 0..N_NOTES {
                let value = self.controls[ch][cc];
                if value != UNKNOWN && from.map_or(true, |f| f.controls[ch][cc] != value) {
                    emit(&[0xB0 | status_ch, cc as u8, value]);
                }
            }
            let pressure = self.pressures[ch];
            if pressure != UNKNOWN && from.map_or(true, |f| f.pressures[ch] != pressure) {
                emit(&[0xD0 | status_ch, pressure]);
            }
            let wheel = self.pitch_wheels[ch];
            if wheel != UNKNOWN_WHEEL && from.map_or(true, |f| f.pitch_wheels[ch] != wheel) {
                emit(&[0xE0 | status_ch, (wheel & 0x7F) as u8, ((wheel >> 7) & 0x7F) as u8]);
            }
            for note in 0..N_NOTES {
                let velocity = self.notes[ch][note];
                let previous = from.map_or(0, |f| f.notes[ch][note]);
                if velocity == previous {
                    continue;
                }
                if previous > 0 {
                    emit(&[0x80 | status_ch, note as u8, 0x40]);
                }
                if velocity > 0 {
                    emit(&[0x90 | status_ch, note as u8, velocity]);
                }
            }
        }
    }
}

#[inline]
fn known(value: u8) -> Option<u8> {
    (value != UNKNOWN).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(tracker: &MidiStateTracker, from: Option<&MidiStateTracker>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        tracker.for_each_diff_message(from, |m| out.push(m.to_vec()));
        out
    }

    #[test]
    fn test_tracks_notes_and_counts() {
        let mut t = MidiStateTracker::new();
        t.process_msg(&[0x90, 60, 100]);
        t.process_msg(&[0x91, 62, 90]);
        t.process_msg(&[0x90, 60, 110]);
        assert_eq!(t.n_notes_active(), 2);
        assert_eq!(t.note_velocity(0, 60), Some(110));

        t.process_msg(&[0x80, 60, 0]);
        t.process_msg(&[0x91, 62, 0]);
        assert_eq!(t.n_notes_active(), 0);
        assert_eq!(t.note_velocity(1, 62), None);
    }

    #[test]
    fn test_all_notes_off_releases_channel_only() {
        let mut t = MidiStateTracker::new();
        t.process_msg(&[0x90, 60, 100]);
        t.process_msg(&[0x90, 64, 100]);
        t.process_msg(&[0x92, 67, 100]);
        t.process_msg(&[0xB0, ALL_NOTES_OFF_CC, 0]);
        assert_eq!(t.n_notes_active(), 1);
        assert_eq!(t.note_velocity(2, 67), Some(100));
        assert_eq!(t.cc_value(0, ALL_NOTES_OFF_CC), None);
    }

    #[test]
    fn test_controls_and_channel_state() {
        let mut t = MidiStateTracker::new();
        assert_eq!(t.cc_value(0, 7), None);
        t.process_msg(&[0xB0, 7, 99]);
        t.process_msg(&[0xC3, 12]);
        t.process_msg(&[0xD3, 50]);
        t.process_msg(&[0xE3, 0x00, 0x40]);
        assert_eq!(t.cc_value(0, 7), Some(99));
        assert_eq!(t.program(3), Some(12));
        assert_eq!(t.channel_pressure(3), Some(50));
        assert_eq!(t.pitch_wheel(3), Some(0x2000));
    }

    #[test]
    fn test_catch_up_from_scratch() {
        let mut t = MidiStateTracker::new();
        t.process_msg(&[0x90, 60, 100]);
        t.process_msg(&[0xB0, 1, 64]);
        t.process_msg(&[0xC0, 5]);

        assert_eq!(
            collect(&t, None),
            vec![vec![0xC0, 5], vec![0xB0, 1, 64], vec![0x90, 60, 100]]
        );
    }

    #[test]
    fn test_diff_releases_and_restarts() {
        let mut listener = MidiStateTracker::new();
        listener.process_msg(&[0x90, 60, 100]);
        listener.process_msg(&[0xB0, 1, 64]);

        let mut target = MidiStateTracker::new();
        target.process_msg(&[0x90, 62, 80]);
        target.process_msg(&[0xB0, 1, 64]);

        assert_eq!(
            collect(&target, Some(&listener)),
            vec![vec![0x80, 60, 0x40], vec![0x90, 62, 80]]
        );
    }

    #[test]
    fn test_clone_is_snapshot() {
        let mut t = MidiStateTracker::new();
        t.process_msg(&[0x90, 60, 100]);
        let snapshot = t.clone();
        t.process_msg(&[0x80, 60, 0]);
        assert_eq!(snapshot.n_notes_active(), 1);
        assert_eq!(t.n_notes_active(), 0);
        assert_ne!(snapshot, t);
    }
}
