//! MIDI channel
//!
//! Same two-phase scheme as the audio channel: [`MidiChannel::process`]
//! queues [`MidiCommand`]s while the loop advances, and
//! [`MidiChannel::finalize`] runs them against the cycle's input messages
//! and output list.
//!
//! Three state trackers follow the streams:
//! - `input_state` tracks everything arriving at the input, recording or not.
//! - `start_state` is a snapshot of the input state taken when recording
//!   started. It is what a listener must be in before the first recorded
//!   event replays.
//! - `output_state` tracks what was sent out, so a playback restart only
//!   sends the difference.

use std::sync::Arc;

use looper_midi::{
    MidiMessage, MidiRingbuffer, MidiSequenceEvent, MidiStateTracker, MidiStorage,
    MidiStorageCursor, ALL_SOUND_OFF_CC, STATE_RESTORE_TIME,
};

use crate::error::{LooperError, LooperResult};
use crate::looping::audio_channel::StoreTarget;
use crate::looping::mode::{channel_process_params, ProcessFlags};
use crate::looping::status::{ChannelStatus, Published};
use crate::looping::transport::{clamp_u32, ChannelContext, PoiQuery};
use crate::types::ChannelMode;

const COMMAND_CAPACITY: usize = 64;

/// Deferred MIDI operation, executed by [`MidiChannel::finalize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiCommand {
    /// Silence whatever the last playback left sounding
    AllSoundOff { frame: u32 },
    /// Send stored events in `[position, position + n)`
    Playback {
        frame: u32,
        n: u32,
        position: i64,
        /// Rewind the cursor and restore the recording-start state first
        restart: bool,
    },
    /// Store input events of `[frame, frame + n)` from `record_from` on
    Record {
        frame: u32,
        n: u32,
        record_from: usize,
        target: StoreTarget,
    },
    PromotePreRecord,
    DiscardPreRecord,
}

/// MIDI record/playback unit of a loop
pub struct MidiChannel {
    storage: MidiStorage,
    prerecord: MidiStorage,
    cursor: MidiStorageCursor,
    data_length: usize,
    prerecord_length: usize,
    start_offset: i64,
    pre_play_samples: usize,
    mode: ChannelMode,
    played_back_sample: Option<usize>,
    last_played_end: Option<i64>,
    prev_pos_after: usize,
    data_seq_nr: u64,
    prev_flags: ProcessFlags,
    input_state: Box<MidiStateTracker>,
    start_state: Box<MidiStateTracker>,
    prerecord_start_state: Box<MidiStateTracker>,
    output_state: Box<MidiStateTracker>,
    restore: Box<MidiStateTracker>,
    restore_pending: bool,
    commands: Vec<MidiCommand>,
    cycle_frames: u32,
    frames_processed: u32,
    has_input: bool,
    has_output: bool,
    n_dropped: usize,
    status: Arc<ChannelStatus>,
}

impl std::fmt::Debug for MidiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiChannel")
            .field("mode", &self.mode)
            .field("events", &self.storage.len())
            .field("data_length", &self.data_length)
            .field("start_offset", &self.start_offset)
            .finish()
    }
}

impl MidiChannel {
    /// Create a channel storing up to `capacity` events
    pub fn new(capacity: usize, mode: ChannelMode) -> Self {
        let channel = Self {
            storage: MidiStorage::with_capacity(capacity),
            prerecord: MidiStorage::with_capacity(capacity),
            cursor: MidiStorageCursor::new(),
            data_length: 0,
            prerecord_length: 0,
            start_offset: 0,
            pre_play_samples: 0,
            mode,
            played_back_sample: None,
            last_played_end: None,
            prev_pos_after: 0,
            data_seq_nr: 0,
            prev_flags: ProcessFlags::NONE,
            input_state: Box::default(),
            start_state: Box::default(),
            prerecord_start_state: Box::default(),
            output_state: Box::default(),
            restore: Box::default(),
            restore_pending: false,
            commands: Vec::with_capacity(COMMAND_CAPACITY),
            cycle_frames: 0,
            frames_processed: 0,
            has_input: false,
            has_output: false,
            n_dropped: 0,
            status: Arc::new(ChannelStatus::new()),
        };
        channel.publish();
        channel
    }

    pub fn status(&self) -> Arc<ChannelStatus> {
        Arc::clone(&self.status)
    }

    #[inline]
    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ChannelMode) {
        self.mode = mode;
        self.publish();
    }

    #[inline]
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn set_data_length(&mut self, length: usize) {
        if length != self.data_length {
            self.data_length = length;
            self.data_changed();
        }
    }

    #[inline]
    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    pub fn set_start_offset(&mut self, offset: i64) {
        self.start_offset = offset;
        self.publish();
    }

    #[inline]
    pub fn pre_play_samples(&self) -> usize {
        self.pre_play_samples
    }

    pub fn set_pre_play_samples(&mut self, samples: usize) {
        self.pre_play_samples = samples;
        self.publish();
    }

    #[inline]
    pub fn played_back_sample(&self) -> Option<usize> {
        self.played_back_sample
    }

    #[inline]
    pub fn data_seq_nr(&self) -> u64 {
        self.data_seq_nr
    }

    #[inline]
    pub fn n_events(&self) -> usize {
        self.storage.len()
    }

    /// Notes currently held at the output
    #[inline]
    pub fn n_notes_active(&self) -> u32 {
        self.output_state.n_notes_active()
    }

    fn data_changed(&mut self) {
        self.data_seq_nr += 1;
        self.publish();
    }

    fn publish(&self) {
        self.status.publish(&Published {
            mode: self.mode,
            length: self.data_length,
            start_offset: self.start_offset,
            pre_play_samples: self.pre_play_samples,
            played_back_sample: self.played_back_sample,
            data_seq_nr: self.data_seq_nr,
            gain: 1.0,
            n_notes_active: self.output_state.n_notes_active(),
        });
    }

    pub fn prepare(&mut self, n_frames: u32, has_input: bool, has_output: bool) {
        self.cycle_frames = n_frames;
        self.frames_processed = 0;
        self.has_input = has_input;
        self.has_output = has_output;
        self.commands.clear();
    }

    fn mask_flags(&self, mut flags: ProcessFlags) -> ProcessFlags {
        if !self.has_input {
            flags.remove(ProcessFlags::RECORD | ProcessFlags::REPLACE | ProcessFlags::PRERECORD);
        }
        if !self.has_output {
            flags.remove(ProcessFlags::PLAYBACK);
        }
        // Events cannot be overwritten in place
        flags.remove(ProcessFlags::REPLACE);
        flags
    }

    pub fn next_poi(&self, query: &PoiQuery) -> Option<u32> {
        if self.mode == ChannelMode::Disabled {
            return None;
        }
        let params = channel_process_params(
            query.mode,
            &query.next,
            query.position,
            self.start_offset,
            self.mode,
        );
        let flags = self.mask_flags(params.flags);
        let remaining = self.cycle_frames.saturating_sub(self.frames_processed);
        let busy = flags.intersects(
            ProcessFlags::PLAYBACK | ProcessFlags::RECORD | ProcessFlags::PRERECORD,
        );
        (busy && remaining > 0).then_some(remaining)
    }

    pub fn process(&mut self, ctx: &ChannelContext) -> LooperResult<()> {
        let n = ctx.n_frames;
        if self.frames_processed + n > self.cycle_frames {
            return Err(LooperError::OutOfBounds {
                what: "MIDI channel cycle",
                position: i64::from(self.frames_processed + n),
                length: self.cycle_frames as usize,
            });
        }
        let params = channel_process_params(
            ctx.mode,
            &ctx.next,
            ctx.pos_before,
            self.start_offset,
            self.mode,
        );
        let flags = self.mask_flags(params.flags);
        let frame = self.frames_processed;

        if self.prev_flags.contains(ProcessFlags::PLAYBACK) {
            let wrapped = ctx.pos_before == 0 && self.prev_pos_after >= ctx.len_before;
            let jumped = ctx.pos_before != self.prev_pos_after && !wrapped;
            if !flags.contains(ProcessFlags::PLAYBACK) || jumped {
                self.commands.push(MidiCommand::AllSoundOff { frame });
                self.last_played_end = None;
            }
        }

        if !flags.contains(ProcessFlags::PRERECORD) && self.prev_flags.contains(ProcessFlags::PRERECORD)
        {
            if flags.contains(ProcessFlags::RECORD) {
                self.commands.push(MidiCommand::PromotePreRecord);
                self.data_length = self.prerecord_length;
                self.start_offset = self.prerecord_length as i64;
            } else {
                self.commands.push(MidiCommand::DiscardPreRecord);
            }
            self.prerecord_length = 0;
        }

        if flags.contains(ProcessFlags::PLAYBACK) {
            self.played_back_sample = usize::try_from(params.position).ok();
            self.queue_playback(frame, params.position, n);
        } else {
            self.played_back_sample = None;
            self.last_played_end = None;
        }
        if flags.contains(ProcessFlags::RECORD) {
            let record_from = (ctx.len_before as i64 + self.start_offset).max(0) as usize;
            self.commands.push(MidiCommand::Record {
                frame,
                n,
                record_from,
                target: StoreTarget::Main,
            });
            self.data_length = record_from + n as usize;
            self.data_seq_nr += 1;
        }
        if flags.contains(ProcessFlags::PRERECORD) {
            self.commands.push(MidiCommand::Record {
                frame,
                n,
                record_from: self.prerecord_length,
                target: StoreTarget::PreRecord,
            });
            self.prerecord_length += n as usize;
        }

        self.prev_flags = flags;
        self.prev_pos_after = ctx.pos_after;
        self.frames_processed += n;
        Ok(())
    }

    fn queue_playback(&mut self, frame: u32, position: i64, n: u32) {
        let restart = self.last_played_end.map_or(true, |end| end > position);
        let first_playable = (self.start_offset - self.pre_play_samples as i64).max(0);
        let skip = clamp_u32((first_playable - position).max(0) as usize).min(n);
        self.commands.push(MidiCommand::Playback {
            frame: frame + skip,
            n: n - skip,
            position: position + i64::from(skip),
            restart,
        });
        self.last_played_end = Some(position + i64::from(n));
    }

    /// Execute the queued commands
    ///
    /// `input` holds this cycle's input messages in time order, with times
    /// as frame offsets. Messages for playback are appended to `output`
    /// without growing it past its capacity.
    pub fn finalize(
        &mut self,
        input: Option<&[MidiMessage]>,
        mut output: Option<&mut Vec<MidiMessage>>,
    ) -> LooperResult<()> {
        let mut result = Ok(());
        let mut fed = 0;
        let mut triggered = 0;
        for i in 0..self.commands.len() {
            let cmd = self.commands[i];
            let step = match cmd {
                MidiCommand::AllSoundOff { frame } => match output.as_deref_mut() {
                    Some(out) => {
                        let bytes = [0xB0, ALL_SOUND_OFF_CC, 0];
                        self.output_state.process_msg(&bytes);
                        self.emit(out, MidiMessage::short(frame, bytes[0], bytes[1], bytes[2]));
                        Ok(())
                    }
                    None => Err(LooperError::MissingBuffer("MIDI channel playback target")),
                },
                MidiCommand::Playback {
                    frame,
                    n,
                    position,
                    restart,
                } => match output.as_deref_mut() {
                    Some(out) => {
                        triggered += self.run_playback(out, frame, n, position, restart);
                        Ok(())
                    }
                    None => Err(LooperError::MissingBuffer("MIDI channel playback target")),
                },
                MidiCommand::Record {
                    frame,
                    n,
                    record_from,
                    target,
                } => match input {
                    Some(input) => self.run_record(input, &mut fed, frame, n, record_from, target),
                    None => Err(LooperError::MissingBuffer("MIDI channel recording source")),
                },
                MidiCommand::PromotePreRecord => {
                    self.storage.swap(&mut self.prerecord);
                    self.prerecord.clear();
                    self.start_state.clone_from(&self.prerecord_start_state);
                    self.cursor.reset();
                    Ok(())
                }
                MidiCommand::DiscardPreRecord => {
                    self.prerecord.clear();
                    Ok(())
                }
            };
            if let Err(e) = step {
                result = Err(e);
            }
        }
        if let Some(input) = input {
            for msg in input.iter().skip(fed) {
                self.input_state.process_msg(msg.bytes());
            }
        }
        self.commands.clear();
        if self.n_dropped > 0 {
            log::warn!("MIDI channel output full, dropped {} message(s)", self.n_dropped);
            self.n_dropped = 0;
        }
        self.status.add_events_triggered(triggered);
        self.publish();
        result
    }

    fn emit(&mut self, out: &mut Vec<MidiMessage>, msg: MidiMessage) -> bool {
        let pushed = push_bounded(out, msg);
        if !pushed {
            self.n_dropped += 1;
        }
        pushed
    }

    fn run_playback(
        &mut self,
        out: &mut Vec<MidiMessage>,
        frame: u32,
        n: u32,
        position: i64,
        restart: bool,
    ) -> u32 {
        if restart {
            self.cursor.reset();
            self.restore.clone_from(&self.start_state);
            self.restore_pending = true;
        }
        let (mut frame, mut n, mut position) = (frame, n, position);
        if position < 0 {
            let skip = clamp_u32(position.unsigned_abs() as usize).min(n);
            frame += skip;
            n -= skip;
            position += i64::from(skip);
        }
        if n == 0 || position < 0 {
            return 0;
        }
        let start = clamp_u32(position as usize);
        let end = start
            .saturating_add(n)
            .min(clamp_u32(self.data_length.max(position as usize)));

        let restore_pending = self.restore_pending;
        let restore = &mut self.restore;
        self.cursor.find_time_forward(&self.storage, start, |m| {
            if restore_pending {
                restore.process_msg(m.bytes());
            }
        });

        if self.restore_pending {
            self.restore_pending = false;
            let mut dropped = 0;
            self.restore.for_each_diff_message(Some(&*self.output_state), |bytes| {
                match MidiMessage::new(frame, bytes) {
                    Ok(msg) if push_bounded(out, msg) => {}
                    _ => dropped += 1,
                }
            });
            self.n_dropped += dropped;
            self.output_state.clone_from(&self.restore);
        }

        let mut emitted = 0;
        while let Some(msg) = self.cursor.peek(&self.storage) {
            let t = msg.time();
            if t >= end {
                break;
            }
            let msg = *msg;
            self.cursor.advance(&self.storage);
            self.output_state.process_msg(msg.bytes());
            if self.emit(out, msg.with_time(frame + (t - start))) {
                emitted += 1;
            }
        }
        emitted
    }

    fn run_record(
        &mut self,
        input: &[MidiMessage],
        fed: &mut usize,
        frame: u32,
        n: u32,
        record_from: usize,
        target: StoreTarget,
    ) -> LooperResult<()> {
        // Bring the input state up to the start of this chunk
        while let Some(msg) = input.get(*fed).filter(|m| m.time() < frame) {
            self.input_state.process_msg(msg.bytes());
            *fed += 1;
        }

        let (storage, start_state) = match target {
            StoreTarget::Main => (&mut self.storage, &mut self.start_state),
            StoreTarget::PreRecord => (&mut self.prerecord, &mut self.prerecord_start_state),
        };
        let record_from = clamp_u32(record_from);
        storage.truncate_from(record_from);
        if record_from == 0 {
            start_state.clone_from(&self.input_state);
        }
        if target == StoreTarget::Main {
            self.cursor.reset();
        }

        let end = frame + n;
        let mut result = Ok(());
        while let Some(msg) = input.get(*fed).filter(|m| m.time() < end) {
            self.input_state.process_msg(msg.bytes());
            let time = record_from + (msg.time() - frame);
            if let Err(e) = storage.append(msg.with_time(time)) {
                result = Err(e.into());
            }
            *fed += 1;
        }
        result
    }

    /// Replace the content
    ///
    /// Events with a negative time are state restore messages: they are
    /// folded into the recording-start state instead of being stored.
    pub fn load_data(&mut self, events: &[MidiSequenceEvent], length: usize) -> LooperResult<()> {
        let mut storage = MidiStorage::with_capacity(self.storage.capacity());
        let mut start_state = MidiStateTracker::new();
        for event in events {
            if event.is_state_restore() {
                start_state.process_msg(&event.data);
                continue;
            }
            let time = u32::try_from(event.time)
                .map_err(|_| LooperError::InvalidArgument("MIDI event time out of range"))?;
            storage.append_bytes(time, &event.data)?;
        }
        self.storage = storage;
        *self.start_state = start_state;
        self.cursor.reset();
        self.data_length = length;
        self.start_offset = 0;
        self.data_changed();
        Ok(())
    }

    /// Restore messages followed by the recorded events
    pub fn get_data(&self) -> Vec<MidiSequenceEvent> {
        let mut out = Vec::with_capacity(self.storage.len());
        self.start_state
            .for_each_catch_up_message(|bytes| out.push(MidiSequenceEvent::new(STATE_RESTORE_TIME, bytes)));
        out.extend(
            self.storage
                .events()
                .iter()
                .map(|m| MidiSequenceEvent::new(i64::from(m.time()), m.bytes())),
        );
        out
    }

    /// Drop all events and restart at `length` samples of silence
    pub fn clear(&mut self, length: usize) {
        self.storage.clear();
        self.prerecord.clear();
        self.prerecord_length = 0;
        self.start_state.clear();
        self.cursor.reset();
        self.data_length = length;
        self.start_offset = 0;
        self.played_back_sample = None;
        self.last_played_end = None;
        self.data_changed();
    }

    /// Take over a capture ring's window
    ///
    /// `tail_state` is the state of everything that already fell out of the
    /// ring. Events more than `keep_before` samples ahead of the start offset
    /// are dropped and folded into the recording-start state.
    pub fn adopt_ringbuffer(
        &mut self,
        ring: &MidiRingbuffer,
        tail_state: &MidiStateTracker,
        reverse_start_offset: Option<usize>,
        keep_before: Option<usize>,
    ) -> LooperResult<()> {
        ring.snapshot(&mut self.storage)?;
        let depth = ring.n_samples() as usize;
        let so = reverse_start_offset.map_or(0, |r| depth.saturating_sub(r));
        let drop_before = keep_before.map_or(0, |keep| so - keep.min(so));

        self.start_state.as_mut().clone_from(tail_state);
        let start_state = &mut self.start_state;
        self.storage
            .drop_before(clamp_u32(drop_before), |m| start_state.process_msg(m.bytes()));
        self.cursor.reset();
        log::debug!(
            "Adopted {} MIDI events (start offset {}, depth {})",
            self.storage.len(),
            so,
            depth
        );
        self.data_length = depth;
        self.start_offset = so as i64;
        self.data_changed();
        Ok(())
    }
}

/// Push without reallocating; false when `out` is at capacity
fn push_bounded(out: &mut Vec<MidiMessage>, msg: MidiMessage) -> bool {
    if out.len() < out.capacity() {
        out.push(msg);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looping::mode::PlannedTransition;
    use crate::types::LoopMode;

    fn ctx(mode: LoopMode, n: u32, pos: usize, len: usize) -> ChannelContext {
        let pos_after = if mode.is_playing() { (pos + n as usize).min(len) } else { pos };
        ChannelContext {
            mode,
            next: PlannedTransition::default(),
            n_frames: n,
            pos_before: pos,
            pos_after,
            len_before: len,
            len_after: len,
        }
    }

    fn note_on(t: u32, note: u8) -> MidiMessage {
        MidiMessage::short(t, 0x90, note, 100)
    }

    fn note_off(t: u32, note: u8) -> MidiMessage {
        MidiMessage::short(t, 0x80, note, 0)
    }

    fn run(
        chan: &mut MidiChannel,
        c: ChannelContext,
        input: &[MidiMessage],
    ) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::with_capacity(64);
        chan.prepare(c.n_frames, true, true);
        chan.process(&c).unwrap();
        chan.finalize(Some(input), Some(&mut out)).unwrap();
        out.iter().map(|m| (m.time(), m.bytes().to_vec())).collect()
    }

    #[test]
    fn test_record_then_playback() {
        let mut chan = MidiChannel::new(64, ChannelMode::Direct);
        run(
            &mut chan,
            ctx(LoopMode::Recording, 10, 0, 0),
            &[note_on(2, 60), note_off(7, 60)],
        );
        assert_eq!(chan.data_length(), 10);
        assert_eq!(chan.n_events(), 2);

        let out = run(&mut chan, ctx(LoopMode::Playing, 10, 0, 10), &[]);
        assert_eq!(
            out,
            vec![(2, vec![0x90, 60, 100]), (7, vec![0x80, 60, 0])]
        );
        assert_eq!(chan.status().take_n_events_triggered(), 2);
    }

    #[test]
    fn test_stopping_sends_all_sound_off() {
        let mut chan = MidiChannel::new(64, ChannelMode::Direct);
        chan.load_data(&[MidiSequenceEvent::new(1, &[0x90, 64, 90])], 8).unwrap();
        let out = run(&mut chan, ctx(LoopMode::Playing, 4, 0, 8), &[]);
        assert_eq!(out, vec![(1, vec![0x90, 64, 90])]);
        assert_eq!(chan.n_notes_active(), 1);

        let out = run(&mut chan, ctx(LoopMode::Stopped, 4, 0, 8), &[]);
        assert_eq!(out, vec![(0, vec![0xB0, ALL_SOUND_OFF_CC, 0])]);
        assert_eq!(chan.n_notes_active(), 0);
    }

    #[test]
    fn test_restart_restores_recording_start_state() {
        let mut chan = MidiChannel::new(64, ChannelMode::Direct);
        // Controller set before recording starts
        run(
            &mut chan,
            ctx(LoopMode::Stopped, 4, 0, 0),
            &[MidiMessage::short(1, 0xB0, 7, 80)],
        );
        run(&mut chan, ctx(LoopMode::Recording, 8, 0, 0), &[note_on(3, 60)]);

        let restore: Vec<_> = chan
            .get_data()
            .into_iter()
            .filter(|e| e.is_state_restore())
            .collect();
        assert_eq!(restore, vec![MidiSequenceEvent::new(STATE_RESTORE_TIME, &[0xB0, 7, 80])]);

        let out = run(&mut chan, ctx(LoopMode::Playing, 8, 0, 8), &[]);
        assert_eq!(out, vec![(0, vec![0xB0, 7, 80]), (3, vec![0x90, 60, 100])]);
    }

    #[test]
    fn test_mid_loop_start_catches_up_held_notes() {
        let mut chan = MidiChannel::new(64, ChannelMode::Direct);
        chan.load_data(
            &[
                MidiSequenceEvent::new(1, &[0x90, 60, 100]),
                MidiSequenceEvent::new(6, &[0x80, 60, 0]),
            ],
            10,
        )
        .unwrap();
        let out = run(&mut chan, ctx(LoopMode::Playing, 4, 4, 10), &[]);
        // Note 60 was struck before position 4 and is still held
        assert_eq!(out, vec![(0, vec![0x90, 60, 100]), (2, vec![0x80, 60, 0])]);
    }

    #[test]
    fn test_loop_wrap_does_not_cut_notes() {
        let mut chan = MidiChannel::new(64, ChannelMode::Direct);
        chan.load_data(&[MidiSequenceEvent::new(0, &[0x90, 60, 100])], 4).unwrap();
        let out = run(&mut chan, ctx(LoopMode::Playing, 4, 0, 4), &[]);
        assert_eq!(out.len(), 1);
        // Second pass: no all-sound-off, only the held note is struck again
        let out = run(&mut chan, ctx(LoopMode::Playing, 4, 0, 4), &[]);
        assert_eq!(out, vec![(0, vec![0x80, 60, 0x40]), (0, vec![0x90, 60, 100])]);
    }

    #[test]
    fn test_load_rejects_unordered_events() {
        let mut chan = MidiChannel::new(4, ChannelMode::Direct);
        let err = chan.load_data(
            &[
                MidiSequenceEvent::new(5, &[0x90, 60, 100]),
                MidiSequenceEvent::new(2, &[0x80, 60, 0]),
            ],
            10,
        );
        assert!(matches!(err, Err(LooperError::Midi(_))));
    }

    #[test]
    fn test_adopt_folds_dropped_events_into_start_state() {
        let mut ring = MidiRingbuffer::new(20, 64);
        // Park the time counter right below the wrap point
        ring.next_buffer(u32::MAX - 9, |_| {});
        ring.next_buffer(10, |_| {});
        ring.put(MidiMessage::short(2, 0xB0, 1, 33));
        ring.put(note_on(9, 62));
        ring.next_buffer(10, |_| {});
        ring.put(note_on(4, 64));

        let mut chan = MidiChannel::new(64, ChannelMode::Direct);
        let tail = MidiStateTracker::new();
        chan.adopt_ringbuffer(&ring, &tail, Some(6), Some(2)).unwrap();

        assert_eq!(chan.start_offset(), 14);
        assert_eq!(chan.data_length(), 20);
        let data = chan.get_data();
        let restore: Vec<_> = data.iter().filter(|e| e.is_state_restore()).collect();
        let events: Vec<_> = data.iter().filter(|e| !e.is_state_restore()).collect();
        // Events before 12 went into the restore state
        assert_eq!(restore.len(), 2);
        assert_eq!(events, vec![&MidiSequenceEvent::new(14, &[0x90, 64, 100])]);
    }
}
