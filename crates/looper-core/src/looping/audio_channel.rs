//! Audio channel
//!
//! Processing is split in two phases. While the loop advances chunk by
//! chunk, [`AudioChannel::process`] only decides what to copy and queues
//! [`AudioCommand`]s with cycle-frame offsets. Once the loop is done for
//! the cycle, [`AudioChannel::finalize`] runs the queue against the port
//! buffers of that cycle. Effect chains can therefore sit between a dry
//! channel's output and a wet channel's input without forming a cycle.

use std::sync::Arc;

use crate::engine::pool::BufferPool;
use crate::error::{LooperError, LooperResult};
use crate::looping::mode::{channel_process_params, ProcessFlags};
use crate::looping::status::{ChannelStatus, Published};
use crate::looping::store::ChunkedStore;
use crate::looping::transport::{clamp_u32, ChannelContext, PoiQuery};
use crate::port::ringbuffer::AudioRingbuffer;
use crate::types::{ChannelMode, Sample};

/// Commands queued per cycle without reallocating
const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    Main,
    PreRecord,
}

/// Deferred storage operation, executed by [`AudioChannel::finalize`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioCommand {
    /// Copy `n` input samples from cycle frame `frame` into a store
    Copy {
        target: StoreTarget,
        frame: u32,
        position: usize,
        n: u32,
    },
    /// Mix `n` stored samples into the output at cycle frame `frame`
    Playback {
        frame: u32,
        position: usize,
        n: u32,
        gain: f32,
    },
    /// The pre-record store becomes the main store
    PromotePreRecord,
    DiscardPreRecord,
}

/// Audio record/playback unit of a loop
pub struct AudioChannel {
    pool: Arc<BufferPool>,
    store: ChunkedStore,
    prerecord: ChunkedStore,
    data_length: usize,
    prerecord_length: usize,
    start_offset: i64,
    pre_play_samples: usize,
    mode: ChannelMode,
    gain: f32,
    played_back_sample: Option<usize>,
    data_seq_nr: u64,
    prev_flags: ProcessFlags,
    commands: Vec<AudioCommand>,
    cycle_frames: u32,
    frames_processed: u32,
    has_input: bool,
    has_output: bool,
    status: Arc<ChannelStatus>,
}

impl std::fmt::Debug for AudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChannel")
            .field("mode", &self.mode)
            .field("data_length", &self.data_length)
            .field("start_offset", &self.start_offset)
            .field("gain", &self.gain)
            .finish()
    }
}

impl AudioChannel {
    pub fn new(pool: Arc<BufferPool>, mode: ChannelMode) -> Self {
        let buffer_size = pool.buffer_size();
        Self::with_stores(pool, mode, ChunkedStore::new(buffer_size), ChunkedStore::new(buffer_size))
    }

    /// Channel that records up to `reserved_samples` per take
    ///
    /// Recording past the reservation keeps the loop running but stores
    /// silence from there on.
    pub fn with_reserve(pool: Arc<BufferPool>, mode: ChannelMode, reserved_samples: usize) -> Self {
        let buffer_size = pool.buffer_size();
        let store = ChunkedStore::with_reserved(buffer_size, reserved_samples);
        let prerecord = ChunkedStore::with_reserved(buffer_size, reserved_samples);
        Self::with_stores(pool, mode, store, prerecord)
    }

    fn with_stores(pool: Arc<BufferPool>, mode: ChannelMode, store: ChunkedStore, prerecord: ChunkedStore) -> Self {
        let channel = Self {
            pool,
            store,
            prerecord,
            data_length: 0,
            prerecord_length: 0,
            start_offset: 0,
            pre_play_samples: 0,
            mode,
            gain: 1.0,
            played_back_sample: None,
            data_seq_nr: 0,
            prev_flags: ProcessFlags::NONE,
            commands: Vec::with_capacity(COMMAND_CAPACITY),
            cycle_frames: 0,
            frames_processed: 0,
            has_input: false,
            has_output: false,
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
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
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
            gain: self.gain,
            n_notes_active: 0,
        });
    }

    /// Start a new cycle of `n_frames`
    ///
    /// `has_input`/`has_output` tell whether the ports the channel records
    /// from and plays into take part in this cycle.
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
        flags
    }

    /// Samples until this channel runs out of cycle buffer
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

    /// Decide what to do with the next `ctx.n_frames` of the cycle
    pub fn process(&mut self, ctx: &ChannelContext) -> LooperResult<()> {
        let n = ctx.n_frames;
        if self.frames_processed + n > self.cycle_frames {
            return Err(LooperError::OutOfBounds {
                what: "audio channel cycle buffer",
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

        if !flags.contains(ProcessFlags::PRERECORD) && self.prev_flags.contains(ProcessFlags::PRERECORD)
        {
            if flags.contains(ProcessFlags::RECORD) {
                log::debug!("Pre-record end: carrying over {} samples", self.prerecord_length);
                self.commands.push(AudioCommand::PromotePreRecord);
                self.data_length = self.prerecord_length;
                self.start_offset = self.prerecord_length as i64;
            } else {
                log::debug!("Pre-record end: discarding");
                self.commands.push(AudioCommand::DiscardPreRecord);
            }
            self.prerecord_length = 0;
        }

        let mut result = Ok(());
        if flags.contains(ProcessFlags::PLAYBACK) {
            self.played_back_sample = usize::try_from(params.position).ok();
            self.queue_playback(frame, params.position, n);
        } else {
            self.played_back_sample = None;
        }
        if flags.contains(ProcessFlags::RECORD) {
            let record_from = (ctx.len_before as i64 + self.start_offset).max(0) as usize;
            self.commands.push(AudioCommand::Copy {
                target: StoreTarget::Main,
                frame,
                position: record_from,
                n,
            });
            self.data_length = record_from + n as usize;
            self.data_seq_nr += 1;
        }
        if flags.contains(ProcessFlags::REPLACE) {
            result = self.queue_replace(frame, params.position, n);
        }
        if flags.contains(ProcessFlags::PRERECORD) {
            if !self.prev_flags.contains(ProcessFlags::PRERECORD) {
                log::debug!("Pre-record start");
            }
            self.commands.push(AudioCommand::Copy {
                target: StoreTarget::PreRecord,
                frame,
                position: self.prerecord_length,
                n,
            });
            self.prerecord_length += n as usize;
        }

        self.prev_flags = flags;
        self.frames_processed += n;
        result
    }

    fn queue_playback(&mut self, mut frame: u32, mut position: i64, mut n: u32) {
        let first_playable = (self.start_offset - self.pre_play_samples as i64).max(0);
        let skip = (first_playable - position).max(0);
        if skip > 0 {
            let skip = clamp_u32(skip as usize).min(n);
            position += i64::from(skip);
            frame += skip;
            n -= skip;
        }
        if n == 0 || position < 0 {
            return;
        }
        let position = position as usize;
        if position >= self.data_length {
            return;
        }
        let n = n.min(clamp_u32(self.data_length - position));
        self.commands.push(AudioCommand::Playback {
            frame,
            position,
            n,
            gain: self.gain,
        });
    }

    fn queue_replace(&mut self, mut frame: u32, mut position: i64, mut n: u32) -> LooperResult<()> {
        if position < 0 {
            let skip = clamp_u32(position.unsigned_abs() as usize).min(n);
            frame += skip;
            n -= skip;
            position = 0;
        }
        if n == 0 {
            return Ok(());
        }
        let position = position as usize;
        let in_range = self.data_length.saturating_sub(position).min(n as usize) as u32;
        if in_range > 0 {
            self.commands.push(AudioCommand::Copy {
                target: StoreTarget::Main,
                frame,
                position,
                n: in_range,
            });
            self.data_seq_nr += 1;
        }
        if in_range < n {
            return Err(LooperError::OutOfBounds {
                what: "replace",
                position: (position + in_range as usize) as i64,
                length: self.data_length,
            });
        }
        Ok(())
    }

    /// Execute the queued commands against this cycle's port buffers
    ///
    /// `input` is the recording source, `output` the playback target; both
    /// cover the whole cycle.
    pub fn finalize(
        &mut self,
        input: Option<&[Sample]>,
        mut output: Option<&mut [Sample]>,
    ) -> LooperResult<()> {
        let mut result = Ok(());
        let mut peak = 0.0f32;
        for i in 0..self.commands.len() {
            let cmd = self.commands[i];
            let step = match cmd {
                AudioCommand::Copy {
                    target,
                    frame,
                    position,
                    n,
                } => {
                    let src = input
                        .ok_or(LooperError::MissingBuffer("audio channel recording source"))
                        .and_then(|buf| cycle_slice(buf, frame, n, "recording source"));
                    src.map(|src| {
                        let store = match target {
                            StoreTarget::Main => &mut self.store,
                            StoreTarget::PreRecord => &mut self.prerecord,
                        };
                        store.write_within_reserve(position, src, &self.pool);
                    })
                }
                AudioCommand::Playback {
                    frame,
                    position,
                    n,
                    gain,
                } => match output.as_deref_mut() {
                    None => Err(LooperError::MissingBuffer("audio channel playback target")),
                    Some(buf) => cycle_slice_mut(buf, frame, n, "playback target").map(|dst| {
                        peak = peak.max(mix_from_store(&self.store, position, dst, gain));
                    }),
                },
                AudioCommand::PromotePreRecord => {
                    self.store.release_all(&self.pool);
                    self.store.swap(&mut self.prerecord);
                    Ok(())
                }
                AudioCommand::DiscardPreRecord => {
                    self.prerecord.release_all(&self.pool);
                    Ok(())
                }
            };
            if let Err(e) = step {
                result = Err(e);
            }
        }
        self.commands.clear();
        self.status.raise_output_peak(peak);
        self.publish();
        result
    }

    /// Queued commands of the current cycle
    pub fn pending_commands(&self) -> &[AudioCommand] {
        &self.commands
    }

    /// Replace the content with `samples`, starting at offset 0
    pub fn load_data(&mut self, samples: &[Sample]) {
        self.store.release_all(&self.pool);
        self.store.write(0, samples, &self.pool);
        self.data_length = samples.len();
        self.start_offset = 0;
        self.data_changed();
    }

    /// Replace the content with a prepared store
    ///
    /// The previous store comes back emptied, its buffers returned to the
    /// pool, so the caller decides where its buffer list is freed.
    pub fn replace_store(&mut self, mut store: ChunkedStore, length: usize, start_offset: i64) -> ChunkedStore {
        self.store.release_all(&self.pool);
        self.store.swap(&mut store);
        self.data_length = length;
        self.start_offset = start_offset;
        self.data_changed();
        store
    }

    /// Flat copy of the stored samples
    pub fn get_data(&self) -> Vec<Sample> {
        self.store.to_vec(self.data_length)
    }

    /// Reset to `length` samples of silence
    pub fn clear(&mut self, length: usize) {
        self.store.release_all(&self.pool);
        self.prerecord.release_all(&self.pool);
        self.prerecord_length = 0;
        self.store.grow_within_reserve(length, &self.pool);
        self.data_length = length;
        self.start_offset = 0;
        self.played_back_sample = None;
        self.data_changed();
    }

    /// Copy a capture ring into the channel
    ///
    /// `reverse_start_offset` counts back from the newest sample to where
    /// the loop should start; `None` starts at the oldest sample. Whole
    /// leading buffers are dropped while more than `keep_before` samples
    /// (plus one buffer) would remain before the start.
    pub fn adopt_ringbuffer(
        &mut self,
        ring: &AudioRingbuffer,
        reverse_start_offset: Option<usize>,
        keep_before: Option<usize>,
    ) {
        let bs = ring.buffer_size();
        let mut n = ring.n_samples();
        let mut so = reverse_start_offset.map_or(0, |r| n.saturating_sub(r));
        let mut skip = 0;
        if let Some(keep) = keep_before {
            while so > keep + bs {
                so -= bs;
                n -= bs;
                skip += bs;
            }
        }

        self.store.release_all(&self.pool);
        self.store.grow_within_reserve(n, &self.pool);
        let stored = n.min(self.store.capacity());
        let mut done = 0;
        while done < stored {
            let len = self.store.space_in_buffer(done).min(stored - done);
            if let Some(dst) = self.store.slice_at_mut(done, len) {
                ring.read_window(skip + done, dst);
            }
            done += len;
        }
        log::debug!(
            "Adopted {} ringbuffer samples (start offset {}, dropped {})",
            n,
            so,
            skip
        );
        self.data_length = n;
        self.start_offset = so as i64;
        self.data_changed();
    }

    /// Return all storage to the pool
    pub fn release(&mut self) {
        self.store.release_all(&self.pool);
        self.prerecord.release_all(&self.pool);
    }
}

fn cycle_slice<'a>(buf: &'a [Sample], frame: u32, n: u32, what: &'static str) -> LooperResult<&'a [Sample]> {
    let (start, end) = (frame as usize, frame as usize + n as usize);
    buf.get(start..end).ok_or(LooperError::OutOfBounds {
        what,
        position: end as i64,
        length: buf.len(),
    })
}

fn cycle_slice_mut<'a>(
    buf: &'a mut [Sample],
    frame: u32,
    n: u32,
    what: &'static str,
) -> LooperResult<&'a mut [Sample]> {
    let (start, end) = (frame as usize, frame as usize + n as usize);
    let length = buf.len();
    buf.get_mut(start..end).ok_or(LooperError::OutOfBounds {
        what,
        position: end as i64,
        length,
    })
}

/// Add `gain * store[position..]` into `dst`, returning the output peak
fn mix_from_store(store: &ChunkedStore, position: usize, dst: &mut [Sample], gain: f32) -> f32 {
    let mut peak = 0.0f32;
    let mut done = 0;
    while done < dst.len() {
        let pos = position + done;
        let n = store.space_in_buffer(pos).min(dst.len() - done);
        if let Some(src) = store.slice_at(pos, n) {
            for (out, &s) in dst[done..done + n].iter_mut().zip(src) {
                *out += s * gain;
                peak = peak.max(out.abs());
            }
        }
        done += n;
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looping::mode::PlannedTransition;
    use crate::types::LoopMode;

    fn ctx(mode: LoopMode, n: u32, pos: usize, len: usize) -> ChannelContext {
        ChannelContext {
            mode,
            next: PlannedTransition::default(),
            n_frames: n,
            pos_before: pos,
            pos_after: pos,
            len_before: len,
            len_after: len,
        }
    }

    fn channel() -> AudioChannel {
        AudioChannel::new(BufferPool::new(4, 16, 0), ChannelMode::Direct)
    }

    #[test]
    fn test_record_then_playback() {
        let mut chan = channel();
        let input: Vec<Sample> = (1..=8).map(|i| i as Sample).collect();

        chan.prepare(8, true, true);
        chan.process(&ctx(LoopMode::Recording, 5, 0, 0)).unwrap();
        chan.process(&ctx(LoopMode::Recording, 3, 0, 5)).unwrap();
        assert_eq!(chan.data_length(), 8);
        chan.finalize(Some(&input), None).unwrap();
        assert_eq!(chan.get_data(), input);

        let mut out = vec![0.0; 8];
        chan.prepare(8, true, true);
        chan.process(&ctx(LoopMode::Playing, 8, 0, 8)).unwrap();
        assert_eq!(chan.played_back_sample(), Some(0));
        chan.finalize(Some(&[0.0; 8]), Some(&mut out)).unwrap();
        assert_eq!(out, input);
        assert_eq!(chan.status().take_output_peak(), 8.0);
    }

    #[test]
    fn test_recording_past_reservation_stores_silence() {
        let mut chan = AudioChannel::with_reserve(BufferPool::new(4, 16, 0), ChannelMode::Direct, 4);
        let input: Vec<Sample> = (1..=8).map(|i| i as Sample).collect();
        chan.prepare(8, true, false);
        chan.process(&ctx(LoopMode::Recording, 8, 0, 0)).unwrap();
        chan.finalize(Some(&input), None).unwrap();
        assert_eq!(chan.data_length(), 8);
        assert_eq!(chan.get_data(), vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_playback_applies_gain_and_mixes() {
        let mut chan = channel();
        chan.load_data(&[1.0, 2.0, 3.0, 4.0]);
        chan.set_gain(0.5);
        let mut out = vec![1.0; 6];
        chan.prepare(6, false, true);
        chan.process(&ctx(LoopMode::Playing, 6, 1, 4)).unwrap();
        chan.finalize(None, Some(&mut out)).unwrap();
        // Data ends after 3 samples; the rest of the output is untouched
        assert_eq!(out, vec![2.0, 2.5, 3.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_replace_with_negative_position_skips_prefix() {
        let mut chan = channel();
        chan.load_data(&[0.0; 6]);
        chan.set_start_offset(-2);
        chan.prepare(4, true, false);
        chan.process(&ctx(LoopMode::Replacing, 4, 0, 6)).unwrap();
        chan.finalize(Some(&[1.0, 2.0, 3.0, 4.0]), None).unwrap();
        assert_eq!(chan.get_data(), vec![3.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_replace_out_of_bounds() {
        let mut chan = channel();
        chan.load_data(&[0.0; 4]);
        chan.prepare(4, true, false);
        let err = chan.process(&ctx(LoopMode::Replacing, 4, 2, 4)).unwrap_err();
        assert!(matches!(err, LooperError::OutOfBounds { what: "replace", .. }));
        chan.finalize(Some(&[5.0; 4]), None).unwrap();
        assert_eq!(chan.get_data(), vec![0.0, 0.0, 5.0, 5.0]);
    }

    #[test]
    fn test_unconnected_channel_does_nothing() {
        let mut chan = channel();
        chan.prepare(4, false, false);
        let query = PoiQuery {
            mode: LoopMode::Recording,
            next: PlannedTransition::default(),
            position: 0,
            length: 0,
        };
        assert_eq!(chan.next_poi(&query), None);
        chan.process(&ctx(LoopMode::Recording, 4, 0, 0)).unwrap();
        assert!(chan.pending_commands().is_empty());
        assert_eq!(chan.data_length(), 0);
    }

    #[test]
    fn test_prerecord_promoted_into_recording() {
        let mut chan = channel();
        let next = PlannedTransition {
            mode: Some(LoopMode::Recording),
            delay: Some(0),
            eta: Some(3),
        };
        chan.prepare(6, true, false);
        let mut pre = ctx(LoopMode::Stopped, 3, 0, 0);
        pre.next = next;
        chan.process(&pre).unwrap();
        chan.process(&ctx(LoopMode::Recording, 3, 0, 0)).unwrap();
        assert_eq!(chan.start_offset(), 3);
        assert_eq!(chan.data_length(), 6);
        chan.finalize(Some(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), None).unwrap();
        assert_eq!(chan.get_data(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_prerecord_discarded_without_recording() {
        let mut chan = channel();
        let next = PlannedTransition {
            mode: Some(LoopMode::Recording),
            delay: Some(0),
            eta: Some(2),
        };
        chan.prepare(4, true, false);
        let mut pre = ctx(LoopMode::Stopped, 2, 0, 0);
        pre.next = next;
        chan.process(&pre).unwrap();
        chan.process(&ctx(LoopMode::Stopped, 2, 0, 0)).unwrap();
        assert_eq!(
            chan.pending_commands().last(),
            Some(&AudioCommand::DiscardPreRecord)
        );
        chan.finalize(Some(&[1.0; 4]), None).unwrap();
        assert_eq!(chan.data_length(), 0);
        assert_eq!(chan.start_offset(), 0);
    }

    #[test]
    fn test_finalize_without_source_is_an_error() {
        let mut chan = channel();
        chan.prepare(4, true, false);
        chan.process(&ctx(LoopMode::Recording, 4, 0, 0)).unwrap();
        assert_eq!(
            chan.finalize(None, None),
            Err(LooperError::MissingBuffer("audio channel recording source"))
        );
    }

    #[test]
    fn test_adopt_whole_ring() {
        let pool = BufferPool::new(4, 16, 0);
        let mut ring = AudioRingbuffer::new(10, &pool);
        ring.put(&[1.0, 2.0, 3.0]);
        let mut chan = AudioChannel::new(Arc::clone(&pool), ChannelMode::Direct);
        chan.adopt_ringbuffer(&ring, None, None);
        assert_eq!(chan.start_offset(), 0);
        assert_eq!(chan.data_length(), 10);
        let data = chan.get_data();
        assert_eq!(&data[7..], &[1.0, 2.0, 3.0]);
        assert!(data[..7].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_adopt_drops_leading_buffers() {
        let pool = BufferPool::new(2, 32, 0);
        let mut ring = AudioRingbuffer::new(12, &pool);
        let input: Vec<Sample> = (1..=12).map(|i| i as Sample).collect();
        ring.put(&input);
        let mut chan = AudioChannel::new(Arc::clone(&pool), ChannelMode::Direct);
        // Start 3 samples back, keep at most 1 sample (+ one buffer) before it
        chan.adopt_ringbuffer(&ring, Some(3), Some(1));
        assert_eq!(chan.start_offset(), 3);
        assert_eq!(chan.data_length(), 6);
        assert_eq!(chan.get_data(), vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    }
}
