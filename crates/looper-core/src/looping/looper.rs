//! A loop: transport plus the channels it drives

use std::sync::Arc;

use looper_midi::{MidiRingbuffer, MidiStateTracker};

use crate::engine::arena::{ChannelKey, LoopKey, PortKey};
use crate::error::{LooperError, LooperResult};
use crate::looping::audio_channel::AudioChannel;
use crate::looping::midi_channel::MidiChannel;
use crate::looping::poi::min_poi;
use crate::looping::status::ChannelStatus;
use crate::looping::transport::{ChannelContext, LoopChannels, LoopTransport, PoiQuery, SyncView};
use crate::port::ringbuffer::AudioRingbuffer;
use crate::types::{ChannelMode, LoopMode};

/// Channels reserved per loop
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
pub enum ChannelKind {
    Audio(AudioChannel),
    Midi(MidiChannel),
}

/// A channel together with its port connections
#[derive(Debug)]
pub struct LoopChannel {
    key: ChannelKey,
    /// Port recorded from
    pub input: Option<PortKey>,
    /// Port played into
    pub output: Option<PortKey>,
    pub kind: ChannelKind,
}

impl LoopChannel {
    pub fn new(key: ChannelKey, kind: ChannelKind) -> Self {
        Self {
            key,
            input: None,
            output: None,
            kind,
        }
    }

    #[inline]
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn mode(&self) -> ChannelMode {
        match &self.kind {
            ChannelKind::Audio(c) => c.mode(),
            ChannelKind::Midi(c) => c.mode(),
        }
    }

    pub fn status(&self) -> Arc<ChannelStatus> {
        match &self.kind {
            ChannelKind::Audio(c) => c.status(),
            ChannelKind::Midi(c) => c.status(),
        }
    }

    pub fn data_length(&self) -> usize {
        match &self.kind {
            ChannelKind::Audio(c) => c.data_length(),
            ChannelKind::Midi(c) => c.data_length(),
        }
    }

    /// Start a cycle; `live` tells whether a port takes part in it
    pub fn prepare(&mut self, n_frames: u32, live: impl Fn(PortKey) -> bool) {
        let has_input = self.input.map_or(false, &live);
        let has_output = self.output.map_or(false, &live);
        match &mut self.kind {
            ChannelKind::Audio(c) => c.prepare(n_frames, has_input, has_output),
            ChannelKind::Midi(c) => c.prepare(n_frames, has_input, has_output),
        }
    }

    fn next_poi(&self, query: &PoiQuery) -> Option<u32> {
        match &self.kind {
            ChannelKind::Audio(c) => c.next_poi(query),
            ChannelKind::Midi(c) => c.next_poi(query),
        }
    }

    fn process(&mut self, ctx: &ChannelContext) -> LooperResult<()> {
        match &mut self.kind {
            ChannelKind::Audio(c) => c.process(ctx),
            ChannelKind::Midi(c) => c.process(ctx),
        }
    }
}

impl LoopChannels for Vec<LoopChannel> {
    fn next_poi(&self, query: &PoiQuery) -> Option<u32> {
        self.iter()
            .fold(None, |acc, chan| min_poi(acc, chan.next_poi(query)))
    }

    fn process(&mut self, ctx: &ChannelContext) -> LooperResult<()> {
        let mut result = Ok(());
        for chan in self.iter_mut() {
            if let Err(e) = chan.process(ctx) {
                log::error!("Channel {} failed to process: {}", chan.key(), e);
                result = Err(e);
            }
        }
        result
    }
}

/// Capture rings of the ports channels record from
pub trait CaptureRings {
    fn audio_ring(&self, port: PortKey) -> Option<&AudioRingbuffer>;

    /// Ring and the state of everything that already fell out of it
    fn midi_ring(&self, port: PortKey) -> Option<(&MidiRingbuffer, &MidiStateTracker)>;
}

/// Parameters of [`Loop::adopt_ringbuffers`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdoptRequest {
    /// Sync cycles back from the running one where the loop starts
    pub reverse_cycles_start: Option<usize>,
    /// Number of sync cycles to keep
    pub cycles_length: Option<usize>,
    /// Sync cycle to put the loop position at afterwards
    pub go_to_cycle: Option<usize>,
    /// Mode to switch to right away
    pub go_to_mode: Option<LoopMode>,
}

#[derive(Debug, Default)]
pub struct Loop {
    transport: LoopTransport,
    channels: Vec<LoopChannel>,
    sync_source: Option<LoopKey>,
}

impl Loop {
    pub fn new() -> Self {
        Self {
            transport: LoopTransport::new(),
            channels: Vec::with_capacity(CHANNEL_CAPACITY),
            sync_source: None,
        }
    }

    #[inline]
    pub fn sync_source(&self) -> Option<LoopKey> {
        self.sync_source
    }

    pub fn set_sync_source(&mut self, source: Option<LoopKey>) {
        self.sync_source = source;
    }

    /// Schedule a mode change, see [`LoopTransport::plan_transition`]
    pub fn plan_transition(&mut self, mode: LoopMode, delay: u32, wait_for_sync: bool) {
        let has_sync_source = self.sync_source.is_some();
        self.transport
            .plan_transition(mode, delay, wait_for_sync, has_sync_source);
    }

    #[inline]
    pub fn transport(&self) -> &LoopTransport {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut LoopTransport {
        &mut self.transport
    }

    pub fn channels(&self) -> &[LoopChannel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [LoopChannel] {
        &mut self.channels
    }

    pub fn channel(&self, key: ChannelKey) -> Option<&LoopChannel> {
        self.channels.iter().find(|c| c.key == key)
    }

    pub fn channel_mut(&mut self, key: ChannelKey) -> Option<&mut LoopChannel> {
        self.channels.iter_mut().find(|c| c.key == key)
    }

    pub fn add_channel(&mut self, channel: LoopChannel) {
        self.channels.push(channel);
    }

    /// Detach a channel; the caller decides where it gets dropped
    pub fn remove_channel(&mut self, key: ChannelKey) -> Option<LoopChannel> {
        let idx = self.channels.iter().position(|c| c.key == key)?;
        Some(self.channels.remove(idx))
    }

    /// Recompute POI and trigger ETA
    pub fn refresh(&mut self, sync_trigger: Option<u32>) {
        self.transport.refresh(&self.channels, sync_trigger);
    }

    pub fn process(&mut self, n_frames: u32, sync: Option<&SyncView>) -> LooperResult<()> {
        self.transport.process(n_frames, &mut self.channels, sync)
    }

    /// Turn the capture rings of the channels' input ports into loop content
    ///
    /// With a sync source of non-zero length the start is aligned to its
    /// cycles and one extra cycle of history is kept before it. Without
    /// one, whole rings are taken.
    pub fn adopt_ringbuffers(
        &mut self,
        sync: Option<&SyncView>,
        request: &AdoptRequest,
        rings: &impl CaptureRings,
    ) -> LooperResult<()> {
        let (sync_len, sync_pos) = sync.map_or((0, 0), |s| (s.length, s.position));
        let reverse_start_offset = match (request.reverse_cycles_start, request.cycles_length) {
            _ if sync_len == 0 => None,
            (Some(reverse), Some(_)) => Some(sync_pos + sync_len * reverse),
            (None, Some(cycles)) if cycles > 0 => Some(sync_pos + sync_len * (cycles - 1)),
            _ => None,
        };
        let keep_before = Some(sync_len);
        log::debug!(
            "Adopting ringbuffers: {:?}, sync pos {} len {}, reverse start offset {:?}",
            request,
            sync_pos,
            sync_len,
            reverse_start_offset
        );

        let mut audio_length = None;
        let mut midi_length = None;
        let mut result = Ok(());
        for chan in &mut self.channels {
            let Some(port) = chan.input else {
                continue;
            };
            match &mut chan.kind {
                ChannelKind::Audio(c) => match rings.audio_ring(port) {
                    Some(ring) => {
                        c.adopt_ringbuffer(ring, reverse_start_offset, keep_before);
                        audio_length = audio_length.max(Some(c.data_length()));
                    }
                    None => result = Err(LooperError::MissingBuffer("audio capture ring")),
                },
                ChannelKind::Midi(c) => match rings.midi_ring(port) {
                    Some((ring, tail)) => {
                        if let Err(e) =
                            c.adopt_ringbuffer(ring, tail, reverse_start_offset, keep_before)
                        {
                            result = Err(e);
                        }
                        midi_length = midi_length.max(Some(c.data_length()));
                    }
                    None => result = Err(LooperError::MissingBuffer("MIDI capture ring")),
                },
            }
        }

        // Audio content decides; MIDI rings only when there is no audio
        let mut length = audio_length.or(midi_length).unwrap_or(0);
        if let Some(cycles) = request.cycles_length.filter(|_| sync_len > 0) {
            length = length.min(cycles * sync_len);
        }
        if let Some(offset) = reverse_start_offset {
            length = length.min(offset);
        }
        self.transport.set_length(length);
        if let Some(mode) = request.go_to_mode {
            self.transport.plan_transition(mode, 0, false, sync.is_some());
        }
        // After the transition, which may have rewound the loop
        if let Some(cycle) = request.go_to_cycle.filter(|_| sync_len > 0) {
            let position = cycle * sync_len + sync_pos;
            if position < length {
                self.transport.set_position(position);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::{Arena, ArenaKey};
    use crate::engine::pool::BufferPool;
    use looper_midi::MidiMessage;

    struct Rings {
        audio: Option<AudioRingbuffer>,
        midi: Option<(MidiRingbuffer, MidiStateTracker)>,
    }

    impl CaptureRings for Rings {
        fn audio_ring(&self, _port: PortKey) -> Option<&AudioRingbuffer> {
            self.audio.as_ref()
        }

        fn midi_ring(&self, _port: PortKey) -> Option<(&MidiRingbuffer, &MidiStateTracker)> {
            self.midi.as_ref().map(|(r, t)| (r, t))
        }
    }

    fn port_key() -> PortKey {
        let mut ports: Arena<PortKey, ()> = Arena::new();
        ports.insert(())
    }

    fn channel_key(idx: usize) -> ChannelKey {
        let mut chans: Arena<ChannelKey, ()> = Arena::new();
        let mut key = chans.insert(());
        for _ in 0..idx {
            key = chans.insert(());
        }
        key
    }

    /// Loop with one audio channel recording from a ring holding `1..=8`
    /// after `processed` samples went in
    fn audio_setup(processed: usize) -> (Loop, Rings, Arc<BufferPool>) {
        let pool = BufferPool::new(2, 64, 0);
        let mut ring = AudioRingbuffer::new(8, &pool);
        let input: Vec<f32> = (1..=processed).map(|i| i as f32).collect();
        ring.put(&input);
        let mut lp = Loop::new();
        let mut chan = LoopChannel::new(
            channel_key(0),
            ChannelKind::Audio(AudioChannel::new(Arc::clone(&pool), ChannelMode::Direct)),
        );
        chan.input = Some(port_key());
        lp.add_channel(chan);
        let rings = Rings {
            audio: Some(ring),
            midi: None,
        };
        (lp, rings, pool)
    }

    fn adopted_audio(lp: &Loop) -> Vec<f32> {
        let ChannelKind::Audio(c) = &lp.channels()[0].kind else {
            unreachable!()
        };
        let so = c.start_offset() as usize;
        c.get_data()[so..so + lp.transport().length()].to_vec()
    }

    fn sync(length: usize, processed: usize) -> SyncView {
        SyncView {
            mode: LoopMode::Playing,
            position: processed % length,
            length,
            next_trigger: None,
        }
    }

    fn request(reverse: usize, cycles: usize) -> AdoptRequest {
        AdoptRequest {
            reverse_cycles_start: Some(reverse),
            cycles_length: Some(cycles),
            ..Default::default()
        }
    }

    #[test]
    fn test_adopt_previous_cycle() {
        let (mut lp, rings, _pool) = audio_setup(7);
        lp.adopt_ringbuffers(Some(&sync(3, 7)), &request(1, 1), &rings).unwrap();
        assert_eq!(lp.transport().length(), 3);
        assert_eq!(adopted_audio(&lp), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_adopt_cycles_further_back() {
        let (mut lp, rings, _pool) = audio_setup(7);
        lp.adopt_ringbuffers(Some(&sync(2, 7)), &request(2, 1), &rings).unwrap();
        assert_eq!(adopted_audio(&lp), vec![3.0, 4.0]);

        let (mut lp, rings, _pool) = audio_setup(7);
        lp.adopt_ringbuffers(Some(&sync(2, 7)), &request(2, 2), &rings).unwrap();
        assert_eq!(lp.transport().length(), 4);
        assert_eq!(adopted_audio(&lp), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_adopt_running_cycle() {
        let (mut lp, rings, _pool) = audio_setup(8);
        lp.adopt_ringbuffers(Some(&sync(2, 8)), &request(0, 1), &rings).unwrap();
        // Cycle just wrapped: the running cycle has no samples yet
        assert_eq!(lp.transport().length(), 0);

        let (mut lp, rings, _pool) = audio_setup(8);
        lp.adopt_ringbuffers(Some(&sync(2, 8)), &request(1, 1), &rings).unwrap();
        assert_eq!(adopted_audio(&lp), vec![7.0, 8.0]);
    }

    #[test]
    fn test_adopt_partial_running_cycle() {
        // Sync loop of 3 is two samples into its third cycle
        let (mut lp, rings, _pool) = audio_setup(8);
        lp.adopt_ringbuffers(Some(&sync(3, 8)), &request(0, 1), &rings).unwrap();
        assert_eq!(lp.transport().length(), 2);
        assert_eq!(adopted_audio(&lp), vec![7.0, 8.0]);
    }

    #[test]
    fn test_adopt_without_sync_takes_whole_ring() {
        let (mut lp, rings, _pool) = audio_setup(3);
        lp.adopt_ringbuffers(None, &request(0, 1), &rings).unwrap();
        assert_eq!(lp.transport().length(), 8);
        let ChannelKind::Audio(c) = &lp.channels()[0].kind else {
            unreachable!()
        };
        assert_eq!(c.start_offset(), 0);
        assert_eq!(
            c.get_data(),
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_adopt_goes_to_cycle_and_mode() {
        let (mut lp, rings, _pool) = audio_setup(7);
        let req = AdoptRequest {
            go_to_cycle: Some(1),
            go_to_mode: Some(LoopMode::Playing),
            ..request(2, 2)
        };
        lp.adopt_ringbuffers(Some(&sync(2, 7)), &req, &rings).unwrap();
        assert_eq!(lp.transport().mode(), LoopMode::Playing);
        assert_eq!(lp.transport().position(), 3);
    }

    #[test]
    fn test_adopt_midi_near_time_wrap() {
        let mut ring = MidiRingbuffer::new(20, 64);
        // End time 6 samples short of the wrap point
        ring.next_buffer(u32::MAX - 6, |_| {});
        let mut tail = MidiStateTracker::new();
        let msgs = [
            MidiMessage::short(0, 0x90, 10, 10),
            MidiMessage::short(3, 0x80, 10, 20),
            MidiMessage::short(4, 0x90, 20, 20),
            MidiMessage::short(7, 0x80, 20, 20),
            MidiMessage::short(8, 0x90, 30, 30),
        ];
        // Ten samples in cycles of 4 samples
        for (start, n) in [(0u32, 4u32), (4, 4), (8, 2)] {
            ring.next_buffer(n, |m| tail.process_msg(m.bytes()));
            for m in msgs.iter().filter(|m| (start..start + n).contains(&m.time())) {
                ring.put(m.with_time(m.time() - start));
            }
        }

        let adopt = |reverse: usize| {
            let mut lp = Loop::new();
            let mut chan = LoopChannel::new(
                channel_key(0),
                ChannelKind::Midi(MidiChannel::new(64, ChannelMode::Direct)),
            );
            chan.input = Some(port_key());
            lp.add_channel(chan);
            let rings = Rings {
                audio: None,
                midi: Some((ring.clone(), tail.clone())),
            };
            lp.adopt_ringbuffers(Some(&sync(4, 10)), &request(reverse, 1), &rings)
                .unwrap();
            let ChannelKind::Midi(c) = &lp.channels()[0].kind else {
                unreachable!()
            };
            let times: Vec<i64> = c
                .get_data()
                .iter()
                .filter(|e| !e.is_state_restore())
                .map(|e| e.time)
                .collect();
            (c.start_offset(), times)
        };

        let (so, times) = adopt(2);
        assert_eq!(so, 10);
        assert_eq!(times, vec![10, 13, 14, 17, 18]);

        let (so, times) = adopt(0);
        assert_eq!(so, 18);
        assert_eq!(times, vec![14, 17, 18]);
    }

    #[test]
    fn test_channel_lookup_and_removal() {
        let pool = BufferPool::new(4, 4, 0);
        let mut lp = Loop::new();
        let a = channel_key(0);
        let b = channel_key(1);
        assert_ne!(a.key(), b.key());
        lp.add_channel(LoopChannel::new(
            a,
            ChannelKind::Audio(AudioChannel::new(Arc::clone(&pool), ChannelMode::Direct)),
        ));
        lp.add_channel(LoopChannel::new(
            b,
            ChannelKind::Midi(MidiChannel::new(8, ChannelMode::Wet)),
        ));
        assert_eq!(lp.channel(b).map(|c| c.mode()), Some(ChannelMode::Wet));
        assert!(lp.remove_channel(a).is_some());
        assert!(lp.channel(a).is_none());
        assert_eq!(lp.channels().len(), 1);
    }
}
