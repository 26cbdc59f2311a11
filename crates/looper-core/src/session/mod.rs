//! Looper session: the control-side API
//!
//! A [`Session`] owns one [`SessionCore`] behind a command queue and keeps a
//! [`Topology`] mirror of it for validation and scheduling. Handles are
//! generation-checked arena keys; a handle to a destroyed object fails with
//! [`LooperError::Expired`].
//!
//! Structural changes follow one rule so the process thread never runs a
//! schedule that names a missing object:
//!
//! - additions are applied on the process thread first, then a schedule
//!   recompute is requested in the background
//! - removals publish the reduced schedule first, then detach the object
//!   on the process thread and release it here

mod backend;
mod core;

pub use self::backend::Backend;
pub use self::core::{SessionCore, SessionProcessor};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use looper_midi::MidiSequenceEvent;

use self::core::{ChainSlot, PortOrigin, PortSlot};
use crate::audio::{AudioMidiDriver, DriverError, DummyDriver};
use crate::config::EngineConfig;
use crate::engine::arena::{ChainKey, ChannelKey, LoopKey, PortKey};
use crate::engine::gc;
use crate::engine::pool::{BufferPool, PoolRefillThread};
use crate::engine::queue::CommandQueue;
use crate::error::{LooperError, LooperResult};
use crate::fx::{ChainBuffers, ProcessingChain};
use crate::graph::{
    compute_schedule, ChainInfo, ChannelInfo, LoopInfo, PortInfo, PortOwner, ProcessingGraph,
    Schedule, ScheduleWorker, Topology, WorkerStats,
};
use crate::looping::store::store_from_slice;
use crate::looping::{
    AdoptRequest, AudioChannel, ChannelKind, ChannelSnapshot, Loop, LoopChannel, LoopSnapshot,
    MidiChannel,
};
use crate::port::{AudioPort, AudioRingbuffer, MidiPort, Port, PortSnapshot, PortStatus};
use crate::types::{ChannelMode, LoopMode, PortDataType, PortDirection, Sample};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Session {
    config: EngineConfig,
    pool: Arc<BufferPool>,
    queue: CommandQueue<SessionCore>,
    topology: Mutex<Topology>,
    worker: ScheduleWorker,
    driver: Mutex<Option<Box<dyn AudioMidiDriver>>>,
    _refill: PoolRefillThread,
}

impl Session {
    /// Create a session without a driver
    ///
    /// Until [`Session::set_driver`] is called commands run synchronously
    /// on the calling thread.
    pub fn new(config: EngineConfig) -> LooperResult<Self> {
        let pool = BufferPool::new(config.buffer_size, config.pool_buffers, config.pool_low_water);
        let refill = pool.start_refill_thread().map_err(|e| {
            log::error!("Failed to start buffer pool refill thread: {}", e);
            LooperError::Spawn("buffer pool refill")
        })?;
        let worker = ScheduleWorker::start().map_err(|e| {
            log::error!("Failed to start schedule worker: {}", e);
            LooperError::Spawn("schedule worker")
        })?;
        let queue = CommandQueue::new(
            SessionCore::new(config.max_poi_iterations),
            config.command_queue_capacity,
            config.command_timeout(),
        );
        log::info!(
            "Session created ({} pooled buffers of {} samples)",
            config.pool_buffers,
            config.buffer_size
        );
        Ok(Self {
            config,
            pool,
            queue,
            topology: Mutex::new(Topology::new()),
            worker,
            driver: Mutex::new(None),
            _refill: refill,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn topology(&self) -> MutexGuard<'_, Topology> {
        lock(&self.topology)
    }

    /// Finish an addition that was sent to the process thread
    ///
    /// A timed-out command still runs later, so the mirror keeps the new
    /// object; any other failure means it never got there.
    fn commit(
        &self,
        topo: &mut Topology,
        result: LooperResult<()>,
        rollback: impl FnOnce(&mut Topology),
    ) -> LooperResult<()> {
        match result {
            Ok(()) => {
                self.worker.request(topo.clone());
                Ok(())
            }
            Err(LooperError::Timeout) => {
                self.worker.request(topo.clone());
                Err(LooperError::Timeout)
            }
            Err(e) => {
                rollback(topo);
                Err(e)
            }
        }
    }

    // ─── Loops ──────────────────────────────────────────────────────────

    pub fn add_loop(&self) -> LooperResult<LoopKey> {
        let lp = Loop::new();
        let status = lp.transport().status();
        let mut topo = self.topology();
        let key = topo.loops.insert(LoopInfo {
            channels: Vec::new(),
            sync_source: None,
            status,
        });
        let result = self.queue.exec(move |core: &mut SessionCore| {
            core.loops.insert_at(key, lp);
            Ok(())
        });
        self.commit(&mut topo, result, |t| {
            t.loops.remove(key);
        })?;
        log::debug!("Added {}", key);
        Ok(key)
    }

    /// Delete a loop with all its channels
    pub fn delete_loop(&self, key: LoopKey) -> LooperResult<()> {
        let mut topo = self.topology();
        let info = topo.loops.remove(key).ok_or(LooperError::Expired("loop"))?;
        for &chan in &info.channels {
            topo.channels.remove(chan);
        }
        let followers: Vec<LoopKey> = topo.followers(key).collect();
        for follower in followers {
            if let Some(l) = topo.loops.get_mut(follower) {
                l.sync_source = None;
            }
        }
        self.worker.publish_now(&topo)?;
        drop(topo);

        let mut removed = self
            .queue
            .exec_detach(move |core: &mut SessionCore| core.remove_loop(key))?;
        if let Some(lp) = removed.as_mut() {
            for chan in lp.channels_mut() {
                release_channel(chan);
            }
        }
        log::debug!("Deleted {}", key);
        Ok(())
    }

    pub fn loops(&self) -> Vec<LoopKey> {
        self.topology().loops.keys().collect()
    }

    pub fn loop_channels(&self, key: LoopKey) -> LooperResult<Vec<ChannelKey>> {
        self.topology()
            .loops
            .get(key)
            .map(|l| l.channels.clone())
            .ok_or(LooperError::Expired("loop"))
    }

    pub fn loop_state(&self, key: LoopKey) -> LooperResult<LoopSnapshot> {
        self.topology()
            .loops
            .get(key)
            .map(|l| l.status.snapshot())
            .ok_or(LooperError::Expired("loop"))
    }

    // ─── Transport ──────────────────────────────────────────────────────

    /// Let `key` follow the cycles of `source`
    pub fn set_sync_source(&self, key: LoopKey, source: Option<LoopKey>) -> LooperResult<()> {
        let mut topo = self.topology();
        if !topo.loops.contains(key) {
            return Err(LooperError::Expired("loop"));
        }
        if let Some(source) = source {
            if !topo.loops.contains(source) {
                return Err(LooperError::Expired("loop"));
            }
            // Walk the chain of sources; reaching `key` would close a cycle
            let mut cursor = Some(source);
            let mut hops = 0;
            while let Some(current) = cursor {
                if current == key {
                    return Err(LooperError::InvalidArgument(
                        "sync sources would form a cycle",
                    ));
                }
                hops += 1;
                if hops > topo.loops.len() {
                    break;
                }
                cursor = topo.loops.get(current).and_then(|l| l.sync_source);
            }
        }
        self.queue.exec(move |core: &mut SessionCore| {
            core.loop_mut(key)?.set_sync_source(source);
            Ok(())
        })?;
        if let Some(info) = topo.loops.get_mut(key) {
            info.sync_source = source;
        }
        Ok(())
    }

    /// Plan the same transition on several loops in one cycle
    pub fn transition(
        &self,
        loops: &[LoopKey],
        mode: LoopMode,
        delay: u32,
        wait_for_sync: bool,
    ) -> LooperResult<()> {
        self.check_loops(loops)?;
        let keys = gc::owned(loops.to_vec());
        self.queue.exec(move |core: &mut SessionCore| {
            for &key in keys.iter() {
                core.loop_mut(key)?.plan_transition(mode, delay, wait_for_sync);
            }
            Ok(keys)
        })?;
        log::debug!("Planned {:?} on {} loop(s)", mode, loops.len());
        Ok(())
    }

    pub fn set_length(&self, key: LoopKey, length: usize) -> LooperResult<()> {
        self.check_loops(&[key])?;
        self.queue.exec(move |core: &mut SessionCore| {
            core.loop_mut(key)?.transport_mut().set_length(length);
            Ok(())
        })
    }

    pub fn set_position(&self, key: LoopKey, position: usize) -> LooperResult<()> {
        self.check_loops(&[key])?;
        self.queue.exec(move |core: &mut SessionCore| {
            core.loop_mut(key)?.transport_mut().set_position(position);
            Ok(())
        })
    }

    /// Turn the capture rings feeding each loop into its content
    ///
    /// All loops are handled in the same cycle. A loop that fails does not
    /// stop the others; the first error is returned.
    pub fn adopt_ringbuffers(
        &self,
        loops: &[LoopKey],
        reverse_cycles_start: Option<usize>,
        cycles_length: Option<usize>,
        go_to_cycle: Option<usize>,
        go_to_mode: Option<LoopMode>,
    ) -> LooperResult<()> {
        self.check_loops(loops)?;
        let request = AdoptRequest {
            reverse_cycles_start,
            cycles_length,
            go_to_cycle,
            go_to_mode,
        };
        let keys = gc::owned(loops.to_vec());
        let (_keys, result) = self.queue.exec(move |core: &mut SessionCore| {
            let mut result = Ok(());
            for &key in keys.iter() {
                if let Err(e) = core.adopt(key, &request) {
                    log::error!("Failed to adopt ringbuffers into {}: {}", key, e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
            Ok((keys, result))
        })?;
        result
    }

    fn check_loops(&self, loops: &[LoopKey]) -> LooperResult<()> {
        let topo = self.topology();
        if loops.iter().all(|&k| topo.loops.contains(k)) {
            Ok(())
        } else {
            Err(LooperError::Expired("loop"))
        }
    }

    // ─── Channels ───────────────────────────────────────────────────────

    pub fn add_audio_channel(&self, loop_key: LoopKey, mode: ChannelMode) -> LooperResult<ChannelKey> {
        let chan = AudioChannel::with_reserve(Arc::clone(&self.pool), mode, self.config.reserved_loop_samples);
        self.add_channel(loop_key, PortDataType::Audio, ChannelKind::Audio(chan))
    }

    pub fn add_midi_channel(&self, loop_key: LoopKey, mode: ChannelMode) -> LooperResult<ChannelKey> {
        let chan = MidiChannel::new(self.config.midi_storage_capacity, mode);
        self.add_channel(loop_key, PortDataType::Midi, ChannelKind::Midi(chan))
    }

    fn add_channel(
        &self,
        loop_key: LoopKey,
        data_type: PortDataType,
        kind: ChannelKind,
    ) -> LooperResult<ChannelKey> {
        let mut topo = self.topology();
        if !topo.loops.contains(loop_key) {
            return Err(LooperError::Expired("loop"));
        }
        let status = match &kind {
            ChannelKind::Audio(c) => c.status(),
            ChannelKind::Midi(c) => c.status(),
        };
        let key = topo.channels.insert(ChannelInfo {
            loop_key,
            data_type,
            input: None,
            output: None,
            status,
        });
        if let Some(l) = topo.loops.get_mut(loop_key) {
            l.channels.push(key);
        }
        let result = self.queue.exec(move |core: &mut SessionCore| {
            core.insert_channel(loop_key, LoopChannel::new(key, kind))
        });
        self.commit(&mut topo, result, |t| {
            t.channels.remove(key);
            if let Some(l) = t.loops.get_mut(loop_key) {
                l.channels.retain(|&c| c != key);
            }
        })?;
        log::debug!("Added {:?} {} to {}", data_type, key, loop_key);
        Ok(key)
    }

    pub fn delete_channel(&self, key: ChannelKey) -> LooperResult<()> {
        let mut topo = self.topology();
        let info = topo
            .channels
            .remove(key)
            .ok_or(LooperError::Expired("channel"))?;
        if let Some(l) = topo.loops.get_mut(info.loop_key) {
            l.channels.retain(|&c| c != key);
        }
        self.worker.publish_now(&topo)?;
        drop(topo);

        let mut removed = self
            .queue
            .exec_detach(move |core: &mut SessionCore| core.remove_channel(key))?;
        if let Some(chan) = removed.as_mut() {
            release_channel(chan);
        }
        log::debug!("Deleted {}", key);
        Ok(())
    }

    pub fn channel_state(&self, key: ChannelKey) -> LooperResult<ChannelSnapshot> {
        self.channel_info(key).map(|c| c.status.snapshot())
    }

    /// Read the channel's output peak and reset it
    pub fn take_channel_output_peak(&self, key: ChannelKey) -> LooperResult<f32> {
        self.channel_info(key).map(|c| c.status.take_output_peak())
    }

    fn channel_info(&self, key: ChannelKey) -> LooperResult<ChannelInfo> {
        self.topology()
            .channels
            .get(key)
            .cloned()
            .ok_or(LooperError::Expired("channel"))
    }

    /// Run `f` on the channel on the process thread
    fn with_channel<R: Send + 'static>(
        &self,
        key: ChannelKey,
        f: impl FnOnce(&mut LoopChannel) -> LooperResult<R> + Send + 'static,
    ) -> LooperResult<R> {
        self.channel_info(key)?;
        self.queue
            .exec(move |core: &mut SessionCore| f(core.channel_mut(key)?))
    }

    fn expect_type(&self, key: ChannelKey, data_type: PortDataType) -> LooperResult<()> {
        if self.channel_info(key)?.data_type == data_type {
            Ok(())
        } else {
            Err(LooperError::InvalidArgument("wrong channel data type"))
        }
    }

    pub fn set_channel_mode(&self, key: ChannelKey, mode: ChannelMode) -> LooperResult<()> {
        self.with_channel(key, move |chan| {
            match &mut chan.kind {
                ChannelKind::Audio(c) => c.set_mode(mode),
                ChannelKind::Midi(c) => c.set_mode(mode),
            }
            Ok(())
        })
    }

    /// Playback gain of an audio channel
    pub fn set_channel_gain(&self, key: ChannelKey, gain: f32) -> LooperResult<()> {
        self.expect_type(key, PortDataType::Audio)?;
        self.with_channel(key, move |chan| match &mut chan.kind {
            ChannelKind::Audio(c) => {
                c.set_gain(gain);
                Ok(())
            }
            ChannelKind::Midi(_) => Err(LooperError::InvalidArgument("wrong channel data type")),
        })
    }

    pub fn set_channel_start_offset(&self, key: ChannelKey, offset: i64) -> LooperResult<()> {
        self.with_channel(key, move |chan| {
            match &mut chan.kind {
                ChannelKind::Audio(c) => c.set_start_offset(offset),
                ChannelKind::Midi(c) => c.set_start_offset(offset),
            }
            Ok(())
        })
    }

    pub fn set_channel_pre_play_samples(&self, key: ChannelKey, samples: usize) -> LooperResult<()> {
        self.with_channel(key, move |chan| {
            match &mut chan.kind {
                ChannelKind::Audio(c) => c.set_pre_play_samples(samples),
                ChannelKind::Midi(c) => c.set_pre_play_samples(samples),
            }
            Ok(())
        })
    }

    /// Replace an audio channel's content
    ///
    /// The storage is filled here; the process thread only swaps it in.
    pub fn load_audio_data(&self, key: ChannelKey, samples: &[Sample]) -> LooperResult<()> {
        self.expect_type(key, PortDataType::Audio)?;
        let store = store_from_slice(samples, self.config.reserved_loop_samples, &self.pool);
        let mut store = gc::owned(Some(store));
        let length = samples.len();
        // The replaced store travels back in the same slot
        self.with_channel(key, move |chan| match &mut chan.kind {
            ChannelKind::Audio(c) => {
                *store = store.take().map(|new| c.replace_store(new, length, 0));
                Ok(store)
            }
            ChannelKind::Midi(_) => Err(LooperError::InvalidArgument("wrong channel data type")),
        })
        .map(drop)
    }

    pub fn get_audio_data(&self, key: ChannelKey) -> LooperResult<Vec<Sample>> {
        self.expect_type(key, PortDataType::Audio)?;
        self.with_channel(key, |chan| match &chan.kind {
            ChannelKind::Audio(c) => Ok(c.get_data()),
            ChannelKind::Midi(_) => Err(LooperError::InvalidArgument("wrong channel data type")),
        })
    }

    /// Replace a MIDI channel's content; events with a negative time are
    /// state restore messages
    pub fn load_midi_data(
        &self,
        key: ChannelKey,
        events: Vec<MidiSequenceEvent>,
        length: usize,
    ) -> LooperResult<()> {
        self.expect_type(key, PortDataType::Midi)?;
        let events = gc::owned(events);
        self.with_channel(key, move |chan| match &mut chan.kind {
            ChannelKind::Midi(c) => c.load_data(&events, length).map(|()| events),
            ChannelKind::Audio(_) => Err(LooperError::InvalidArgument("wrong channel data type")),
        })?;
        Ok(())
    }

    pub fn get_midi_data(&self, key: ChannelKey) -> LooperResult<Vec<MidiSequenceEvent>> {
        self.expect_type(key, PortDataType::Midi)?;
        self.with_channel(key, |chan| match &chan.kind {
            ChannelKind::Midi(c) => Ok(c.get_data()),
            ChannelKind::Audio(_) => Err(LooperError::InvalidArgument("wrong channel data type")),
        })
    }

    /// Reset a channel to `length` samples of silence
    pub fn clear_channel(&self, key: ChannelKey, length: usize) -> LooperResult<()> {
        self.with_channel(key, move |chan| {
            match &mut chan.kind {
                ChannelKind::Audio(c) => c.clear(length),
                ChannelKind::Midi(c) => c.clear(length),
            }
            Ok(())
        })
    }

    // ─── Ports ──────────────────────────────────────────────────────────

    pub fn open_audio_port(&self, name: &str, direction: PortDirection) -> LooperResult<PortKey> {
        self.open_port(name, PortDataType::Audio, direction)
    }

    pub fn open_midi_port(&self, name: &str, direction: PortDirection) -> LooperResult<PortKey> {
        self.open_port(name, PortDataType::Midi, direction)
    }

    fn open_port(
        &self,
        name: &str,
        data_type: PortDataType,
        direction: PortDirection,
    ) -> LooperResult<PortKey> {
        let mut driver = lock(&self.driver);
        let driver = driver.as_mut().ok_or(DriverError::NotStarted)?;
        let id = match data_type {
            PortDataType::Audio => driver.open_audio_port(name, direction)?,
            PortDataType::Midi => driver.open_midi_port(name, direction)?,
        };
        let status = Arc::new(PortStatus::new());
        let port = self.build_port(data_type, direction, Arc::clone(&status));
        let info = PortInfo {
            name: name.to_string(),
            data_type,
            direction,
            owner: PortOwner::Driver,
            sources: Vec::new(),
            status,
        };
        match self.insert_port(info, PortSlot::new(PortOrigin::Driver(id), port)) {
            Ok(key) => {
                log::debug!("Opened {:?} {:?} port '{}' as {}", data_type, direction, name, key);
                Ok(key)
            }
            Err(LooperError::Timeout) => Err(LooperError::Timeout),
            Err(e) => {
                if let Err(close_err) = driver.close_port(id) {
                    log::warn!("Failed to close port '{}': {}", name, close_err);
                }
                Err(e)
            }
        }
    }

    fn build_port(&self, data_type: PortDataType, direction: PortDirection, status: Arc<PortStatus>) -> Port {
        let ring_samples = match direction {
            PortDirection::Input => self.config.default_ringbuffer_samples,
            PortDirection::Output => 0,
        };
        match data_type {
            PortDataType::Audio => {
                let mut port = AudioPort::with_status(direction, status);
                if ring_samples > 0 {
                    port.replace_ringbuffer(Some(AudioRingbuffer::new(
                        ring_samples as usize,
                        &self.pool,
                    )));
                }
                Port::Audio(port)
            }
            PortDataType::Midi => {
                let mut port = MidiPort::new(
                    direction,
                    self.config.midi_merge_capacity,
                    self.config.midi_storage_capacity,
                    status,
                );
                if ring_samples > 0 {
                    port.set_ringbuffer_samples(ring_samples);
                }
                Port::Midi(port)
            }
        }
    }

    fn insert_port(&self, info: PortInfo, slot: PortSlot) -> LooperResult<PortKey> {
        let mut topo = self.topology();
        let key = topo.ports.insert(info);
        let result = self.queue.exec(move |core: &mut SessionCore| {
            core.ports.insert_at(key, slot);
            Ok(())
        });
        self.commit(&mut topo, result, |t| {
            t.ports.remove(key);
        })?;
        Ok(key)
    }

    /// Close a driver port
    ///
    /// Effect chain ports are closed together with their chain.
    pub fn close_port(&self, key: PortKey) -> LooperResult<()> {
        let mut driver = lock(&self.driver);
        let mut topo = self.topology();
        let info = topo.ports.get(key).ok_or(LooperError::Expired("port"))?;
        if info.owner != PortOwner::Driver {
            return Err(LooperError::InvalidArgument(
                "effect chain ports close with their chain",
            ));
        }
        topo.ports.remove(key);
        topo.forget_port(key);
        self.worker.publish_now(&topo)?;
        drop(topo);

        let removed = self
            .queue
            .exec_detach(move |core: &mut SessionCore| core.remove_port(key))?
            .take();
        if let Some(slot) = removed {
            if let (PortOrigin::Driver(id), Some(driver)) = (slot.origin, driver.as_mut()) {
                if let Err(e) = driver.close_port(id) {
                    log::warn!("Driver failed to close {}: {}", key, e);
                }
            }
            self.release_port(slot.port);
        }
        log::debug!("Closed {}", key);
        Ok(())
    }

    /// Return a port's capture ring buffers to the pool
    fn release_port(&self, port: Port) {
        if let Port::Audio(mut port) = port {
            if let Some(ring) = port.replace_ringbuffer(None) {
                ring.release_into(&self.pool);
            }
        }
    }

    pub fn ports(&self) -> Vec<PortKey> {
        self.topology().ports.keys().collect()
    }

    pub fn port_info(&self, key: PortKey) -> LooperResult<PortInfo> {
        self.topology()
            .ports
            .get(key)
            .cloned()
            .ok_or(LooperError::Expired("port"))
    }

    pub fn find_port(&self, name: &str) -> Option<PortKey> {
        self.topology()
            .ports
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(k, _)| k)
    }

    pub fn port_state(&self, key: PortKey) -> LooperResult<PortSnapshot> {
        self.port_info(key).map(|p| p.status.snapshot())
    }

    /// Read input and output peaks of a port and reset them
    pub fn take_port_peaks(&self, key: PortKey) -> LooperResult<(f32, f32)> {
        let info = self.port_info(key)?;
        Ok((info.status.take_input_peak(), info.status.take_output_peak()))
    }

    pub fn set_port_gain(&self, key: PortKey, gain: f32) -> LooperResult<()> {
        self.port_info(key)?;
        self.queue.exec(move |core: &mut SessionCore| {
            core.port_mut(key)?.port.set_gain(gain);
            Ok(())
        })
    }

    pub fn set_port_muted(&self, key: PortKey, muted: bool) -> LooperResult<()> {
        self.port_info(key)?;
        self.queue.exec(move |core: &mut SessionCore| {
            core.port_mut(key)?.port.set_muted(muted);
            Ok(())
        })
    }

    /// Resize the capture ring of an input port; 0 removes it
    ///
    /// Audio rings are built here and swapped in, the old ring's buffers go
    /// back to the pool.
    pub fn set_port_ringbuffer_samples(&self, key: PortKey, n_samples: u32) -> LooperResult<()> {
        let info = self.port_info(key)?;
        if info.direction != PortDirection::Input {
            return Err(LooperError::InvalidArgument(
                "capture rings belong to input ports",
            ));
        }
        match info.data_type {
            PortDataType::Audio => {
                let ring = (n_samples > 0).then(|| AudioRingbuffer::new(n_samples as usize, &self.pool));
                // Whichever ring comes back, the new one unused or the old one
                let mut ring = gc::owned(ring);
                let mut back = self.queue.exec(move |core: &mut SessionCore| {
                    let port = core
                        .port_mut(key)?
                        .port
                        .as_audio_mut()
                        .ok_or(LooperError::InvalidArgument("not an audio port"))?;
                    *ring = port.replace_ringbuffer(ring.take());
                    Ok(ring)
                })?;
                if let Some(old) = back.take() {
                    old.release_into(&self.pool);
                }
            }
            PortDataType::Midi => {
                self.queue.exec(move |core: &mut SessionCore| {
                    core.port_mut(key)?
                        .port
                        .as_midi_mut()
                        .ok_or(LooperError::InvalidArgument("not a MIDI port"))?
                        .set_ringbuffer_samples(n_samples);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    // ─── Connections ────────────────────────────────────────────────────

    /// Record `key` from input port `port`
    pub fn connect_channel_input(&self, key: ChannelKey, port: PortKey) -> LooperResult<()> {
        self.connect_channel(key, port, PortDirection::Input)
    }

    /// Play `key` into output port `port`
    pub fn connect_channel_output(&self, key: ChannelKey, port: PortKey) -> LooperResult<()> {
        self.connect_channel(key, port, PortDirection::Output)
    }

    fn connect_channel(&self, key: ChannelKey, port: PortKey, direction: PortDirection) -> LooperResult<()> {
        let mut topo = self.topology();
        let pinfo = topo.ports.get(port).ok_or(LooperError::Expired("port"))?;
        let cinfo = topo
            .channels
            .get(key)
            .ok_or(LooperError::Expired("channel"))?;
        if pinfo.direction != direction {
            return Err(LooperError::InvalidArgument(match direction {
                PortDirection::Input => "channels record from input ports",
                PortDirection::Output => "channels play into output ports",
            }));
        }
        if pinfo.data_type != cinfo.data_type {
            return Err(LooperError::InvalidArgument(
                "port and channel data types differ",
            ));
        }

        let info = topo.channels.get_mut(key).ok_or(LooperError::Expired("channel"))?;
        let side = match direction {
            PortDirection::Input => &mut info.input,
            PortDirection::Output => &mut info.output,
        };
        let previous = side.replace(port);
        let result = self.queue.exec(move |core: &mut SessionCore| {
            let chan = core.channel_mut(key)?;
            match direction {
                PortDirection::Input => chan.input = Some(port),
                PortDirection::Output => chan.output = Some(port),
            }
            Ok(())
        });
        self.commit(&mut topo, result, |t| {
            if let Some(info) = t.channels.get_mut(key) {
                match direction {
                    PortDirection::Input => info.input = previous,
                    PortDirection::Output => info.output = previous,
                }
            }
        })
    }

    /// Disconnect `port` from whichever side of the channel it is on
    pub fn disconnect_channel(&self, key: ChannelKey, port: PortKey) -> LooperResult<()> {
        let mut topo = self.topology();
        let info = topo
            .channels
            .get_mut(key)
            .ok_or(LooperError::Expired("channel"))?;
        let (input, output) = (info.input == Some(port), info.output == Some(port));
        if !input && !output {
            return Err(LooperError::InvalidArgument("port is not connected to the channel"));
        }
        if input {
            info.input = None;
        }
        if output {
            info.output = None;
        }
        self.worker.publish_now(&topo)?;
        drop(topo);

        self.queue.exec(move |core: &mut SessionCore| {
            let chan = core.channel_mut(key)?;
            if input {
                chan.input = None;
            }
            if output {
                chan.output = None;
            }
            Ok(())
        })
    }

    /// Pass the data of `from` into output port `to` every cycle
    pub fn connect_ports(&self, from: PortKey, to: PortKey) -> LooperResult<()> {
        let mut topo = self.topology();
        let src = topo.ports.get(from).ok_or(LooperError::Expired("port"))?;
        let dst = topo.ports.get(to).ok_or(LooperError::Expired("port"))?;
        if from == to {
            return Err(LooperError::InvalidArgument("a port cannot feed itself"));
        }
        if dst.direction != PortDirection::Output {
            return Err(LooperError::InvalidArgument(
                "connections end at an output port",
            ));
        }
        if src.data_type != dst.data_type {
            return Err(LooperError::InvalidArgument("port data types differ"));
        }
        if dst.sources.contains(&from) {
            return Ok(());
        }

        if let Some(dst) = topo.ports.get_mut(to) {
            dst.sources.push(from);
        }
        if let Err(e) = compute_schedule(&ProcessingGraph::from_topology(&topo), 0) {
            if let Some(dst) = topo.ports.get_mut(to) {
                dst.sources.retain(|&s| s != from);
            }
            return Err(e);
        }
        let result = self.queue.exec(move |core: &mut SessionCore| {
            core.port_mut(to)?.sources.push(from);
            Ok(())
        });
        self.commit(&mut topo, result, |t| {
            if let Some(dst) = t.ports.get_mut(to) {
                dst.sources.retain(|&s| s != from);
            }
        })?;
        log::debug!("Connected {} -> {}", from, to);
        Ok(())
    }

    pub fn disconnect_ports(&self, from: PortKey, to: PortKey) -> LooperResult<()> {
        let mut topo = self.topology();
        let dst = topo.ports.get_mut(to).ok_or(LooperError::Expired("port"))?;
        if !dst.sources.contains(&from) {
            return Err(LooperError::InvalidArgument("ports are not connected"));
        }
        dst.sources.retain(|&s| s != from);
        self.worker.publish_now(&topo)?;
        drop(topo);

        self.queue.exec(move |core: &mut SessionCore| {
            core.port_mut(to)?.sources.retain(|&s| s != from);
            Ok(())
        })
    }

    // ─── Effect chains ──────────────────────────────────────────────────

    /// Host an effect chain
    ///
    /// Each chain input becomes an output port named `<name>_in_<n>` and
    /// each chain output an input port named `<name>_out_<n>`; MIDI inputs
    /// are `<name>_midi_in_<n>`.
    pub fn add_chain(&self, name: &str, chain: Box<dyn ProcessingChain>) -> LooperResult<ChainKey> {
        let layout = chain.ports();
        let mut topo = self.topology();
        let key = topo.chains.insert(ChainInfo {
            name: name.to_string(),
            audio_inputs: Vec::new(),
            audio_outputs: Vec::new(),
            midi_inputs: Vec::new(),
        });

        let mut slots = Vec::new();
        let mut add = |topo: &mut Topology, label: String, data_type: PortDataType, direction: PortDirection| {
            let status = Arc::new(PortStatus::new());
            let port = self.build_port(data_type, direction, Arc::clone(&status));
            let port_key = topo.ports.insert(PortInfo {
                name: label,
                data_type,
                direction,
                owner: PortOwner::Chain(key),
                sources: Vec::new(),
                status,
            });
            slots.push((port_key, PortSlot::new(PortOrigin::Chain(key), port)));
            port_key
        };
        let audio_inputs: Vec<PortKey> = (1..=layout.audio_inputs)
            .map(|i| add(&mut *topo, format!("{}_in_{}", name, i), PortDataType::Audio, PortDirection::Output))
            .collect();
        let audio_outputs: Vec<PortKey> = (1..=layout.audio_outputs)
            .map(|i| add(&mut *topo, format!("{}_out_{}", name, i), PortDataType::Audio, PortDirection::Input))
            .collect();
        let midi_inputs: Vec<PortKey> = (1..=layout.midi_inputs)
            .map(|i| add(&mut *topo, format!("{}_midi_in_{}", name, i), PortDataType::Midi, PortDirection::Output))
            .collect();
        if let Some(info) = topo.chains.get_mut(key) {
            info.audio_inputs = audio_inputs.clone();
            info.audio_outputs = audio_outputs.clone();
            info.midi_inputs = midi_inputs.clone();
        }

        let slot = ChainSlot {
            chain,
            buffers: ChainBuffers::new(layout, self.config.midi_merge_capacity),
            audio_inputs,
            audio_outputs,
            midi_inputs,
        };
        let result = self.queue.exec(move |core: &mut SessionCore| {
            for (port_key, port) in slots {
                core.ports.insert_at(port_key, port);
            }
            core.chains.insert_at(key, slot);
            Ok(())
        });
        self.commit(&mut topo, result, |t| {
            if let Some(info) = t.chains.remove(key) {
                for port in info.audio_inputs.iter().chain(&info.audio_outputs).chain(&info.midi_inputs) {
                    t.ports.remove(*port);
                }
            }
        })?;
        log::debug!("Added chain '{}' as {}", name, key);
        Ok(key)
    }

    pub fn chain_info(&self, key: ChainKey) -> LooperResult<ChainInfo> {
        self.topology()
            .chains
            .get(key)
            .cloned()
            .ok_or(LooperError::Expired("chain"))
    }

    /// Remove a chain and its ports; the chain is handed back
    pub fn delete_chain(&self, key: ChainKey) -> LooperResult<Box<dyn ProcessingChain>> {
        let mut topo = self.topology();
        let info = topo.chains.remove(key).ok_or(LooperError::Expired("chain"))?;
        for port in info.inputs().chain(info.audio_outputs.iter().copied()) {
            topo.ports.remove(port);
            topo.forget_port(port);
        }
        self.worker.publish_now(&topo)?;
        drop(topo);

        let (slot, ports) = self
            .queue
            .exec_detach(move |core: &mut SessionCore| core.remove_chain(key))?
            .take()
            .ok_or(LooperError::Expired("chain"))?;
        for port in ports {
            self.release_port(port.port);
        }
        log::debug!("Deleted {}", key);
        Ok(slot.chain)
    }

    pub fn set_chain_active(&self, key: ChainKey, active: bool) -> LooperResult<()> {
        self.chain_info(key)?;
        self.queue.exec(move |core: &mut SessionCore| {
            core.chains
                .get_mut(key)
                .ok_or(LooperError::Expired("chain"))?
                .chain
                .set_active(active);
            Ok(())
        })
    }

    // ─── Driver and schedule ────────────────────────────────────────────

    /// Run the session on `driver`, replacing the current one
    ///
    /// Driver ports of the session are reopened on the new driver under
    /// their names; a port that cannot be reopened stays silent.
    pub fn set_driver(&self, driver: Box<dyn AudioMidiDriver>) -> LooperResult<()> {
        let mut current = lock(&self.driver);
        self.queue.set_passthrough(true);
        if let Some(mut old) = current.take() {
            old.close();
        }

        let driver = match self.attach_driver(driver) {
            Ok(driver) => driver,
            Err((mut failed, e)) => {
                log::warn!("Driver failed to start, using the dummy driver: {}", e);
                failed.close();
                // Without a running driver commands keep running here
                self.attach_driver(Box::new(DummyDriver::new(&self.config.driver)))
                    .map_err(|(mut dummy, e)| {
                        dummy.close();
                        e
                    })?
            }
        };
        log::info!(
            "Session driver set ({} Hz, {} frames)",
            driver.sample_rate(),
            driver.buffer_size()
        );
        *current = Some(driver);
        self.queue.set_passthrough(false);
        Ok(())
    }

    /// Reopen driver-owned ports on `driver` and start it
    ///
    /// Hands the driver back with the error if it does not start.
    fn attach_driver(
        &self,
        mut driver: Box<dyn AudioMidiDriver>,
    ) -> Result<Box<dyn AudioMidiDriver>, (Box<dyn AudioMidiDriver>, LooperError)> {
        let mut reopened = Vec::new();
        {
            let topo = self.topology();
            for (key, info) in topo.ports.iter().filter(|(_, p)| p.owner == PortOwner::Driver) {
                let id = match info.data_type {
                    PortDataType::Audio => driver.open_audio_port(&info.name, info.direction),
                    PortDataType::Midi => driver.open_midi_port(&info.name, info.direction),
                };
                match id {
                    Ok(id) => reopened.push((key, id)),
                    Err(e) => log::error!("Failed to reopen port '{}': {}", info.name, e),
                }
            }
        }
        let relinked = self.queue.exec(move |core: &mut SessionCore| {
            for (key, slot) in core.ports.iter_mut() {
                if matches!(slot.origin, PortOrigin::Driver(_) | PortOrigin::Detached) {
                    slot.origin = reopened
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map_or(PortOrigin::Detached, |&(_, id)| PortOrigin::Driver(id));
                }
            }
            Ok(())
        });
        if let Err(e) = relinked {
            return Err((driver, e));
        }

        let processor = SessionProcessor::new(self.queue.process_handle(), self.worker.schedule_cell());
        match driver.start(Box::new(processor)) {
            Ok(()) => Ok(driver),
            Err(e) => Err((driver, e.into())),
        }
    }

    pub fn has_driver(&self) -> bool {
        lock(&self.driver).is_some()
    }

    /// Wait until every requested schedule recompute is published
    pub fn wait_for_schedule(&self, timeout: Duration) -> LooperResult<()> {
        self.worker.wait_idle(timeout)
    }

    pub fn schedule(&self) -> Schedule {
        (*self.worker.current()).clone()
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.worker.stats()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.queue.set_passthrough(true);
        if let Some(mut driver) = lock(&self.driver).take() {
            driver.close();
        }
        log::info!("Session closed");
    }
}

/// Return a detached channel's storage to the pool
fn release_channel(chan: &mut LoopChannel) {
    if let ChannelKind::Audio(c) = &mut chan.kind {
        c.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::audio::{AudioProcessor, DriverPortId, DriverResult, DummyDriver};
    use crate::fx::GainChain;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn config() -> EngineConfig {
        EngineConfig {
            buffer_size: 16,
            pool_buffers: 16,
            pool_low_water: 4,
            reserved_loop_samples: 4096,
            ..EngineConfig::default()
        }
    }

    fn samples(range: std::ops::RangeInclusive<i32>, scale: f32) -> Vec<Sample> {
        range.map(|i| i as f32 * scale).collect()
    }

    #[test]
    fn test_record_and_play_back() {
        let session = Session::new(config()).unwrap();
        let driver = DummyDriver::controlled(8);
        let control = driver.control();
        session.set_driver(Box::new(driver)).unwrap();

        let input = session.open_audio_port("in", PortDirection::Input).unwrap();
        let output = session.open_audio_port("out", PortDirection::Output).unwrap();
        let lp = session.add_loop().unwrap();
        let chan = session.add_audio_channel(lp, ChannelMode::Direct).unwrap();
        session.connect_channel_input(chan, input).unwrap();
        session.connect_channel_output(chan, output).unwrap();
        session.wait_for_schedule(TIMEOUT).unwrap();

        session.transition(&[lp], LoopMode::Recording, 0, false).unwrap();
        assert!(control.queue_audio_input("in", &samples(1..=8, 1.0)));
        assert!(control.run(8));
        assert_eq!(session.loop_state(lp).unwrap().length, 8);
        assert_eq!(session.get_audio_data(chan).unwrap(), samples(1..=8, 1.0));

        session.transition(&[lp], LoopMode::Playing, 0, false).unwrap();
        control.take_audio_output("out");
        assert!(control.run(8));
        assert_eq!(control.take_audio_output("out"), samples(1..=8, 1.0));
    }

    #[test]
    fn test_dry_and_wet_recording() {
        let session = Session::new(config()).unwrap();
        let driver = DummyDriver::controlled(8);
        let control = driver.control();
        session.set_driver(Box::new(driver)).unwrap();

        let input = session.open_audio_port("in", PortDirection::Input).unwrap();
        session.set_port_gain(input, 0.5).unwrap();
        let chain = session.add_chain("fx", Box::new(GainChain::new(0.5))).unwrap();
        let fx = session.chain_info(chain).unwrap();
        assert_eq!(session.port_info(fx.audio_inputs[0]).unwrap().name, "fx_in_1");
        session.connect_ports(input, fx.audio_inputs[0]).unwrap();

        let lp = session.add_loop().unwrap();
        let dry = session.add_audio_channel(lp, ChannelMode::Dry).unwrap();
        let wet = session.add_audio_channel(lp, ChannelMode::Wet).unwrap();
        session.connect_channel_input(dry, input).unwrap();
        session.connect_channel_input(wet, fx.audio_outputs[0]).unwrap();
        let dry_out = session.open_audio_port("dry_out", PortDirection::Output).unwrap();
        let wet_out = session.open_audio_port("wet_out", PortDirection::Output).unwrap();
        session.connect_channel_output(dry, dry_out).unwrap();
        session.connect_channel_output(wet, wet_out).unwrap();
        session.wait_for_schedule(TIMEOUT).unwrap();

        session.transition(&[lp], LoopMode::Recording, 0, false).unwrap();
        assert!(control.queue_audio_input("in", &samples(1..=8, 1.0)));
        assert!(control.run(8));

        assert_eq!(session.get_audio_data(dry).unwrap(), samples(1..=8, 0.5));
        assert_eq!(session.get_audio_data(wet).unwrap(), samples(1..=8, 0.25));

        // Dry plays only while feeding the effects
        session
            .transition(&[lp], LoopMode::PlayingDryThroughWet, 0, false)
            .unwrap();
        control.take_audio_output("dry_out");
        control.take_audio_output("wet_out");
        assert!(control.run(8));
        assert_eq!(control.take_audio_output("dry_out"), samples(1..=8, 0.5));
        assert_eq!(control.take_audio_output("wet_out"), vec![0.0; 8]);

        session.transition(&[lp], LoopMode::Playing, 0, false).unwrap();
        assert!(control.run(8));
        assert_eq!(control.take_audio_output("dry_out"), vec![0.0; 8]);
        assert_eq!(control.take_audio_output("wet_out"), samples(1..=8, 0.25));
    }

    #[test]
    fn test_adopt_last_sync_cycle() {
        let session = Session::new(config()).unwrap();
        let driver = DummyDriver::controlled(4);
        let control = driver.control();
        session.set_driver(Box::new(driver)).unwrap();

        let input = session.open_audio_port("in", PortDirection::Input).unwrap();
        session.set_port_ringbuffer_samples(input, 8).unwrap();

        let sync = session.add_loop().unwrap();
        session.set_length(sync, 3).unwrap();
        let lp = session.add_loop().unwrap();
        session.set_sync_source(lp, Some(sync)).unwrap();
        let chan = session.add_audio_channel(lp, ChannelMode::Direct).unwrap();
        session.connect_channel_input(chan, input).unwrap();
        session.wait_for_schedule(TIMEOUT).unwrap();

        session.transition(&[sync], LoopMode::Playing, 0, false).unwrap();
        assert!(control.queue_audio_input("in", &samples(1..=7, 1.0)));
        assert!(control.run(7));
        assert_eq!(session.loop_state(sync).unwrap().position, 1);
        assert_eq!(session.port_state(input).unwrap().ringbuffer_samples, 8);

        session
            .adopt_ringbuffers(&[lp], Some(1), Some(1), None, None)
            .unwrap();
        assert_eq!(session.loop_state(lp).unwrap().length, 3);
        let offset = session.channel_state(chan).unwrap().start_offset as usize;
        let data = session.get_audio_data(chan).unwrap();
        assert_eq!(&data[offset..offset + 3], &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_stale_handles_expire() {
        let session = Session::new(config()).unwrap();
        let lp = session.add_loop().unwrap();
        let chan = session.add_midi_channel(lp, ChannelMode::Direct).unwrap();
        session.delete_loop(lp).unwrap();

        assert_eq!(session.loop_state(lp), Err(LooperError::Expired("loop")));
        assert_eq!(
            session.set_channel_mode(chan, ChannelMode::Dry),
            Err(LooperError::Expired("channel"))
        );
        assert_eq!(session.delete_loop(lp), Err(LooperError::Expired("loop")));

        // The freed slot is reused under a new generation
        let again = session.add_loop().unwrap();
        assert_ne!(again, lp);
        assert!(session.loop_state(again).is_ok());
    }

    #[test]
    fn test_ports_need_a_driver() {
        let session = Session::new(config()).unwrap();
        assert_eq!(
            session.open_audio_port("in", PortDirection::Input),
            Err(LooperError::Driver(DriverError::NotStarted))
        );
    }

    /// Opens ports but never starts
    struct FailingDriver {
        ports: usize,
        closed: Arc<AtomicBool>,
    }

    impl AudioMidiDriver for FailingDriver {
        fn start(&mut self, _processor: Box<dyn AudioProcessor>) -> DriverResult<()> {
            Err(DriverError::StartFailed("no server".into()))
        }

        fn open_audio_port(&mut self, _: &str, _: PortDirection) -> DriverResult<DriverPortId> {
            self.ports += 1;
            Ok(DriverPortId(self.ports - 1))
        }

        fn open_midi_port(&mut self, name: &str, dir: PortDirection) -> DriverResult<DriverPortId> {
            self.open_audio_port(name, dir)
        }

        fn close_port(&mut self, _port: DriverPortId) -> DriverResult<()> {
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            48000
        }

        fn buffer_size(&self) -> u32 {
            16
        }

        fn is_active(&self) -> bool {
            false
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_failed_driver_falls_back_to_dummy() {
        let _ = env_logger::builder().is_test(true).try_init();
        let session = Session::new(config()).unwrap();
        session
            .set_driver(Box::new(DummyDriver::controlled(8)))
            .unwrap();
        let input = session.open_audio_port("in", PortDirection::Input).unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        session
            .set_driver(Box::new(FailingDriver {
                ports: 0,
                closed: Arc::clone(&closed),
            }))
            .unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(session.has_driver());

        // The dummy runs cycles on its own, so commands go through the queue
        let lp = session.add_loop().unwrap();
        session.set_length(lp, 4).unwrap();
        assert_eq!(session.loop_state(lp).unwrap().length, 4);
        let output = session.open_audio_port("out", PortDirection::Output).unwrap();
        session.connect_ports(input, output).unwrap();
        session.wait_for_schedule(TIMEOUT).unwrap();
    }

    #[test]
    fn test_connection_validation() {
        let session = Session::new(config()).unwrap();
        session
            .set_driver(Box::new(DummyDriver::controlled(8)))
            .unwrap();
        let input = session.open_audio_port("in", PortDirection::Input).unwrap();
        let output = session.open_audio_port("out", PortDirection::Output).unwrap();
        let midi_out = session.open_midi_port("midi_out", PortDirection::Output).unwrap();
        let lp = session.add_loop().unwrap();
        let chan = session.add_audio_channel(lp, ChannelMode::Direct).unwrap();

        assert!(session.connect_channel_input(chan, output).is_err());
        assert!(session.connect_channel_output(chan, midi_out).is_err());
        assert!(session.connect_ports(output, input).is_err());
        session.connect_ports(input, output).unwrap();
        session.disconnect_ports(input, output).unwrap();
        assert!(session.disconnect_ports(input, output).is_err());

        // Chain feedback cannot be scheduled
        let chain = session.add_chain("fx", Box::new(GainChain::new(1.0))).unwrap();
        let fx = session.chain_info(chain).unwrap();
        assert!(matches!(
            session.connect_ports(fx.audio_outputs[0], fx.audio_inputs[0]),
            Err(LooperError::GraphCycle(_))
        ));
        assert!(matches!(
            session.close_port(fx.audio_inputs[0]),
            Err(LooperError::InvalidArgument(_))
        ));
        session.delete_chain(chain).unwrap();
        assert!(session.port_info(fx.audio_inputs[0]).is_err());
    }

    #[test]
    fn test_sync_cycles_are_rejected() {
        let session = Session::new(config()).unwrap();
        let a = session.add_loop().unwrap();
        let b = session.add_loop().unwrap();
        session.set_sync_source(b, Some(a)).unwrap();
        assert!(session.set_sync_source(a, Some(b)).is_err());
        assert!(session.set_sync_source(a, Some(a)).is_err());
        session.delete_loop(a).unwrap();
        session.set_sync_source(b, None).unwrap();
    }

    #[test]
    fn test_deleting_republishes_schedule() {
        let session = Session::new(config()).unwrap();
        let lp = session.add_loop().unwrap();
        let chan = session.add_audio_channel(lp, ChannelMode::Direct).unwrap();
        session.wait_for_schedule(TIMEOUT).unwrap();
        assert!(session.schedule().contains(crate::graph::NodeId::Channel(chan)));

        session.delete_channel(chan).unwrap();
        assert!(!session.schedule().contains(crate::graph::NodeId::Channel(chan)));
        assert!(session.loop_channels(lp).unwrap().is_empty());
    }

    #[test]
    fn test_audio_data_round_trip_without_driver() {
        let session = Session::new(config()).unwrap();
        let lp = session.add_loop().unwrap();
        let chan = session.add_audio_channel(lp, ChannelMode::Direct).unwrap();
        let data = samples(1..=40, 0.25);
        session.load_audio_data(chan, &data).unwrap();
        assert_eq!(session.get_audio_data(chan).unwrap(), data);
        assert_eq!(session.channel_state(chan).unwrap().length, 40);
        assert!(session.get_midi_data(chan).is_err());

        session.clear_channel(chan, 4).unwrap();
        assert_eq!(session.get_audio_data(chan).unwrap(), vec![0.0; 4]);
    }
}
