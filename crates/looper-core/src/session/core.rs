//! Process-side session state
//!
//! [`SessionCore`] is owned by the command queue and only ever touched on
//! the process thread (or by a control thread holding the queue's state
//! lock during a synchronous fallback). Every cycle it walks the published
//! schedule step by step:
//!
//! ```text
//! PortProcess(in) ──► Loop group (POI chunks) ──► Channel finalize ──► PortProcess(out) ──► driver
//!        │                                              ▲
//!        └──────────► Chain ──► PortProcess(wet in) ────┘
//! ```

use std::sync::Arc;

use basedrop::SharedCell;
use looper_midi::{MidiRingbuffer, MidiStateTracker};

use crate::audio::{AudioProcessor, CycleIo, DriverPortId};
use crate::engine::arena::{Arena, ChainKey, ChannelKey, LoopKey, PortKey};
use crate::engine::queue::ProcessHandle;
use crate::error::{LooperError, LooperResult};
use crate::fx::{ChainBuffers, ProcessingChain};
use crate::graph::{NodeId, Schedule};
use crate::looping::{AdoptRequest, CaptureRings, ChannelKind, Loop, LoopChannel, LoopScheduler};
use crate::port::{AudioPort, AudioRingbuffer, MidiPort, Port};
use crate::types::PortDirection;

/// Objects preallocated per arena
const ARENA_CAPACITY: usize = 256;

/// Where a port's data comes from or goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortOrigin {
    Driver(DriverPortId),
    /// Driver port that could not be reopened on the current driver
    Detached,
    Chain(ChainKey),
}

#[derive(Debug)]
pub(crate) struct PortSlot {
    pub origin: PortOrigin,
    pub port: Port,
    /// Ports mixed into this one
    pub sources: Vec<PortKey>,
    /// Whether the running schedule processes this port
    scheduled: bool,
}

impl PortSlot {
    pub fn new(origin: PortOrigin, port: Port) -> Self {
        Self {
            origin,
            port,
            sources: Vec::with_capacity(16),
            scheduled: false,
        }
    }
}

pub(crate) struct ChainSlot {
    pub chain: Box<dyn ProcessingChain>,
    pub buffers: ChainBuffers,
    pub audio_inputs: Vec<PortKey>,
    pub audio_outputs: Vec<PortKey>,
    pub midi_inputs: Vec<PortKey>,
}

impl ChainSlot {
    pub fn ports(&self) -> impl Iterator<Item = PortKey> + '_ {
        self.audio_inputs
            .iter()
            .chain(&self.audio_outputs)
            .chain(&self.midi_inputs)
            .copied()
    }
}

impl CaptureRings for Arena<PortKey, PortSlot> {
    fn audio_ring(&self, port: PortKey) -> Option<&AudioRingbuffer> {
        self.get(port)?.port.as_audio()?.ringbuffer()
    }

    fn midi_ring(&self, port: PortKey) -> Option<(&MidiRingbuffer, &MidiStateTracker)> {
        Some(self.get(port)?.port.as_midi()?.ringbuffer())
    }
}

/// Everything the process thread owns for one session
pub struct SessionCore {
    pub(crate) ports: Arena<PortKey, PortSlot>,
    pub(crate) loops: Arena<LoopKey, Loop>,
    /// Loop each channel lives in
    pub(crate) channel_loops: Arena<ChannelKey, LoopKey>,
    pub(crate) chains: Arena<ChainKey, ChainSlot>,
    scheduler: LoopScheduler,
    group: Vec<LoopKey>,
}

impl SessionCore {
    pub fn new(max_poi_iterations: usize) -> Self {
        Self {
            ports: Arena::with_capacity(ARENA_CAPACITY),
            loops: Arena::with_capacity(ARENA_CAPACITY),
            channel_loops: Arena::with_capacity(ARENA_CAPACITY),
            chains: Arena::with_capacity(ARENA_CAPACITY),
            scheduler: LoopScheduler::new(max_poi_iterations),
            group: Vec::with_capacity(ARENA_CAPACITY),
        }
    }

    pub(crate) fn loop_mut(&mut self, key: LoopKey) -> LooperResult<&mut Loop> {
        self.loops.get_mut(key).ok_or(LooperError::Expired("loop"))
    }

    pub(crate) fn port_mut(&mut self, key: PortKey) -> LooperResult<&mut PortSlot> {
        self.ports.get_mut(key).ok_or(LooperError::Expired("port"))
    }

    pub(crate) fn channel_mut(&mut self, key: ChannelKey) -> LooperResult<&mut LoopChannel> {
        let loop_key = *self
            .channel_loops
            .get(key)
            .ok_or(LooperError::Expired("channel"))?;
        self.loops
            .get_mut(loop_key)
            .and_then(|lp| lp.channel_mut(key))
            .ok_or(LooperError::Expired("channel"))
    }

    pub(crate) fn insert_channel(
        &mut self,
        loop_key: LoopKey,
        channel: LoopChannel,
    ) -> LooperResult<()> {
        let key = channel.key();
        self.loop_mut(loop_key)?.add_channel(channel);
        self.channel_loops.insert_at(key, loop_key);
        Ok(())
    }

    pub(crate) fn remove_channel(&mut self, key: ChannelKey) -> Option<LoopChannel> {
        let loop_key = self.channel_loops.remove(key)?;
        self.loops.get_mut(loop_key)?.remove_channel(key)
    }

    /// Detach a loop; loops following it lose their sync source
    pub(crate) fn remove_loop(&mut self, key: LoopKey) -> Option<Loop> {
        let lp = self.loops.remove(key)?;
        for chan in lp.channels() {
            self.channel_loops.remove(chan.key());
        }
        for (_, other) in self.loops.iter_mut() {
            if other.sync_source() == Some(key) {
                other.set_sync_source(None);
            }
        }
        Some(lp)
    }

    /// Detach a port and every reference to it
    pub(crate) fn remove_port(&mut self, key: PortKey) -> Option<PortSlot> {
        let slot = self.ports.remove(key)?;
        for (_, other) in self.ports.iter_mut() {
            other.sources.retain(|&s| s != key);
        }
        for (_, lp) in self.loops.iter_mut() {
            for chan in lp.channels_mut() {
                if chan.input == Some(key) {
                    chan.input = None;
                }
                if chan.output == Some(key) {
                    chan.output = None;
                }
            }
        }
        Some(slot)
    }

    /// Detach a chain together with its internal ports
    pub(crate) fn remove_chain(&mut self, key: ChainKey) -> Option<(ChainSlot, Vec<PortSlot>)> {
        let slot = self.chains.remove(key)?;
        let keys: Vec<PortKey> = slot.ports().collect();
        let ports = keys.into_iter().filter_map(|k| self.remove_port(k)).collect();
        Some((slot, ports))
    }

    /// Take over the capture rings of a loop's input ports
    pub(crate) fn adopt(&mut self, key: LoopKey, request: &AdoptRequest) -> LooperResult<()> {
        let lp = self.loops.get(key).ok_or(LooperError::Expired("loop"))?;
        let sync = lp
            .sync_source()
            .filter(|&s| s != key)
            .and_then(|s| self.loops.get(s))
            .map(|s| s.transport().sync_view());
        let lp = self.loops.get_mut(key).ok_or(LooperError::Expired("loop"))?;
        lp.adopt_ringbuffers(sync.as_ref(), request, &self.ports)
    }

    /// Run one cycle of `io.n_frames()` frames along `schedule`
    ///
    /// A failing node is logged and skipped; the rest of the cycle runs.
    pub fn cycle(&mut self, schedule: &Schedule, io: &mut dyn CycleIo) {
        let n_frames = io.n_frames();
        if n_frames == 0 {
            return;
        }

        for (_, slot) in self.ports.iter_mut() {
            slot.scheduled = false;
        }
        for step in schedule.steps() {
            for node in step.nodes() {
                if let NodeId::PortProcess(key) = *node {
                    if let Some(slot) = self.ports.get_mut(key) {
                        slot.scheduled = true;
                    }
                }
            }
        }

        for step in schedule.steps() {
            if step.is_co_process() {
                if let Err(e) = self.process_group(step.nodes(), n_frames) {
                    log::error!("Co-processed step failed: {}", e);
                }
                continue;
            }
            for &node in step.nodes() {
                if let Err(e) = self.process_node(node, n_frames, io) {
                    log::error!("Node {} failed: {}", node, e);
                }
            }
        }
    }

    fn process_node(&mut self, node: NodeId, n_frames: u32, io: &mut dyn CycleIo) -> LooperResult<()> {
        match node {
            NodeId::PortPrepare(key) => {
                self.port_mut(key)?.port.prepare(n_frames);
                Ok(())
            }
            NodeId::PortProcess(key) => self.process_port(key, n_frames, io),
            NodeId::Loop(_) => self.process_group(&[node], n_frames),
            NodeId::Channel(key) => self.finalize_channel(key),
            NodeId::Chain(key) => self.process_chain(key, n_frames),
        }
    }

    /// Advance the loops of a step together
    fn process_group(&mut self, nodes: &[NodeId], n_frames: u32) -> LooperResult<()> {
        self.group.clear();
        self.group.extend(nodes.iter().filter_map(|node| match node {
            NodeId::Loop(key) => Some(*key),
            _ => None,
        }));
        let ports = &self.ports;
        for &key in &self.group {
            if let Some(lp) = self.loops.get_mut(key) {
                for chan in lp.channels_mut() {
                    chan.prepare(n_frames, |p| ports.get(p).map_or(false, |s| s.scheduled));
                }
            }
        }
        self.scheduler.process(&mut self.loops, &self.group, n_frames)
    }

    fn process_port(&mut self, key: PortKey, n_frames: u32, io: &mut dyn CycleIo) -> LooperResult<()> {
        let slot = self.port_mut(key)?;
        if slot.port.direction() == PortDirection::Input {
            match slot.origin {
                PortOrigin::Driver(id) => {
                    slot.port.prepare(n_frames);
                    match &mut slot.port {
                        Port::Audio(p) => {
                            if let Some(captured) = io.audio_input(id) {
                                p.fill_from(captured);
                            }
                        }
                        Port::Midi(p) => io.midi_input(id, &mut |msg| p.write(msg)),
                    }
                }
                PortOrigin::Detached => slot.port.prepare(n_frames),
                // Filled by its chain
                PortOrigin::Chain(_) => {}
            }
            slot.port.finish();
            return Ok(());
        }

        let n_sources = slot.sources.len();
        for i in 0..n_sources {
            let Some(source) = self.ports.get(key).and_then(|s| s.sources.get(i).copied()) else {
                break;
            };
            if let (Some(dst), Some(src)) = self.ports.get2_mut(key, source) {
                if src.scheduled {
                    mix_port(&mut dst.port, &src.port);
                }
            }
        }

        let slot = self.port_mut(key)?;
        slot.port.finish();
        if let PortOrigin::Driver(id) = slot.origin {
            match &slot.port {
                Port::Audio(p) => {
                    if let Some(out) = io.audio_output(id) {
                        let n = out.len().min(p.buffer().len());
                        out[..n].copy_from_slice(&p.buffer()[..n]);
                        out[n..].fill(0.0);
                    }
                }
                Port::Midi(p) => io.midi_output(id, p.messages()),
            }
        }
        Ok(())
    }

    fn finalize_channel(&mut self, key: ChannelKey) -> LooperResult<()> {
        let loop_key = *self
            .channel_loops
            .get(key)
            .ok_or(LooperError::Expired("channel"))?;
        let chan = self
            .loops
            .get_mut(loop_key)
            .and_then(|lp| lp.channel_mut(key))
            .ok_or(LooperError::Expired("channel"))?;

        let ports = &mut self.ports;
        let live = |p: Option<PortKey>, ports: &Arena<PortKey, PortSlot>| {
            p.filter(|&k| ports.get(k).map_or(false, |s| s.scheduled))
        };
        let input = live(chan.input, ports);
        let output = live(chan.output, ports);
        let (input, output) = port_pair(ports, input, output);

        match &mut chan.kind {
            ChannelKind::Audio(c) => c.finalize(
                input.and_then(|s| s.port.as_audio()).map(AudioPort::buffer),
                output
                    .and_then(|s| s.port.as_audio_mut())
                    .map(AudioPort::buffer_mut),
            ),
            ChannelKind::Midi(c) => c.finalize(
                input.and_then(|s| s.port.as_midi()).map(MidiPort::messages),
                output
                    .and_then(|s| s.port.as_midi_mut())
                    .map(MidiPort::pending_mut),
            ),
        }
    }

    fn process_chain(&mut self, key: ChainKey, n_frames: u32) -> LooperResult<()> {
        let slot = self
            .chains
            .get_mut(key)
            .ok_or(LooperError::Expired("chain"))?;
        slot.buffers.prepare(n_frames);

        for (i, &port) in slot.audio_inputs.iter().enumerate() {
            let src = self.ports.get(port).and_then(|s| s.port.as_audio());
            if let (Some(src), Some(dst)) = (src, slot.buffers.audio_in_mut(i)) {
                let n = src.buffer().len().min(dst.len());
                dst[..n].copy_from_slice(&src.buffer()[..n]);
            }
        }
        for (i, &port) in slot.midi_inputs.iter().enumerate() {
            if let Some(src) = self.ports.get(port).and_then(|s| s.port.as_midi()) {
                for &msg in src.messages() {
                    slot.buffers.push_midi_in(i, msg);
                }
            }
        }

        // An idle chain outputs silence
        let result = if slot.chain.is_ready() && slot.chain.is_active() {
            slot.chain.process(n_frames, &mut slot.buffers)
        } else {
            Ok(())
        };

        for (i, &port) in slot.audio_outputs.iter().enumerate() {
            if let Some(dst) = self.ports.get_mut(port).and_then(|s| s.port.as_audio_mut()) {
                dst.prepare(n_frames);
                if let Some(out) = slot.buffers.audio_out(i) {
                    dst.fill_from(out);
                }
            }
        }
        result
    }
}

fn mix_port(dst: &mut Port, src: &Port) {
    match (dst, src) {
        (Port::Audio(d), Port::Audio(s)) => d.mix_from(s.buffer()),
        (Port::Midi(d), Port::Midi(s)) => {
            for &msg in s.messages() {
                d.write(msg);
            }
        }
        _ => {}
    }
}

/// A read-only and a writable port at the same time
fn port_pair(
    ports: &mut Arena<PortKey, PortSlot>,
    input: Option<PortKey>,
    output: Option<PortKey>,
) -> (Option<&PortSlot>, Option<&mut PortSlot>) {
    match (input, output) {
        (Some(a), Some(b)) => {
            let (a, b) = ports.get2_mut(a, b);
            (a.map(|a| &*a), b)
        }
        (Some(a), None) => (ports.get(a), None),
        (None, Some(b)) => (None, ports.get_mut(b)),
        (None, None) => (None, None),
    }
}

/// Driver-facing entry point of a session
pub struct SessionProcessor {
    handle: ProcessHandle<SessionCore>,
    schedule: Arc<SharedCell<Schedule>>,
}

impl SessionProcessor {
    pub fn new(handle: ProcessHandle<SessionCore>, schedule: Arc<SharedCell<Schedule>>) -> Self {
        Self { handle, schedule }
    }
}

impl AudioProcessor for SessionProcessor {
    fn process(&mut self, io: &mut dyn CycleIo) {
        let schedule = &self.schedule;
        // Loaded after the drain: a deletion command is always preceded by
        // the schedule that no longer references its object
        let ran = self.handle.try_cycle(|core| {
            let current = schedule.get();
            core.cycle(&current, io);
        });
        if ran.is_none() {
            log::trace!("Skipped a cycle: session state is held by a control thread");
        }
    }
}
