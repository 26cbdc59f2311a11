//! In-process driver without hardware
//!
//! Runs the engine on its own thread, either one buffer per period
//! (Automatic) or only as many samples as a test asks for (Controlled).
//! Ports are plain buffers: tests queue input into them and take the
//! captured output back out through a [`DummyControl`].
//!
//! In Controlled mode the thread keeps running 0-frame cycles while no
//! samples are requested, so queued commands are still executed promptly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use looper_midi::MidiMessage;

use super::driver::{AudioMidiDriver, AudioProcessor, CycleIo, DriverPortId};
use super::error::{DriverError, DriverResult};
use crate::config::{DriverConfig, DummyMode};
use crate::types::{PortDataType, PortDirection, Sample};

/// Period of idle 0-frame cycles in Controlled mode
const IDLE_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound for [`DummyControl::wait_process`]
const WAIT_PROCESS_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct DummyPort {
    name: String,
    data_type: PortDataType,
    direction: PortDirection,
    buffer: Vec<Sample>,
    queued_audio: VecDeque<Sample>,
    captured_audio: Vec<Sample>,
    /// Times relative to the start of the next cycle
    queued_midi: VecDeque<MidiMessage>,
    cycle_midi: Vec<MidiMessage>,
    /// Times in frames since the driver started
    captured_midi: Vec<MidiMessage>,
}

impl DummyPort {
    fn new(name: &str, data_type: PortDataType, direction: PortDirection) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            direction,
            buffer: Vec::new(),
            queued_audio: VecDeque::new(),
            captured_audio: Vec::new(),
            queued_midi: VecDeque::new(),
            cycle_midi: Vec::new(),
            captured_midi: Vec::new(),
        }
    }

    fn begin(&mut self, n_frames: u32) {
        self.buffer.clear();
        self.buffer.resize(n_frames as usize, 0.0);
        self.cycle_midi.clear();
        if self.direction != PortDirection::Input {
            return;
        }
        match self.data_type {
            PortDataType::Audio => {
                for s in &mut self.buffer {
                    *s = self.queued_audio.pop_front().unwrap_or(0.0);
                }
            }
            PortDataType::Midi => {
                while let Some(msg) = self.queued_midi.front().copied() {
                    if msg.time() >= n_frames {
                        break;
                    }
                    self.cycle_midi.push(msg);
                    self.queued_midi.pop_front();
                }
                for msg in &mut self.queued_midi {
                    msg.set_time(msg.time() - n_frames);
                }
            }
        }
    }

    fn end(&mut self) {
        if self.direction == PortDirection::Output && self.data_type == PortDataType::Audio {
            self.captured_audio.extend_from_slice(&self.buffer);
        }
    }
}

#[derive(Default)]
struct PortTable {
    ports: Vec<Option<DummyPort>>,
}

impl PortTable {
    fn open(&mut self, name: &str, data_type: PortDataType, direction: PortDirection) -> DriverPortId {
        self.ports.push(Some(DummyPort::new(name, data_type, direction)));
        DriverPortId(self.ports.len() - 1)
    }

    fn get_mut(&mut self, id: DriverPortId) -> Option<&mut DummyPort> {
        self.ports.get_mut(id.0).and_then(Option::as_mut)
    }

    fn by_name(&mut self, name: &str) -> Option<&mut DummyPort> {
        self.ports.iter_mut().flatten().find(|p| p.name == name)
    }
}

#[derive(Debug, Default)]
struct Transport {
    /// Samples requested but not yet processed
    requested: u64,
    processed: u64,
}

struct Shared {
    sample_rate: u32,
    buffer_size: u32,
    mode: DummyMode,
    ports: Mutex<PortTable>,
    transport: Mutex<Transport>,
    changed: Condvar,
    running: AtomicBool,
    stop: AtomicBool,
}

/// One cycle's view of the port table
struct DummyCycle<'a> {
    n_frames: u32,
    frame_time: u64,
    table: &'a mut PortTable,
}

impl CycleIo for DummyCycle<'_> {
    fn n_frames(&self) -> u32 {
        self.n_frames
    }

    fn audio_input(&self, port: DriverPortId) -> Option<&[Sample]> {
        let port = self.table.ports.get(port.0)?.as_ref()?;
        (port.data_type == PortDataType::Audio && port.direction == PortDirection::Input)
            .then_some(port.buffer.as_slice())
    }

    fn audio_output(&mut self, port: DriverPortId) -> Option<&mut [Sample]> {
        let port = self.table.get_mut(port)?;
        (port.data_type == PortDataType::Audio && port.direction == PortDirection::Output)
            .then_some(port.buffer.as_mut_slice())
    }

    fn midi_input(&mut self, port: DriverPortId, sink: &mut dyn FnMut(MidiMessage)) {
        if let Some(port) = self.table.get_mut(port) {
            for msg in &port.cycle_midi {
                sink(*msg);
            }
        }
    }

    fn midi_output(&mut self, port: DriverPortId, messages: &[MidiMessage]) {
        let frame_time = self.frame_time;
        if let Some(port) = self.table.get_mut(port) {
            if port.direction != PortDirection::Output {
                return;
            }
            port.captured_midi.extend(messages.iter().map(|m| {
                let time = frame_time.saturating_add(u64::from(m.time()));
                m.with_time(u32::try_from(time).unwrap_or(u32::MAX))
            }));
        }
    }
}

impl Shared {
    fn run_cycle(&self, processor: &mut dyn AudioProcessor, n_frames: u32) {
        let frame_time = lock(&self.transport).processed;
        let mut table = lock(&self.ports);
        for port in table.ports.iter_mut().flatten() {
            port.begin(n_frames);
        }
        let mut io = DummyCycle {
            n_frames,
            frame_time,
            table: &mut *table,
        };
        processor.process(&mut io);
        for port in table.ports.iter_mut().flatten() {
            port.end();
        }
    }

    fn run(&self, mut processor: Box<dyn AudioProcessor>) {
        log::info!(
            "Dummy driver running ({:?}, {}Hz, {} frames)",
            self.mode,
            self.sample_rate,
            self.buffer_size
        );
        match self.mode {
            DummyMode::Automatic => self.run_automatic(processor.as_mut()),
            DummyMode::Controlled => self.run_controlled(processor.as_mut()),
        }
        self.running.store(false, Ordering::Release);
        self.changed.notify_all();
        log::info!("Dummy driver stopped");
    }

    fn run_automatic(&self, processor: &mut dyn AudioProcessor) {
        let period = Duration::from_secs_f64(
            f64::from(self.buffer_size) / f64::from(self.sample_rate.max(1)),
        );
        let mut next = Instant::now();
        while !self.stop.load(Ordering::Acquire) {
            next += period;
            self.run_cycle(processor, self.buffer_size);
            lock(&self.transport).processed += u64::from(self.buffer_size);
            self.changed.notify_all();
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            }
        }
    }

    fn run_controlled(&self, processor: &mut dyn AudioProcessor) {
        while !self.stop.load(Ordering::Acquire) {
            let n_frames = {
                let mut transport = lock(&self.transport);
                if transport.requested == 0 {
                    transport = self
                        .changed
                        .wait_timeout(transport, IDLE_INTERVAL)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
                transport.requested.min(u64::from(self.buffer_size)) as u32
            };
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.run_cycle(processor, n_frames);
            if n_frames > 0 {
                let mut transport = lock(&self.transport);
                transport.requested -= u64::from(n_frames);
                transport.processed += u64::from(n_frames);
                drop(transport);
                self.changed.notify_all();
            }
        }
    }
}

/// Test and automation handle of a [`DummyDriver`]
///
/// Stays valid after the driver itself was moved into a session.
#[derive(Clone)]
pub struct DummyControl {
    shared: Arc<Shared>,
}

impl DummyControl {
    /// Ask a Controlled driver to process `n_frames` more samples
    pub fn request_samples(&self, n_frames: u32) {
        lock(&self.shared.transport).requested += u64::from(n_frames);
        self.shared.changed.notify_all();
    }

    /// Block until every requested sample has been processed
    ///
    /// Returns false if the driver is not running or did not catch up in
    /// time.
    pub fn wait_process(&self) -> bool {
        let deadline = Instant::now() + WAIT_PROCESS_TIMEOUT;
        let mut transport = lock(&self.shared.transport);
        while transport.requested > 0 {
            let now = Instant::now();
            if !self.shared.running.load(Ordering::Acquire) || now >= deadline {
                log::warn!(
                    "Dummy driver did not process {} requested samples",
                    transport.requested
                );
                return false;
            }
            transport = self
                .shared
                .changed
                .wait_timeout(transport, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        true
    }

    /// Process exactly `n_frames` samples and wait for them
    pub fn run(&self, n_frames: u32) -> bool {
        self.request_samples(n_frames);
        self.wait_process()
    }

    /// Samples processed since the driver was created
    pub fn processed_frames(&self) -> u64 {
        lock(&self.shared.transport).processed
    }

    /// Append samples to be captured by input port `name`
    pub fn queue_audio_input(&self, name: &str, samples: &[Sample]) -> bool {
        let mut table = lock(&self.shared.ports);
        match table.by_name(name) {
            Some(port) => {
                port.queued_audio.extend(samples.iter().copied());
                true
            }
            None => false,
        }
    }

    /// Queue messages on input port `name`; times count from the next cycle
    pub fn queue_midi_input(&self, name: &str, messages: &[MidiMessage]) -> bool {
        let mut table = lock(&self.shared.ports);
        match table.by_name(name) {
            Some(port) => {
                port.queued_midi.extend(messages.iter().copied());
                port.queued_midi
                    .make_contiguous()
                    .sort_by_key(|m| m.time());
                true
            }
            None => false,
        }
    }

    /// Everything played out of port `name` since the last call
    pub fn take_audio_output(&self, name: &str) -> Vec<Sample> {
        let mut table = lock(&self.shared.ports);
        table
            .by_name(name)
            .map(|p| std::mem::take(&mut p.captured_audio))
            .unwrap_or_default()
    }

    /// Messages sent out of port `name` since the last call, stamped with
    /// the driver frame they were sent at
    pub fn take_midi_output(&self, name: &str) -> Vec<MidiMessage> {
        let mut table = lock(&self.shared.ports);
        table
            .by_name(name)
            .map(|p| std::mem::take(&mut p.captured_midi))
            .unwrap_or_default()
    }
}

pub struct DummyDriver {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl DummyDriver {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                sample_rate: config.sample_rate,
                buffer_size: config.buffer_size.max(1),
                mode: config.dummy_mode,
                ports: Mutex::new(PortTable::default()),
                transport: Mutex::new(Transport::default()),
                changed: Condvar::new(),
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
            }),
            thread: None,
        }
    }

    /// Controlled driver processing at most `buffer_size` frames per cycle
    pub fn controlled(buffer_size: u32) -> Self {
        Self::new(&DriverConfig {
            buffer_size,
            dummy_mode: DummyMode::Controlled,
            ..DriverConfig::default()
        })
    }

    pub fn control(&self) -> DummyControl {
        DummyControl {
            shared: Arc::clone(&self.shared),
        }
    }

    fn open_port(
        &mut self,
        name: &str,
        data_type: PortDataType,
        direction: PortDirection,
    ) -> DriverResult<DriverPortId> {
        let mut table = lock(&self.shared.ports);
        if table.by_name(name).is_some() {
            return Err(DriverError::PortError(format!(
                "Port '{}' already exists",
                name
            )));
        }
        let id = table.open(name, data_type, direction);
        log::debug!("Dummy driver opened {:?} {:?} port '{}'", data_type, direction, name);
        Ok(id)
    }
}

impl AudioMidiDriver for DummyDriver {
    fn start(&mut self, processor: Box<dyn AudioProcessor>) -> DriverResult<()> {
        if self.thread.is_some() {
            return Err(DriverError::StartFailed(
                "Dummy driver is already running".to_string(),
            ));
        }
        self.shared.stop.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("looper-dummy".to_string())
            .spawn(move || shared.run(processor))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                DriverError::StartFailed(e.to_string())
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    fn open_audio_port(&mut self, name: &str, direction: PortDirection) -> DriverResult<DriverPortId> {
        self.open_port(name, PortDataType::Audio, direction)
    }

    fn open_midi_port(&mut self, name: &str, direction: PortDirection) -> DriverResult<DriverPortId> {
        self.open_port(name, PortDataType::Midi, direction)
    }

    fn close_port(&mut self, port: DriverPortId) -> DriverResult<()> {
        let mut table = lock(&self.shared.ports);
        match table.ports.get_mut(port.0).and_then(Option::take) {
            Some(p) => {
                log::debug!("Dummy driver closed port '{}'", p.name);
                Ok(())
            }
            None => Err(DriverError::PortError(format!("No port {}", port.0))),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.shared.buffer_size
    }

    fn is_active(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::Release);
        self.shared.changed.notify_all();
        if handle.join().is_err() {
            log::error!("Dummy driver thread panicked");
        }
        self.shared.running.store(false, Ordering::Release);
    }
}

impl Drop for DummyDriver {
    fn drop(&mut self) {
        self.close();
    }
}
