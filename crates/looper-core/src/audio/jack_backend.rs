//! Native JACK driver for Linux
//!
//! Ports are registered from the control thread at any time. Ports that
//! appear while the client is active reach the process handler through a
//! lock-free queue; closed ports travel back the same way so they are
//! unregistered off the RT thread.
//!
//! ```text
//! ┌──────────────────┐  register_port()  ┌─────────────────────┐
//! │  Control thread  │───(id, port)─────►│  JACK RT thread     │
//! │   (JackDriver)   │───close id───────►│  (JackProcess)      │
//! │                  │◄──retired port────│  AudioProcessor     │
//! └──────────────────┘                   └─────────────────────┘
//! ```

use jack::{
    AsyncClient, AudioIn, AudioOut, Client, ClientOptions, Control, MidiIn, MidiOut,
    NotificationHandler, Port, ProcessHandler, ProcessScope, RawMidi,
};
use looper_midi::MidiMessage;

use super::driver::{AudioMidiDriver, AudioProcessor, CycleIo, DriverPortId};
use super::error::{DriverError, DriverResult};
use crate::config::DriverConfig;
use crate::types::{PortDirection, Sample};

/// Port slots pre-allocated on the process side
const MAX_PORTS: usize = 512;

/// Depth of the port hand-over queues
const PORT_QUEUE_CAPACITY: usize = 64;

enum JackPort {
    AudioIn(Port<AudioIn>),
    AudioOut(Port<AudioOut>),
    MidiIn(Port<MidiIn>),
    MidiOut(Port<MidiOut>),
}

impl JackPort {
    fn unregister(self, client: &Client) -> Result<(), jack::Error> {
        match self {
            JackPort::AudioIn(p) => client.unregister_port(p),
            JackPort::AudioOut(p) => client.unregister_port(p),
            JackPort::MidiIn(p) => client.unregister_port(p),
            JackPort::MidiOut(p) => client.unregister_port(p),
        }
    }
}

/// JACK notification handler
struct JackNotifications;

impl NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}

/// JACK process handler
///
/// Owns the engine's processor exclusively.
struct JackProcess {
    processor: Box<dyn AudioProcessor>,
    ports: Vec<Option<JackPort>>,
    added_rx: rtrb::Consumer<(DriverPortId, JackPort)>,
    closed_rx: rtrb::Consumer<DriverPortId>,
    retired_tx: rtrb::Producer<JackPort>,
}

struct JackCycle<'a> {
    ps: &'a ProcessScope,
    ports: &'a mut [Option<JackPort>],
}

impl CycleIo for JackCycle<'_> {
    fn n_frames(&self) -> u32 {
        self.ps.n_frames()
    }

    fn audio_input(&self, port: DriverPortId) -> Option<&[Sample]> {
        match self.ports.get(port.0)? {
            Some(JackPort::AudioIn(p)) => Some(p.as_slice(self.ps)),
            _ => None,
        }
    }

    fn audio_output(&mut self, port: DriverPortId) -> Option<&mut [Sample]> {
        match self.ports.get_mut(port.0)? {
            Some(JackPort::AudioOut(p)) => Some(p.as_mut_slice(self.ps)),
            _ => None,
        }
    }

    fn midi_input(&mut self, port: DriverPortId, sink: &mut dyn FnMut(MidiMessage)) {
        let Some(Some(JackPort::MidiIn(p))) = self.ports.get(port.0) else {
            return;
        };
        for raw in p.iter(self.ps) {
            match MidiMessage::new(raw.time, raw.bytes) {
                Ok(msg) => sink(msg),
                Err(e) => log::debug!("Dropped incoming MIDI message: {}", e),
            }
        }
    }

    fn midi_output(&mut self, port: DriverPortId, messages: &[MidiMessage]) {
        let Some(Some(JackPort::MidiOut(p))) = self.ports.get_mut(port.0) else {
            return;
        };
        let mut writer = p.writer(self.ps);
        for msg in messages {
            let raw = RawMidi {
                time: msg.time(),
                bytes: msg.bytes(),
            };
            if let Err(e) = writer.write(&raw) {
                log::warn!("JACK MIDI write failed: {}", e);
            }
        }
    }
}

impl ProcessHandler for JackProcess {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        // Closes first: an id may be reused by a port added after it
        while let Ok(id) = self.closed_rx.pop() {
            if let Some(port) = self.ports.get_mut(id.0).and_then(Option::take) {
                // Queue sized to the id space; a full queue only leaks the port
                let _ = self.retired_tx.push(port);
            }
        }
        while let Ok((id, port)) = self.added_rx.pop() {
            if let Some(slot) = self.ports.get_mut(id.0) {
                *slot = Some(port);
            }
        }

        // JACK hands back last cycle's data; a skipped cycle must play silence
        for port in self.ports.iter_mut().flatten() {
            if let JackPort::AudioOut(p) = port {
                p.as_mut_slice(ps).fill(0.0);
            }
        }

        let mut io = JackCycle {
            ps,
            ports: &mut self.ports,
        };
        self.processor.process(&mut io);
        Control::Continue
    }
}

struct ActiveClient {
    client: AsyncClient<JackNotifications, JackProcess>,
    added_tx: rtrb::Producer<(DriverPortId, JackPort)>,
    closed_tx: rtrb::Producer<DriverPortId>,
    retired_rx: rtrb::Consumer<JackPort>,
}

enum ClientState {
    Inactive {
        client: Client,
        /// Ports registered before activation
        ports: Vec<(DriverPortId, JackPort)>,
    },
    Active(ActiveClient),
    Closed,
}

pub struct JackDriver {
    state: ClientState,
    sample_rate: u32,
    buffer_size: u32,
    next_id: usize,
    free_ids: Vec<usize>,
}

impl JackDriver {
    /// Connect to a running JACK server
    pub fn new(config: &DriverConfig) -> DriverResult<Self> {
        // JACK may rename if another client has the same name
        let (client, _status) = Client::new(&config.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| DriverError::StartFailed(format!("Failed to create JACK client: {}", e)))?;
        let sample_rate = client.sample_rate() as u32;
        let buffer_size = client.buffer_size();

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client.name(),
            sample_rate,
            buffer_size,
            (buffer_size as f32 / sample_rate as f32) * 1000.0
        );

        Ok(Self {
            state: ClientState::Inactive {
                client,
                ports: Vec::new(),
            },
            sample_rate,
            buffer_size,
            next_id: 0,
            free_ids: Vec::new(),
        })
    }

    fn client(&self) -> DriverResult<&Client> {
        match &self.state {
            ClientState::Inactive { client, .. } => Ok(client),
            ClientState::Active(active) => Ok(active.client.as_client()),
            ClientState::Closed => Err(DriverError::NotStarted),
        }
    }

    fn allocate_id(&mut self) -> DriverResult<DriverPortId> {
        if let Some(id) = self.free_ids.pop() {
            return Ok(DriverPortId(id));
        }
        if self.next_id >= MAX_PORTS {
            return Err(DriverError::PortError(format!(
                "More than {} JACK ports",
                MAX_PORTS
            )));
        }
        self.next_id += 1;
        Ok(DriverPortId(self.next_id - 1))
    }

    fn add_port(&mut self, port: JackPort) -> DriverResult<DriverPortId> {
        self.reap_retired();
        let id = self.allocate_id()?;
        match &mut self.state {
            ClientState::Inactive { ports, .. } => ports.push((id, port)),
            ClientState::Active(active) => {
                if active.added_tx.push((id, port)).is_err() {
                    self.free_ids.push(id.0);
                    return Err(DriverError::PortError(
                        "JACK port queue is full".to_string(),
                    ));
                }
            }
            ClientState::Closed => return Err(DriverError::NotStarted),
        }
        Ok(id)
    }

    /// Unregister ports the process handler has let go of
    fn reap_retired(&mut self) {
        let ClientState::Active(active) = &mut self.state else {
            return;
        };
        while let Ok(port) = active.retired_rx.pop() {
            if let Err(e) = port.unregister(active.client.as_client()) {
                log::warn!("Failed to unregister JACK port: {}", e);
            }
        }
    }
}

impl AudioMidiDriver for JackDriver {
    fn start(&mut self, processor: Box<dyn AudioProcessor>) -> DriverResult<()> {
        let ClientState::Inactive { client, ports } =
            std::mem::replace(&mut self.state, ClientState::Closed)
        else {
            return Err(DriverError::StartFailed(
                "JACK client is already active or closed".to_string(),
            ));
        };
        let (added_tx, added_rx) = rtrb::RingBuffer::new(PORT_QUEUE_CAPACITY);
        let (closed_tx, closed_rx) = rtrb::RingBuffer::new(PORT_QUEUE_CAPACITY);
        let (retired_tx, retired_rx) = rtrb::RingBuffer::new(MAX_PORTS);

        let mut slots: Vec<Option<JackPort>> = (0..MAX_PORTS).map(|_| None).collect();
        for (id, port) in ports {
            slots[id.0] = Some(port);
        }
        let process = JackProcess {
            processor,
            ports: slots,
            added_rx,
            closed_rx,
            retired_tx,
        };
        let client = client
            .activate_async(JackNotifications, process)
            .map_err(|e| DriverError::StartFailed(format!("Failed to activate JACK client: {}", e)))?;
        log::info!("JACK client activated");
        self.state = ClientState::Active(ActiveClient {
            client,
            added_tx,
            closed_tx,
            retired_rx,
        });
        Ok(())
    }

    fn open_audio_port(&mut self, name: &str, direction: PortDirection) -> DriverResult<DriverPortId> {
        let client = self.client()?;
        let port_err = |e: jack::Error| {
            DriverError::PortError(format!("Failed to register port '{}': {}", name, e))
        };
        let port = match direction {
            PortDirection::Input => {
                JackPort::AudioIn(client.register_port(name, AudioIn::default()).map_err(port_err)?)
            }
            PortDirection::Output => {
                JackPort::AudioOut(client.register_port(name, AudioOut::default()).map_err(port_err)?)
            }
        };
        self.add_port(port)
    }

    fn open_midi_port(&mut self, name: &str, direction: PortDirection) -> DriverResult<DriverPortId> {
        let client = self.client()?;
        let port_err = |e: jack::Error| {
            DriverError::PortError(format!("Failed to register port '{}': {}", name, e))
        };
        let port = match direction {
            PortDirection::Input => {
                JackPort::MidiIn(client.register_port(name, MidiIn::default()).map_err(port_err)?)
            }
            PortDirection::Output => {
                JackPort::MidiOut(client.register_port(name, MidiOut::default()).map_err(port_err)?)
            }
        };
        self.add_port(port)
    }

    fn close_port(&mut self, port: DriverPortId) -> DriverResult<()> {
        match &mut self.state {
            ClientState::Inactive { client, ports } => {
                let idx = ports
                    .iter()
                    .position(|(id, _)| *id == port)
                    .ok_or_else(|| DriverError::PortError(format!("No port {}", port.0)))?;
                let (_, jack_port) = ports.swap_remove(idx);
                jack_port
                    .unregister(client)
                    .map_err(|e| DriverError::PortError(e.to_string()))?;
            }
            ClientState::Active(active) => {
                active
                    .closed_tx
                    .push(port)
                    .map_err(|_| DriverError::PortError("JACK port queue is full".to_string()))?;
            }
            ClientState::Closed => return Err(DriverError::NotStarted),
        }
        self.free_ids.push(port.0);
        self.reap_retired();
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn is_active(&self) -> bool {
        matches!(self.state, ClientState::Active(_))
    }

    fn close(&mut self) {
        if let ClientState::Active(active) = std::mem::replace(&mut self.state, ClientState::Closed)
        {
            if let Err(e) = active.client.deactivate() {
                log::warn!("Failed to deactivate JACK client: {}", e);
            }
            log::info!("JACK client closed");
        }
    }
}

impl Drop for JackDriver {
    fn drop(&mut self) {
        self.close();
    }
}
