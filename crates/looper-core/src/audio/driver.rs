//! Driver interface
//!
//! The engine side of a driver is an [`AudioProcessor`]: it is handed a
//! [`CycleIo`] view of the driver's port buffers once per cycle. Ports are
//! opened and closed from control threads through [`AudioMidiDriver`],
//! also while the driver is running.

use looper_midi::MidiMessage;

use super::dummy::DummyDriver;
use super::error::DriverResult;
use crate::config::{DriverConfig, DriverKind};
use crate::types::{PortDirection, Sample};

/// Driver-assigned port number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverPortId(pub usize);

/// Port buffers of one process cycle
pub trait CycleIo {
    fn n_frames(&self) -> u32;

    /// Captured samples of an input port
    fn audio_input(&self, port: DriverPortId) -> Option<&[Sample]>;

    /// Playback buffer of an output port
    ///
    /// Every output buffer starts the cycle silent.
    fn audio_output(&mut self, port: DriverPortId) -> Option<&mut [Sample]>;

    /// Feed every message received on an input port to `sink`, in time order
    fn midi_input(&mut self, port: DriverPortId, sink: &mut dyn FnMut(MidiMessage));

    /// Send time-ordered messages out of an output port
    fn midi_output(&mut self, port: DriverPortId, messages: &[MidiMessage]);
}

/// Per-cycle entry point called on the driver's process thread
pub trait AudioProcessor: Send {
    fn process(&mut self, io: &mut dyn CycleIo);
}

pub trait AudioMidiDriver: Send {
    /// Start calling `processor` once per cycle
    fn start(&mut self, processor: Box<dyn AudioProcessor>) -> DriverResult<()>;

    fn open_audio_port(&mut self, name: &str, direction: PortDirection) -> DriverResult<DriverPortId>;

    fn open_midi_port(&mut self, name: &str, direction: PortDirection) -> DriverResult<DriverPortId>;

    fn close_port(&mut self, port: DriverPortId) -> DriverResult<()>;

    fn sample_rate(&self) -> u32;

    fn buffer_size(&self) -> u32;

    fn is_active(&self) -> bool;

    /// Stop processing; the processor is dropped
    fn close(&mut self);
}

/// Create the driver `config` asks for
///
/// Never fails: when the requested driver is unavailable or cannot connect,
/// a dummy driver with the same settings is returned instead.
pub fn create_driver(config: &DriverConfig) -> Box<dyn AudioMidiDriver> {
    match config.kind {
        DriverKind::Dummy => Box::new(DummyDriver::new(config)),
        DriverKind::Jack => match open_jack(config) {
            Ok(driver) => driver,
            Err(e) => {
                log::warn!("{}; falling back to the dummy driver", e);
                Box::new(DummyDriver::new(config))
            }
        },
    }
}

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
fn open_jack(config: &DriverConfig) -> DriverResult<Box<dyn AudioMidiDriver>> {
    let driver = super::jack_backend::JackDriver::new(config)?;
    Ok(Box::new(driver))
}

#[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
fn open_jack(_config: &DriverConfig) -> DriverResult<Box<dyn AudioMidiDriver>> {
    Err(super::error::DriverError::Unavailable(
        "JACK support is not compiled in".to_string(),
    ))
}
