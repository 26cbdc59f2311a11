//! Audio/MIDI drivers
//!
//! A driver owns the process thread and calls into the engine once per
//! cycle. Two implementations:
//! - **Linux**: native JACK with dynamically registered ports (with the
//!   `jack-backend` feature)
//! - **Everywhere**: the in-process dummy driver, used for tests, offline
//!   runs and as the fallback when a real driver cannot start
//!
//! # Example Usage
//!
//! ```ignore
//! use looper_core::audio::create_driver;
//! use looper_core::config::DriverConfig;
//!
//! // Falls back to the dummy driver if JACK is not running
//! let driver = create_driver(&DriverConfig::default());
//! session.set_driver(driver)?;
//! ```

mod driver;
mod dummy;
mod error;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;

pub use driver::{create_driver, AudioMidiDriver, AudioProcessor, CycleIo, DriverPortId};
pub use dummy::{DummyControl, DummyDriver};
pub use error::{DriverError, DriverResult};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::JackDriver;
