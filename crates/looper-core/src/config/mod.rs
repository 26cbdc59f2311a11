//! Engine configuration
//!
//! - [`EngineConfig`]: pool sizes, queue limits, MIDI capacities and the
//!   driver selection, persisted as YAML
//! - Generic YAML loading/saving helpers
//! - Default config path
//!
//! # Usage
//!
//! ```ignore
//! use looper_core::config::{default_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path());
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{DriverConfig, DriverKind, DummyMode, EngineConfig};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
