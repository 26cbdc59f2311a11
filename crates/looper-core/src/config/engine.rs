//! Engine configuration types

use serde::{Deserialize, Serialize};

/// Which audio/MIDI driver a backend should start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriverKind {
    /// In-process driver without hardware; always available
    #[default]
    Dummy,
    /// JACK audio server (Linux, `jack-backend` feature)
    Jack,
}

/// How the dummy driver advances time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DummyMode {
    /// Runs one buffer per period, like a sound card would
    #[default]
    Automatic,
    /// Runs only the samples explicitly requested (tests, offline rendering)
    Controlled,
}

/// Driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: DriverKind,
    /// Client name registered with the audio server
    pub client_name: String,
    /// Sample rate of the dummy driver (servers dictate their own)
    pub sample_rate: u32,
    /// Buffer size of the dummy driver in frames
    pub buffer_size: u32,
    pub dummy_mode: DummyMode,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: DriverKind::default(),
            client_name: "looper".to_string(),
            sample_rate: 48000,
            buffer_size: 256,
            dummy_mode: DummyMode::default(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples per pooled audio buffer (chunk size of channel storage)
    pub buffer_size: usize,
    /// Number of buffers the pool keeps ready
    pub pool_buffers: usize,
    /// Refill is requested when fewer buffers than this are ready
    pub pool_low_water: usize,
    /// Pending commands per session before enqueue blocks
    pub command_queue_capacity: usize,
    /// How long control calls wait for the process thread
    pub command_timeout_ms: u64,
    /// Longest take an audio channel can hold; storage for it is reserved
    /// when the channel is created and recording past it stores silence
    pub reserved_loop_samples: usize,
    /// Capture ring depth of newly opened input ports (0 disables)
    pub default_ringbuffer_samples: u32,
    /// Events per MIDI channel storage and per MIDI capture ring
    pub midi_storage_capacity: usize,
    /// Events per MIDI port and cycle
    pub midi_merge_capacity: usize,
    /// Upper bound on sub-chunks per cycle before the scheduler gives up
    pub max_poi_iterations: usize,
    pub driver: DriverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            pool_buffers: 128,
            pool_low_water: 32,
            command_queue_capacity: 1024,
            command_timeout_ms: 1000,
            // Ten minutes at 48 kHz
            reserved_loop_samples: 28_800_000,
            default_ringbuffer_samples: 0,
            midi_storage_capacity: 8192,
            midi_merge_capacity: 1024,
            max_poi_iterations: 1024,
            driver: DriverConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "buffer_size: 64\ndriver:\n  kind: Jack\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.driver.kind, DriverKind::Jack);
        assert_eq!(config.driver.client_name, "looper");
        assert_eq!(config.pool_buffers, EngineConfig::default().pool_buffers);
    }
}
