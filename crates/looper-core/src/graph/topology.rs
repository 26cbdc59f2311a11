//! Control-side mirror of the session's objects and connections
//!
//! Keys are issued here and reused by the process side
//! ([`crate::engine::Arena::insert_at`]), so both sides name every object
//! the same way. A clone of the topology is what the schedule worker
//! orders.

use std::sync::Arc;

use crate::engine::arena::{Arena, ChainKey, ChannelKey, LoopKey, PortKey};
use crate::looping::status::ChannelStatus;
use crate::looping::transport::LoopStatus;
use crate::port::PortStatus;
use crate::types::{PortDataType, PortDirection};

/// Who provides a port's buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOwner {
    Driver,
    Chain(ChainKey),
}

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub data_type: PortDataType,
    pub direction: PortDirection,
    pub owner: PortOwner,
    /// Ports passing their data into this one
    pub sources: Vec<PortKey>,
    pub status: Arc<PortStatus>,
}

#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub channels: Vec<ChannelKey>,
    pub sync_source: Option<LoopKey>,
    pub status: Arc<LoopStatus>,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub loop_key: LoopKey,
    pub data_type: PortDataType,
    pub input: Option<PortKey>,
    pub output: Option<PortKey>,
    pub status: Arc<ChannelStatus>,
}

#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub name: String,
    pub audio_inputs: Vec<PortKey>,
    pub audio_outputs: Vec<PortKey>,
    pub midi_inputs: Vec<PortKey>,
}

impl ChainInfo {
    /// Ports the chain reads from
    pub fn inputs(&self) -> impl Iterator<Item = PortKey> + '_ {
        self.audio_inputs.iter().chain(&self.midi_inputs).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub ports: Arena<PortKey, PortInfo>,
    pub loops: Arena<LoopKey, LoopInfo>,
    pub channels: Arena<ChannelKey, ChannelInfo>,
    pub chains: Arena<ChainKey, ChainInfo>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every reference to `port` held by channels and other ports
    pub fn forget_port(&mut self, port: PortKey) {
        for (_, chan) in self.channels.iter_mut() {
            if chan.input == Some(port) {
                chan.input = None;
            }
            if chan.output == Some(port) {
                chan.output = None;
            }
        }
        for (_, info) in self.ports.iter_mut() {
            info.sources.retain(|&s| s != port);
        }
    }

    /// Loops that use `key` as their sync source
    pub fn followers(&self, key: LoopKey) -> impl Iterator<Item = LoopKey> + '_ {
        self.loops
            .iter()
            .filter(move |(_, l)| l.sync_source == Some(key))
            .map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(direction: PortDirection) -> PortInfo {
        PortInfo {
            name: "p".to_string(),
            data_type: PortDataType::Audio,
            direction,
            owner: PortOwner::Driver,
            sources: Vec::new(),
            status: Arc::new(PortStatus::new()),
        }
    }

    #[test]
    fn test_forget_port_clears_references() {
        let mut topo = Topology::new();
        let input = topo.ports.insert(port(PortDirection::Input));
        let mut out_info = port(PortDirection::Output);
        out_info.sources.push(input);
        let output = topo.ports.insert(out_info);
        let lp = topo.loops.insert(LoopInfo {
            channels: Vec::new(),
            sync_source: None,
            status: Arc::new(LoopStatus::default()),
        });
        let chan = topo.channels.insert(ChannelInfo {
            loop_key: lp,
            data_type: PortDataType::Audio,
            input: Some(input),
            output: Some(output),
            status: Arc::new(ChannelStatus::new()),
        });

        topo.forget_port(input);
        assert_eq!(topo.channels.get(chan).unwrap().input, None);
        assert_eq!(topo.channels.get(chan).unwrap().output, Some(output));
        assert!(topo.ports.get(output).unwrap().sources.is_empty());
    }
}
