//! Processing graph nodes
//!
//! Every object of the topology contributes one or two nodes:
//!
//! | owner                   | nodes                     |
//! |-------------------------|---------------------------|
//! | input port              | combined                  |
//! | output port             | prepare + process         |
//! | channel                 | process                   |
//! | loop                    | combined, co-processed    |
//! | effect chain            | combined                  |
//!
//! An output port is cleared by its prepare node before anything mixes into
//! it, and finished by its process node after every producer ran. All
//! loops form one co-process group: sync-coupled loops must advance the
//! same sub-chunks together, and grouping all of them keeps the step count
//! independent of how sync sources are wired.

use std::collections::HashMap;
use std::fmt;

use crate::engine::arena::{ChainKey, ChannelKey, LoopKey, PortKey};
use crate::graph::topology::Topology;
use crate::types::PortDirection;

/// Node identity, resolved against the session's arenas when run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    PortPrepare(PortKey),
    PortProcess(PortKey),
    Loop(LoopKey),
    Channel(ChannelKey),
    Chain(ChainKey),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::PortPrepare(k) => write!(f, "{}/prepare", k),
            NodeId::PortProcess(k) => write!(f, "{}/process", k),
            NodeId::Loop(k) => write!(f, "{}", k),
            NodeId::Channel(k) => write!(f, "{}", k),
            NodeId::Chain(k) => write!(f, "{}", k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Prepare,
    Process,
    Combined,
}

/// Co-process group of all loops
pub const LOOP_GROUP: usize = 0;

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Sort key inside a schedule level
    pub name: String,
    pub group: Option<usize>,
    incoming: Vec<usize>,
    outgoing: Vec<usize>,
}

/// Nodes and edges derived from a [`Topology`]
#[derive(Debug, Default)]
pub struct ProcessingGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
}

impl ProcessingGraph {
    pub fn from_topology(topo: &Topology) -> Self {
        let mut graph = Self::default();

        for (key, port) in topo.ports.iter() {
            match port.direction {
                PortDirection::Input => {
                    graph.add(NodeId::PortProcess(key), NodeKind::Combined, &port.name, None);
                }
                PortDirection::Output => {
                    let prepare =
                        graph.add(NodeId::PortPrepare(key), NodeKind::Prepare, &port.name, None);
                    let process =
                        graph.add(NodeId::PortProcess(key), NodeKind::Process, &port.name, None);
                    graph.link(prepare, process);
                }
            }
        }
        for (key, _) in topo.loops.iter() {
            graph.add(NodeId::Loop(key), NodeKind::Combined, "", Some(LOOP_GROUP));
        }
        for (key, chain) in topo.chains.iter() {
            graph.add(NodeId::Chain(key), NodeKind::Combined, &chain.name, None);
        }

        for (key, chan) in topo.channels.iter() {
            let node = NodeId::Channel(key);
            graph.add(node, NodeKind::Process, "", None);
            graph.edge(NodeId::Loop(chan.loop_key), node);
            if let Some(input) = chan.input {
                graph.edge(NodeId::PortProcess(input), node);
            }
            if let Some(output) = chan.output {
                graph.edge(NodeId::PortPrepare(output), node);
                graph.edge(node, NodeId::PortProcess(output));
            }
        }
        for (key, port) in topo.ports.iter() {
            for &source in &port.sources {
                graph.edge(NodeId::PortProcess(source), NodeId::PortProcess(key));
            }
        }
        for (key, chain) in topo.chains.iter() {
            let node = NodeId::Chain(key);
            for input in chain.inputs() {
                graph.edge(NodeId::PortProcess(input), node);
            }
            for &output in &chain.audio_outputs {
                graph.edge(node, NodeId::PortProcess(output));
            }
        }
        graph
    }

    fn add(&mut self, id: NodeId, kind: NodeKind, label: &str, group: Option<usize>) -> usize {
        let name = if label.is_empty() {
            id.to_string()
        } else {
            format!("{} ({})", id, label)
        };
        self.nodes.push(Node {
            id,
            kind,
            name,
            group,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        });
        let idx = self.nodes.len() - 1;
        self.index.insert(id, idx);
        idx
    }

    fn link(&mut self, from: usize, to: usize) {
        if !self.nodes[from].outgoing.contains(&to) {
            self.nodes[from].outgoing.push(to);
            self.nodes[to].incoming.push(from);
        }
    }

    /// Add an edge between two nodes if both exist
    fn edge(&mut self, from: NodeId, to: NodeId) {
        if let (Some(&a), Some(&b)) = (self.index.get(&from), self.index.get(&to)) {
            self.link(a, b);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn find(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.nodes[node].incoming
    }

    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.nodes[node].outgoing
    }

    /// Nodes that must run in the same step as `node`, itself included
    pub fn co_process_peers(&self, node: usize) -> Vec<usize> {
        match self.nodes[node].group {
            Some(group) => (0..self.nodes.len())
                .filter(|&i| self.nodes[i].group == Some(group))
                .collect(),
            None => vec![node],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::topology::{ChannelInfo, LoopInfo, PortInfo, PortOwner};
    use crate::looping::status::ChannelStatus;
    use crate::looping::transport::LoopStatus;
    use crate::port::PortStatus;
    use crate::types::PortDataType;
    use std::sync::Arc;

    fn port(name: &str, direction: PortDirection) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            data_type: PortDataType::Audio,
            direction,
            owner: PortOwner::Driver,
            sources: Vec::new(),
            status: Arc::new(PortStatus::new()),
        }
    }

    #[test]
    fn test_channel_edges() {
        let mut topo = Topology::new();
        let input = topo.ports.insert(port("in", PortDirection::Input));
        let output = topo.ports.insert(port("out", PortDirection::Output));
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

        let graph = ProcessingGraph::from_topology(&topo);
        assert_eq!(graph.len(), 5);
        let c = graph.find(NodeId::Channel(chan)).unwrap();
        let incoming: Vec<NodeId> = graph
            .incoming(c)
            .iter()
            .map(|&i| graph.nodes()[i].id)
            .collect();
        assert!(incoming.contains(&NodeId::Loop(lp)));
        assert!(incoming.contains(&NodeId::PortProcess(input)));
        assert!(incoming.contains(&NodeId::PortPrepare(output)));
        let out = graph.find(NodeId::PortProcess(output)).unwrap();
        assert_eq!(graph.outgoing(c), &[out]);
        assert_eq!(graph.nodes()[out].kind, NodeKind::Process);
        assert!(graph.nodes()[out].name.contains("out"));
    }

    #[test]
    fn test_all_loops_are_peers() {
        let mut topo = Topology::new();
        for _ in 0..3 {
            topo.loops.insert(LoopInfo {
                channels: Vec::new(),
                sync_source: None,
                status: Arc::new(LoopStatus::default()),
            });
        }
        let graph = ProcessingGraph::from_topology(&topo);
        assert_eq!(graph.co_process_peers(1), vec![0, 1, 2]);
    }
}
