//! Schedule computation
//!
//! Kahn's algorithm over units, where a unit is either a single node or a
//! whole co-process group. Units become ready level by level; inside a
//! level they are ordered by name so equal topologies give equal
//! schedules.

use std::collections::BTreeSet;

use crate::error::{LooperError, LooperResult};
use crate::graph::node::{NodeId, ProcessingGraph};

/// Nodes executed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    nodes: Vec<NodeId>,
    co_process: bool,
}

impl Step {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Whether the nodes run as one unit instead of one by one
    pub fn is_co_process(&self) -> bool {
        self.co_process
    }
}

/// Ordered steps of one processing cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    generation: u64,
    steps: Vec<Step>,
}

impl Schedule {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Id of the request this schedule was computed for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.steps.iter().any(|s| s.nodes.contains(&node))
    }

    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.steps.iter().position(|s| s.nodes.contains(&node))
    }
}

struct Unit {
    nodes: Vec<usize>,
    name: String,
    co_process: bool,
}

/// Order `graph` into steps
///
/// Fails with [`LooperError::GraphCycle`] naming the nodes that could not
/// be ordered.
pub fn compute_schedule(graph: &ProcessingGraph, generation: u64) -> LooperResult<Schedule> {
    let nodes = graph.nodes();
    let mut units: Vec<Unit> = Vec::new();
    let mut unit_of = vec![usize::MAX; nodes.len()];
    for (idx, node) in nodes.iter().enumerate() {
        if unit_of[idx] != usize::MAX {
            continue;
        }
        let members = graph.co_process_peers(idx);
        let u = units.len();
        for &m in &members {
            unit_of[m] = u;
        }
        let name = members
            .iter()
            .map(|&m| nodes[m].name.as_str())
            .min()
            .unwrap_or_default()
            .to_string();
        units.push(Unit {
            co_process: node.group.is_some(),
            nodes: members,
            name,
        });
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); units.len()];
    for (idx, _) in nodes.iter().enumerate() {
        for &to in graph.outgoing(idx) {
            let (a, b) = (unit_of[idx], unit_of[to]);
            if a != b {
                successors[a].insert(b);
            }
        }
    }
    let mut in_degree = vec![0usize; units.len()];
    for succ in &successors {
        for &b in succ {
            in_degree[b] += 1;
        }
    }

    let mut steps = Vec::with_capacity(units.len());
    let mut level: Vec<usize> = (0..units.len()).filter(|&u| in_degree[u] == 0).collect();
    while !level.is_empty() {
        level.sort_by(|&a, &b| units[a].name.cmp(&units[b].name));
        let mut next = Vec::new();
        for &u in &level {
            let unit = &units[u];
            steps.push(Step {
                nodes: unit.nodes.iter().map(|&n| nodes[n].id).collect(),
                co_process: unit.co_process,
            });
            for &b in &successors[u] {
                in_degree[b] -= 1;
                if in_degree[b] == 0 {
                    next.push(b);
                }
            }
        }
        level = next;
    }

    if steps.len() < units.len() {
        let stuck: Vec<&str> = (0..units.len())
            .filter(|&u| in_degree[u] > 0)
            .map(|u| units[u].name.as_str())
            .collect();
        return Err(LooperError::GraphCycle(stuck.join(", ")));
    }
    Ok(Schedule { generation, steps })
}
