//! Property-based tests for the engine building blocks

use std::sync::Arc;
use std::time::Duration;

use looper_core::engine::{Arena, BufferPool, CommandQueue, PortKey};
use looper_core::graph::{compute_schedule, NodeId, PortInfo, PortOwner, ProcessingGraph, Topology};
use looper_core::port::PortStatus;
use looper_core::{PortDataType, PortDirection};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum PoolOp {
    Acquire,
    Release,
    Refill,
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => Just(PoolOp::Acquire),
        3 => Just(PoolOp::Release),
        1 => Just(PoolOp::Refill),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Buffers are never lost or duplicated: everything created is either
    /// queued, held by a user, or accounted as dropped.
    #[test]
    fn pool_conserves_buffers(ops in prop::collection::vec(pool_op(), 0..200)) {
        let pool = BufferPool::new(8, 4, 1);
        let mut held = Vec::new();
        for op in ops {
            match op {
                PoolOp::Acquire => held.push(pool.acquire()),
                PoolOp::Release => {
                    if let Some(buffer) = held.pop() {
                        pool.release(buffer);
                    }
                }
                PoolOp::Refill => {
                    pool.refill();
                }
            }
            let stats = pool.stats();
            prop_assert_eq!(stats.available + held.len(), stats.created - stats.dropped);
        }
        for buffer in &held {
            prop_assert!(buffer.iter().all(|&s| s == 0.0));
        }
    }

    /// Queued commands run exactly once, in the order they were sent.
    #[test]
    fn commands_run_in_order(values in prop::collection::vec(any::<u32>(), 0..128)) {
        let queue = CommandQueue::new(Vec::new(), 256, Duration::from_secs(60));
        let handle = queue.process_handle();
        handle.try_cycle(|_: &mut Vec<u32>| ());

        for &v in &values {
            queue.enqueue(move |state: &mut Vec<u32>| {
                state.push(v);
                Ok(())
            }).unwrap();
        }
        prop_assert_eq!(handle.try_cycle(|state| state.len()), Some(values.len()));
        prop_assert_eq!(handle.try_cycle(|state| state.clone()), Some(values));
    }

    /// A removed key never resolves again, even after its slot is reused.
    #[test]
    fn stale_keys_stay_stale(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut arena: Arena<PortKey, usize> = Arena::new();
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (i, insert) in ops.into_iter().enumerate() {
            if insert || live.is_empty() {
                live.push(arena.insert(i));
            } else {
                let key = live.remove(i % live.len());
                prop_assert!(arena.remove(key).is_some());
                dead.push(key);
            }
            for &key in &dead {
                prop_assert!(arena.get(key).is_none());
            }
            prop_assert_eq!(arena.len(), live.len());
        }
    }

    /// Connections between ports always run source first.
    #[test]
    fn port_sources_precede_destinations(
        n_ports in 2usize..16,
        links in prop::collection::vec((0usize..16, 0usize..16), 0..48),
    ) {
        let mut topo = Topology::new();
        let keys: Vec<PortKey> = (0..n_ports)
            .map(|i| {
                topo.ports.insert(PortInfo {
                    name: format!("p{}", i),
                    data_type: PortDataType::Audio,
                    direction: PortDirection::Output,
                    owner: PortOwner::Driver,
                    sources: Vec::new(),
                    status: Arc::new(PortStatus::new()),
                })
            })
            .collect();
        // Links only go from lower to higher index, so there is no cycle
        let mut edges = Vec::new();
        for (a, b) in links {
            let (a, b) = (a % n_ports, b % n_ports);
            if a < b {
                if let Some(dst) = topo.ports.get_mut(keys[b]) {
                    dst.sources.push(keys[a]);
                }
                edges.push((keys[a], keys[b]));
            }
        }

        let schedule = compute_schedule(&ProcessingGraph::from_topology(&topo), 1).unwrap();
        for &key in &keys {
            prop_assert!(schedule.contains(NodeId::PortProcess(key)));
        }
        for (src, dst) in edges {
            let before = schedule.position(NodeId::PortProcess(src)).unwrap();
            let after = schedule.position(NodeId::PortProcess(dst)).unwrap();
            prop_assert!(before < after);
        }
    }
}
