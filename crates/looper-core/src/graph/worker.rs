//! Background schedule recomputation
//!
//! Control threads hand the worker a topology snapshot with every change.
//! Requests carry increasing ids; a request that arrives before the worker
//! picked up the previous one replaces it, and a result that is no longer
//! the latest request is thrown away. Published schedules only ever move
//! forward in generation.
//!
//! ```text
//! request(topo) ──► pending (latest only) ──► worker: order ──► offer ──► SharedCell
//!                                                                            │ get()
//!                                                                  process thread
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use basedrop::{Shared, SharedCell};

use crate::engine::gc;
use crate::error::{LooperError, LooperResult};
use crate::graph::node::ProcessingGraph;
use crate::graph::schedule::{compute_schedule, Schedule};
use crate::graph::topology::Topology;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct WorkerState {
    shutdown: bool,
    request_seq: u64,
    pending: Option<Topology>,
    published: u64,
    n_computed: u64,
    n_discarded: u64,
    n_coalesced: u64,
    last_error: Option<(u64, LooperError)>,
}

/// Counters of a [`ScheduleWorker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Id of the latest request
    pub requested: u64,
    /// Schedules computed, published or not
    pub computed: u64,
    /// Results dropped for being stale
    pub discarded: u64,
    /// Requests replaced before the worker got to them
    pub coalesced: u64,
    /// Generation of the published schedule
    pub published: u64,
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    wake: Condvar,
    done: Condvar,
    cell: Arc<SharedCell<Schedule>>,
}

impl WorkerShared {
    /// Publish `schedule` unless something newer already is
    fn offer(&self, state: &mut WorkerState, schedule: Schedule) -> bool {
        let generation = schedule.generation();
        if generation <= state.published {
            state.n_discarded += 1;
            return false;
        }
        log::debug!(
            "Publishing schedule {} ({} steps)",
            generation,
            schedule.steps().len()
        );
        // The previous schedule is freed on the collector thread
        self.cell.set(gc::shared(schedule));
        state.published = generation;
        true
    }

    fn run(&self) {
        log::info!("Schedule worker started");
        loop {
            let (id, topology) = {
                let mut state = lock(&self.state);
                loop {
                    if state.shutdown {
                        log::info!("Schedule worker stopped");
                        return;
                    }
                    if let Some(topology) = state.pending.take() {
                        break (state.request_seq, topology);
                    }
                    state = self.wake.wait(state).unwrap_or_else(|e| e.into_inner());
                }
            };

            let result = compute_schedule(&ProcessingGraph::from_topology(&topology), id);
            drop(topology);

            let mut state = lock(&self.state);
            state.n_computed += 1;
            match result {
                Ok(schedule) if id == state.request_seq => {
                    self.offer(&mut state, schedule);
                }
                Ok(_) => {
                    state.n_discarded += 1;
                    log::debug!(
                        "Dropped schedule {}, superseded by request {}",
                        id,
                        state.request_seq
                    );
                }
                Err(e) => {
                    log::error!("Failed to compute schedule {}: {}", id, e);
                    state.last_error = Some((id, e));
                }
            }
            drop(state);
            self.done.notify_all();
        }
    }
}

pub struct ScheduleWorker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl ScheduleWorker {
    /// Spawn the worker thread with an empty schedule published
    pub fn start() -> std::io::Result<Self> {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState::default()),
            wake: Condvar::new(),
            done: Condvar::new(),
            cell: Arc::new(SharedCell::new(gc::shared(Schedule::empty()))),
        });
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("looper-schedule".to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Cell the process thread loads its schedule from
    pub fn schedule_cell(&self) -> Arc<SharedCell<Schedule>> {
        Arc::clone(&self.shared.cell)
    }

    pub fn current(&self) -> Shared<Schedule> {
        self.shared.cell.get()
    }

    /// Queue a recompute for `topology` and return its request id
    pub fn request(&self, topology: Topology) -> u64 {
        let mut state = lock(&self.shared.state);
        state.request_seq += 1;
        if state.pending.replace(topology).is_some() {
            state.n_coalesced += 1;
        }
        let id = state.request_seq;
        drop(state);
        self.shared.wake.notify_one();
        id
    }

    /// Compute and publish on the calling thread
    ///
    /// Once this returns, the published schedule reflects `topology` or a
    /// later snapshot.
    pub fn publish_now(&self, topology: &Topology) -> LooperResult<u64> {
        let id = {
            let mut state = lock(&self.shared.state);
            state.request_seq += 1;
            if state.pending.take().is_some() {
                state.n_coalesced += 1;
            }
            state.request_seq
        };
        let schedule = compute_schedule(&ProcessingGraph::from_topology(topology), id)?;
        let mut state = lock(&self.shared.state);
        state.n_computed += 1;
        self.shared.offer(&mut state, schedule);
        drop(state);
        self.shared.done.notify_all();
        Ok(id)
    }

    /// Wait until request `id` (or a later one) is published
    pub fn wait_for(&self, id: u64, timeout: Duration) -> LooperResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        loop {
            if state.published >= id {
                return Ok(());
            }
            if let Some((failed, e)) = &state.last_error {
                if *failed >= id {
                    return Err(e.clone());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LooperError::Timeout);
            }
            state = self
                .shared
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Wait until the latest request is published
    pub fn wait_idle(&self, timeout: Duration) -> LooperResult<()> {
        let id = lock(&self.shared.state).request_seq;
        self.wait_for(id, timeout)
    }

    pub fn stats(&self) -> WorkerStats {
        let state = lock(&self.shared.state);
        WorkerStats {
            requested: state.request_seq,
            computed: state.n_computed,
            discarded: state.n_discarded,
            coalesced: state.n_coalesced,
            published: state.published,
        }
    }
}

impl Drop for ScheduleWorker {
    fn drop(&mut self) {
        lock(&self.shared.state).shutdown = true;
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Schedule worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeId;
    use crate::graph::topology::LoopInfo;
    use crate::looping::transport::LoopStatus;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn with_loops(n: usize) -> Topology {
        let mut topo = Topology::new();
        for _ in 0..n {
            topo.loops.insert(LoopInfo {
                channels: Vec::new(),
                sync_source: None,
                status: Arc::new(LoopStatus::default()),
            });
        }
        topo
    }

    #[test]
    fn test_burst_honors_latest_request() {
        let worker = ScheduleWorker::start().unwrap();
        let mut last = 0;
        for n in 1..=50 {
            last = worker.request(with_loops(n));
        }
        worker.wait_for(last, TIMEOUT).unwrap();

        let stats = worker.stats();
        assert_eq!(stats.requested, 50);
        assert_eq!(stats.published, last);
        // Every request was either computed or replaced while pending
        assert_eq!(stats.computed + stats.coalesced, 50);
        let schedule = worker.current();
        assert_eq!(schedule.generation(), last);
        assert_eq!(schedule.steps()[0].nodes().len(), 50);
    }

    #[test]
    fn test_older_result_is_never_published() {
        let worker = ScheduleWorker::start().unwrap();
        let topo = with_loops(2);
        let id = worker.publish_now(&topo).unwrap();
        assert_eq!(worker.current().generation(), id);

        let stale = compute_schedule(&ProcessingGraph::from_topology(&Topology::new()), id - 1)
            .unwrap();
        let mut state = lock(&worker.shared.state);
        assert!(!worker.shared.offer(&mut state, stale));
        drop(state);

        let schedule = worker.current();
        assert_eq!(schedule.generation(), id);
        assert_eq!(schedule.steps().len(), 1);
        assert!(schedule.contains(NodeId::Loop(topo.loops.keys().next().unwrap())));
        assert_eq!(worker.stats().discarded, 1);
    }

    #[test]
    fn test_wait_idle_after_requests() {
        let worker = ScheduleWorker::start().unwrap();
        worker.request(with_loops(1));
        worker.wait_idle(TIMEOUT).unwrap();
        assert_eq!(worker.current().generation(), 1);
    }
}
