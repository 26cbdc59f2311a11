//! Cross-thread command queue
//!
//! Control threads mutate engine state by sending closures that run on the
//! process thread at a well-defined point: the start of each cycle. The
//! queue itself is a lock-free SPSC ringbuffer (`rtrb`); the state it
//! targets lives next to the consumer in a [`Processed`] that the process
//! thread reaches with `try_lock` only.
//!
//! ```text
//! control thread                         process thread
//! ──────────────                         ──────────────
//! enqueue(cmd) ──push──► [rtrb SPSC] ──pop──► cmd(&mut state)
//! exec(f) ─────push──► [rtrb SPSC] ──pop──► f(&mut state) ──► bounded(1) ──► caller
//!       │
//!       └─ process thread idle past timeout / passthrough:
//!          lock, drain pending, run cmd directly
//! ```
//!
//! The process thread never blocks here: it `try_lock`s the state and skips
//! the cycle in the rare case a control thread holds it for a synchronous
//! fallback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use basedrop::Owned;
use crossbeam::channel::{self, RecvTimeoutError};
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::engine::gc;
use crate::error::{LooperError, LooperResult};

/// A deferred mutation of `T`, executed on the process thread
pub type Command<T> = Box<dyn FnOnce(&mut T) -> LooperResult<()> + Send>;

/// Poll interval while waiting for room in a full queue
const FULL_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// No cycle has run yet
const NEVER: u64 = u64::MAX;

/// Timestamp of the process thread's last cycle
struct Activity {
    epoch: Instant,
    last_cycle_us: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_cycle_us: AtomicU64::new(NEVER),
        }
    }

    #[inline]
    fn mark(&self) {
        let now = self.epoch.elapsed().as_micros() as u64;
        self.last_cycle_us.store(now, Ordering::Relaxed);
    }

    fn since_last_cycle(&self) -> Duration {
        let last = self.last_cycle_us.load(Ordering::Relaxed);
        if last == NEVER {
            return Duration::MAX;
        }
        let now = self.epoch.elapsed().as_micros() as u64;
        Duration::from_micros(now.saturating_sub(last))
    }
}

/// Process-side state together with its command inbox
pub struct Processed<T> {
    inbox: Consumer<Command<T>>,
    state: T,
}

impl<T> Processed<T> {
    /// Pop and execute every pending command
    ///
    /// A failing command is logged; it never aborts the remaining ones.
    pub fn drain(&mut self) -> usize {
        let mut executed = 0;
        while let Ok(cmd) = self.inbox.pop() {
            if let Err(e) = cmd(&mut self.state) {
                log::error!("Command failed on process thread: {}", e);
            }
            executed += 1;
        }
        executed
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

/// Process-thread handle to the queued state
pub struct ProcessHandle<T> {
    processed: Arc<Mutex<Processed<T>>>,
    activity: Arc<Activity>,
}

impl<T> Clone for ProcessHandle<T> {
    fn clone(&self) -> Self {
        Self {
            processed: Arc::clone(&self.processed),
            activity: Arc::clone(&self.activity),
        }
    }
}

impl<T> ProcessHandle<T> {
    /// Run one cycle: mark activity, drain commands, then call `f`
    ///
    /// Returns `None` without blocking if a control thread currently holds
    /// the state for a synchronous fallback.
    pub fn try_cycle<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.processed.try_lock().ok()?;
        self.activity.mark();
        guard.drain();
        Some(f(&mut guard.state))
    }
}

/// Control-side end of the queue
pub struct CommandQueue<T> {
    producer: Mutex<Producer<Command<T>>>,
    processed: Arc<Mutex<Processed<T>>>,
    activity: Arc<Activity>,
    timeout: Duration,
    passthrough: AtomicBool,
}

impl<T: Send + 'static> CommandQueue<T> {
    /// Create a queue of `capacity` commands targeting `state`
    pub fn new(state: T, capacity: usize, timeout: Duration) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        Self {
            producer: Mutex::new(producer),
            processed: Arc::new(Mutex::new(Processed {
                inbox: consumer,
                state,
            })),
            activity: Arc::new(Activity::new()),
            timeout,
            passthrough: AtomicBool::new(false),
        }
    }

    /// Handle for the process thread
    pub fn process_handle(&self) -> ProcessHandle<T> {
        ProcessHandle {
            processed: Arc::clone(&self.processed),
            activity: Arc::clone(&self.activity),
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute all future commands synchronously (used during teardown)
    pub fn set_passthrough(&self, enabled: bool) {
        self.passthrough.store(enabled, Ordering::Release);
    }

    /// Whether the process thread has missed the timeout
    pub fn is_process_thread_inactive(&self) -> bool {
        self.activity.since_last_cycle() > self.timeout
    }

    fn should_run_now(&self) -> bool {
        self.passthrough.load(Ordering::Acquire) || self.is_process_thread_inactive()
    }

    /// Queue a command for the next cycle
    ///
    /// Runs it synchronously instead when the process thread looks inactive
    /// or passthrough is enabled. Only the synchronous path can report the
    /// command's own error.
    pub fn enqueue(
        &self,
        cmd: impl FnOnce(&mut T) -> LooperResult<()> + Send + 'static,
    ) -> LooperResult<()> {
        if self.should_run_now() {
            return self.run_now(cmd);
        }
        self.push(Box::new(cmd))
    }

    /// Queue a command and wait until the process thread has executed it
    pub fn enqueue_and_wait(
        &self,
        cmd: impl FnOnce(&mut T) -> LooperResult<()> + Send + 'static,
    ) -> LooperResult<()> {
        self.exec(cmd)
    }

    /// Run `f` on the process thread and return its result
    ///
    /// On timeout the caller gets [`LooperError::Timeout`]; the command
    /// itself still runs whenever the process thread gets to it.
    pub fn exec<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut T) -> LooperResult<R> + Send + 'static,
    ) -> LooperResult<R> {
        if self.should_run_now() {
            return self.run_now(f);
        }
        let (tx, rx) = channel::bounded(1);
        self.push(Box::new(move |state: &mut T| {
            let _ = tx.try_send(f(state));
            Ok(())
        }))?;
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                // Process thread stopped while we waited: drain ourselves,
                // unless it is in fact busy executing right now
                if self.is_process_thread_inactive() {
                    if let Ok(mut processed) = self.processed.try_lock() {
                        processed.drain();
                    }
                    if let Ok(result) = rx.try_recv() {
                        return result;
                    }
                }
                Err(LooperError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(LooperError::Timeout),
        }
    }

    /// [`exec`](Self::exec) for replies that own heap memory
    ///
    /// The reply travels in a slot allocated here. When the caller has
    /// already timed out, the process thread drops the reply instead, and
    /// that only queues the free on the collector thread.
    pub fn exec_detach<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut T) -> Option<R> + Send + 'static,
    ) -> LooperResult<Owned<Option<R>>> {
        let slot = gc::owned(None);
        self.exec(move |state: &mut T| {
            let mut slot = slot;
            *slot = f(state);
            Ok(slot)
        })
    }

    fn run_now<R>(&self, f: impl FnOnce(&mut T) -> LooperResult<R>) -> LooperResult<R> {
        let mut processed = self.processed.lock().unwrap_or_else(|e| e.into_inner());
        // Keep ordering with anything still queued
        processed.drain();
        f(&mut processed.state)
    }

    fn push(&self, cmd: Command<T>) -> LooperResult<()> {
        let mut producer = self.producer.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = Instant::now() + self.timeout;
        let mut cmd = cmd;
        loop {
            match producer.push(cmd) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(returned)) => {
                    if self.should_run_now() {
                        drop(producer);
                        return self.run_now(returned);
                    }
                    if Instant::now() >= deadline {
                        log::warn!("Command queue full for {:?}, giving up", self.timeout);
                        return Err(LooperError::QueueFull);
                    }
                    cmd = returned;
                    std::thread::sleep(FULL_RETRY_INTERVAL);
                }
            }
        }
    }
}
