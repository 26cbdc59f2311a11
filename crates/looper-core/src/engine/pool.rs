//! Pre-allocated audio buffer pool
//!
//! Channel storage grows in fixed-size [`Buffer`] chunks. Allocating those on
//! the process thread would risk xruns, so they come from a [`BufferPool`]
//! that a background thread keeps topped up.
//!
//! ```text
//! ┌──────────────────┐  refill()   ┌─────────────────────┐  acquire()  ┌──────────────┐
//! │  Refill thread   │────────────►│  ArrayQueue<Buffer> │────────────►│ Process      │
//! │  (condvar wake)  │◄── notify ──│   (lock-free MPMC)  │◄────────────│ thread       │
//! └──────────────────┘             └─────────────────────┘  release()  └──────────────┘
//! ```
//!
//! When the queue runs dry, `acquire` allocates in place instead of waiting.
//! That is a performance problem, not an error: it is counted and reported
//! from the refill thread, never logged from the process thread itself.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;

use crate::types::Sample;

/// Refill thread wakes at least this often even without a notification
const REFILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-size, zero-initialized chunk of samples
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: Box<[Sample]>,
}

impl Buffer {
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0.0; size].into_boxed_slice(),
        }
    }

    /// Reset all samples to silence
    #[inline]
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }
}

impl Deref for Buffer {
    type Target = [Sample];

    fn deref(&self) -> &[Sample] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [Sample] {
        &mut self.data
    }
}

/// Counters describing the pool's buffer flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers ready in the queue
    pub available: usize,
    /// Buffers ever created (initial fill, refills and overflows)
    pub created: usize,
    /// Buffers allocated synchronously because the queue was empty
    pub overflow_allocations: usize,
    /// Released buffers freed because the queue was full
    pub dropped: usize,
}

/// Lock-free source and sink of [`Buffer`]s
pub struct BufferPool {
    queue: ArrayQueue<Buffer>,
    buffer_size: usize,
    target: usize,
    low_water: usize,
    created: AtomicUsize,
    overflow: AtomicUsize,
    dropped: AtomicUsize,
    refill_requested: AtomicBool,
    shutdown: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl BufferPool {
    /// Create a pool holding `target` buffers of `buffer_size` samples
    ///
    /// The queue can hold up to twice the target so that buffers coming back
    /// from discarded channel data are not freed right away.
    pub fn new(buffer_size: usize, target: usize, low_water: usize) -> Arc<Self> {
        let capacity = (target * 2).max(1);
        let pool = Self {
            queue: ArrayQueue::new(capacity),
            buffer_size: buffer_size.max(1),
            target,
            low_water: low_water.min(target),
            created: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            refill_requested: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        };
        pool.refill();
        Arc::new(pool)
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Take a zeroed buffer
    ///
    /// Never blocks. Allocates when the queue is empty.
    pub fn acquire(&self) -> Buffer {
        let buffer = match self.queue.pop() {
            Some(buffer) => buffer,
            None => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                self.created.fetch_add(1, Ordering::Relaxed);
                self.request_refill();
                return Buffer::zeroed(self.buffer_size);
            }
        };
        if self.queue.len() < self.low_water {
            self.request_refill();
        }
        buffer
    }

    /// Return a buffer; it is zeroed before it can be handed out again
    pub fn release(&self, mut buffer: Buffer) {
        if buffer.len() != self.buffer_size {
            // Not ours (e.g. pool was reconfigured); let it go
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buffer.clear();
        if self.queue.push(buffer).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Top the queue up to the target; returns the number of buffers added
    pub fn refill(&self) -> usize {
        let mut added = 0;
        while self.queue.len() < self.target {
            if self.queue.push(Buffer::zeroed(self.buffer_size)).is_err() {
                break;
            }
            self.created.fetch_add(1, Ordering::Relaxed);
            added += 1;
        }
        added
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.queue.len(),
            created: self.created.load(Ordering::Relaxed),
            overflow_allocations: self.overflow.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn request_refill(&self) {
        self.refill_requested.store(true, Ordering::Release);
        // No lock taken: a missed wakeup is covered by the poll interval
        self.wake.notify_one();
    }

    /// Spawn the background refill thread
    ///
    /// The thread stops when the returned guard is dropped.
    pub fn start_refill_thread(self: &Arc<Self>) -> std::io::Result<PoolRefillThread> {
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("buffer-pool-refill".to_string())
            .spawn(move || pool.refill_loop())?;
        Ok(PoolRefillThread {
            pool: Arc::clone(self),
            handle: Some(handle),
        })
    }

    fn refill_loop(&self) {
        log::debug!(
            "Buffer pool refill thread started ({} x {} samples)",
            self.target,
            self.buffer_size
        );
        let mut reported_overflow = 0;
        while !self.shutdown.load(Ordering::Acquire) {
            {
                let guard = self.wake_lock.lock().unwrap_or_else(|e| e.into_inner());
                if !self.refill_requested.load(Ordering::Acquire) {
                    let _ = self
                        .wake
                        .wait_timeout(guard, REFILL_POLL_INTERVAL)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
            self.refill_requested.store(false, Ordering::Release);

            let overflow = self.overflow.load(Ordering::Relaxed);
            if overflow > reported_overflow {
                log::warn!(
                    "Buffer pool ran empty: {} buffer(s) allocated on the process thread",
                    overflow - reported_overflow
                );
                reported_overflow = overflow;
            }
            self.refill();
        }
        log::debug!("Buffer pool refill thread stopped");
    }
}

/// Guard that keeps the refill thread running
pub struct PoolRefillThread {
    pool: Arc<BufferPool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for PoolRefillThread {
    fn drop(&mut self) {
        self.pool.shutdown.store(true, Ordering::Release);
        self.pool.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
