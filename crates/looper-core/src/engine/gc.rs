//! Deferred reclamation for process-thread state
//!
//! Anything the process thread may be the last owner of (loop and channel
//! state removed from the session, replaced ringbuffers, superseded
//! schedules) is wrapped in `basedrop::Owned` or `basedrop::Shared`. Dropping
//! such a pointer only enqueues it; the memory is freed later on the
//! `looper-gc` thread, where a slow `free` cannot cause an xrun.
//!
//! ```ignore
//! use crate::engine::gc;
//!
//! let state = gc::owned(LoopState::new());
//! drop(state); // queued, freed on the collector thread
//! ```

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle, Owned, Shared};

/// How often the collector thread reclaims queued drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("looper-gc".to_string())
        .spawn(move || {
            // Collector is !Sync and must live on the thread that collects
            let mut collector = Collector::new();
            tx.send(collector.handle())
                .expect("Failed to send GC handle");

            log::info!("Looper GC thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn looper GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle to the global collector, started on first use
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

/// Box `value` so that dropping it anywhere defers the free
pub fn owned<T: Send + 'static>(value: T) -> Owned<T> {
    Owned::new(&gc_handle(), value)
}

/// Reference-counted variant of [`owned`]
pub fn shared<T: Send + Sync + 'static>(value: T) -> Shared<T> {
    Shared::new(&gc_handle(), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_is_reclaimed_on_gc_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let boxed = owned(DropFlag(Arc::clone(&flag)));
        drop(boxed);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !flag.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shared_clones_share_value() {
        let a = shared(41u32);
        let b = a.clone();
        assert_eq!(*a + 1, *b + 1);
    }
}
