//! Point-of-interest chunked processing
//!
//! A cycle of N frames is cut at every point where some loop changes
//! state, so transitions land on exact samples without per-sample checks:
//!
//! ```text
//!   cycle  ├──────────────────────────────────────────┤ N
//!   loop A ├────────────┤POI                           loop end
//!   loop B ├────────────────────────────┤POI           planned transition
//!   chunks ├─── k1 ─────┼───── k2 ──────┼──── k3 ──────┤
//! ```
//!
//! Per chunk: refresh every loop's POI (sync sources first), take the
//! smallest as `k`, advance all loops by `k`, then propagate sync triggers.
//! The loop is iterative; a run of chunks that make no progress is capped.

use crate::engine::arena::{Arena, LoopKey};
use crate::error::{LooperError, LooperResult};
use crate::looping::looper::Loop;
use crate::looping::poi::min_poi;
use crate::looping::transport::SyncView;

/// Longest sync chain followed when ordering refreshes and triggers
const MAX_SYNC_DEPTH: usize = 16;

/// Default cap on consecutive zero-length iterations
pub const DEFAULT_MAX_ITERATIONS: usize = 1024;

/// Drives a set of sync-coupled loops through one cycle
#[derive(Debug)]
pub struct LoopScheduler {
    epoch: u64,
    max_iterations: usize,
    sync_views: Vec<Option<SyncView>>,
}

impl Default for LoopScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl LoopScheduler {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            epoch: 0,
            max_iterations: max_iterations.max(1),
            sync_views: Vec::with_capacity(64),
        }
    }

    /// Advance the loops in `keys` by `n_frames`
    ///
    /// A failing loop is logged and the others keep going; the first error
    /// is returned once the cycle is complete.
    pub fn process(
        &mut self,
        loops: &mut Arena<LoopKey, Loop>,
        keys: &[LoopKey],
        n_frames: u32,
    ) -> LooperResult<()> {
        let mut remaining = n_frames;
        let mut idle_iterations = 0;
        let mut result = Ok(());

        while remaining > 0 {
            self.epoch = self.epoch.wrapping_add(1);
            for &key in keys {
                refresh(loops, key, self.epoch, 0);
            }

            let k = keys
                .iter()
                .filter_map(|&key| loops.get(key))
                .fold(Some(remaining), |acc, lp| min_poi(acc, lp.transport().next_poi()))
                .unwrap_or(remaining);

            if k == 0 {
                idle_iterations += 1;
                if idle_iterations > self.max_iterations {
                    log::error!(
                        "Gave up after {} zero-length iterations with {} frames left",
                        idle_iterations - 1,
                        remaining
                    );
                    return Err(LooperError::Internal("too many zero-length iterations"));
                }
                for &key in keys {
                    let sync = sync_view(loops, key);
                    if let Some(lp) = loops.get_mut(key) {
                        lp.transport_mut().handle_poi(sync.as_ref());
                    }
                }
                continue;
            }
            idle_iterations = 0;

            // Sync views are taken before any loop moves
            self.sync_views.clear();
            self.sync_views
                .extend(keys.iter().map(|&key| sync_view(loops, key)));
            for (&key, sync) in keys.iter().zip(&self.sync_views) {
                let Some(lp) = loops.get_mut(key) else {
                    continue;
                };
                if let Err(e) = lp.process(k, sync.as_ref()) {
                    log::error!("Loop {} failed to process {} frames: {}", key, k, e);
                    result = Err(e);
                }
            }
            for &key in keys {
                handle_sync(loops, key, 0);
            }
            remaining -= k;
        }
        result
    }
}

fn sync_view(loops: &Arena<LoopKey, Loop>, key: LoopKey) -> Option<SyncView> {
    let source = loops.get(key)?.sync_source()?;
    if source == key {
        return None;
    }
    loops.get(source).map(|s| s.transport().sync_view())
}

/// Refresh `key` after its sync source, once per epoch
fn refresh(loops: &mut Arena<LoopKey, Loop>, key: LoopKey, epoch: u64, depth: usize) {
    let Some(lp) = loops.get_mut(key) else {
        return;
    };
    if !lp.transport_mut().begin_refresh(epoch) {
        return;
    }
    let source = lp.sync_source().filter(|&s| s != key);
    let sync_trigger = match source {
        Some(source) if depth < MAX_SYNC_DEPTH => {
            refresh(loops, source, epoch, depth + 1);
            loops.get(source).and_then(|s| s.transport().next_trigger())
        }
        Some(source) => loops.get(source).and_then(|s| s.transport().next_trigger()),
        None => None,
    };
    if let Some(lp) = loops.get_mut(key) {
        lp.refresh(sync_trigger);
    }
}

/// Trigger `key` if its sync source triggered during the last chunk
fn handle_sync(loops: &mut Arena<LoopKey, Loop>, key: LoopKey, depth: usize) {
    let Some(source) = loops.get(key).and_then(|lp| lp.sync_source()) else {
        return;
    };
    if source == key {
        return;
    }
    if depth < MAX_SYNC_DEPTH {
        handle_sync(loops, source, depth + 1);
    }
    let triggering = loops
        .get(source)
        .map_or(false, |s| s.transport().is_triggering_now());
    if triggering {
        if let Some(lp) = loops.get_mut(key) {
            lp.transport_mut().trigger();
        }
    }
}
