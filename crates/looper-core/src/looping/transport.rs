//! Loop transport
//!
//! [`LoopTransport`] is the timing core of a loop: mode, position, length,
//! planned transitions and the point of interest. It does not own channels;
//! the scheduler lends them through [`LoopChannels`] when needed.
//!
//! ```text
//!   plan_transition(Playing, 1)        trigger()         trigger()
//!   ──────────────┬───────────────────────┬─────────────────┬──────────►
//!   Stopped       │  countdown 1          │ countdown 0     │ Playing
//! ```
//!
//! POI and trigger ETA are derived state. Every mutation here only
//! invalidates them; the scheduler refreshes them (sync sources first)
//! before each chunk it processes.

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{LooperError, LooperResult};
use crate::looping::mode::PlannedTransition;
use crate::looping::poi::{dominant_poi, min_poi, PoiFlags, PointOfInterest};
use crate::types::LoopMode;

/// Planned transitions kept per loop without reallocating
const PLANNED_CAPACITY: usize = 32;

#[inline]
pub(crate) fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Channel side of a loop, as seen by the transport
pub trait LoopChannels {
    /// Earliest sample at which any channel needs the loop to stop
    fn next_poi(&self, query: &PoiQuery) -> Option<u32>;

    /// Let every channel decide what to do with the next `ctx.n_frames`
    fn process(&mut self, ctx: &ChannelContext) -> LooperResult<()>;
}

/// A loop without channels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChannels;

impl LoopChannels for NoChannels {
    fn next_poi(&self, _query: &PoiQuery) -> Option<u32> {
        None
    }

    fn process(&mut self, _ctx: &ChannelContext) -> LooperResult<()> {
        Ok(())
    }
}

/// Loop state handed to channels when computing their POI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoiQuery {
    pub mode: LoopMode,
    pub next: PlannedTransition,
    pub position: usize,
    pub length: usize,
}

/// Loop state handed to channels when processing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelContext {
    /// Mode channels should act on (Stopped when a playing loop is stuck at its end)
    pub mode: LoopMode,
    pub next: PlannedTransition,
    pub n_frames: u32,
    pub pos_before: usize,
    pub pos_after: usize,
    pub len_before: usize,
    pub len_after: usize,
}

/// What a loop needs to know about its sync source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncView {
    pub mode: LoopMode,
    pub position: usize,
    pub length: usize,
    pub next_trigger: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Planned {
    mode: LoopMode,
    countdown: i64,
}

/// Lock-free view of a loop for control threads
#[derive(Debug, Default)]
pub struct LoopStatus {
    mode: AtomicU8,
    length: AtomicUsize,
    position: AtomicUsize,
    next_mode: AtomicU8,
    next_delay: AtomicI64,
}

/// Point-in-time copy of a [`LoopStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSnapshot {
    pub mode: LoopMode,
    pub length: usize,
    pub position: usize,
    pub next_mode: Option<LoopMode>,
    pub next_delay: Option<u32>,
}

impl LoopStatus {
    pub fn snapshot(&self) -> LoopSnapshot {
        let next_mode = LoopMode::from_u8(self.next_mode.load(Ordering::Relaxed));
        let next_delay = self.next_delay.load(Ordering::Relaxed);
        LoopSnapshot {
            mode: LoopMode::from_u8(self.mode.load(Ordering::Relaxed)),
            length: self.length.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
            next_mode: (next_mode != LoopMode::Unknown && next_delay >= 0).then_some(next_mode),
            next_delay: u32::try_from(next_delay).ok(),
        }
    }
}

/// Mode, position and length of one loop
#[derive(Debug)]
pub struct LoopTransport {
    mode: LoopMode,
    position: usize,
    length: usize,
    planned: Vec<Planned>,
    next_poi: Option<PointOfInterest>,
    next_trigger: Option<u32>,
    triggering_now: bool,
    already_triggered: bool,
    refresh_epoch: u64,
    status: Arc<LoopStatus>,
}

impl Default for LoopTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopTransport {
    pub fn new() -> Self {
        let transport = Self {
            mode: LoopMode::Stopped,
            position: 0,
            length: 0,
            planned: Vec::with_capacity(PLANNED_CAPACITY),
            next_poi: None,
            next_trigger: None,
            triggering_now: false,
            already_triggered: false,
            refresh_epoch: 0,
            status: Arc::new(LoopStatus::default()),
        };
        transport.publish();
        transport
    }

    #[inline]
    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Offset of the pending POI
    #[inline]
    pub fn next_poi(&self) -> Option<u32> {
        self.next_poi.map(|p| p.when)
    }

    /// Predicted samples until this loop (or its sync source) triggers
    #[inline]
    pub fn next_trigger(&self) -> Option<u32> {
        self.next_trigger
    }

    /// Whether this loop triggered during the last chunk
    #[inline]
    pub fn is_triggering_now(&self) -> bool {
        self.triggering_now
    }

    /// Shared atomics published after every change
    pub fn status(&self) -> Arc<LoopStatus> {
        Arc::clone(&self.status)
    }

    pub fn sync_view(&self) -> SyncView {
        SyncView {
            mode: self.mode,
            position: self.position,
            length: self.length,
            next_trigger: self.next_trigger,
        }
    }

    /// Planned transitions as `(mode, countdown)`, first to fire first
    pub fn planned_transitions(&self) -> impl Iterator<Item = (LoopMode, i64)> + '_ {
        self.planned.iter().map(|p| (p.mode, p.countdown))
    }

    /// First planned transition together with the ETA of the next trigger
    ///
    /// The ETA is only given when that transition fires on the very next
    /// trigger.
    pub fn planned(&self) -> PlannedTransition {
        let first = self.planned.first();
        let delay = first.and_then(|p| u32::try_from(p.countdown).ok());
        PlannedTransition {
            mode: first.map(|p| p.mode),
            delay,
            eta: if delay == Some(0) { self.next_trigger } else { None },
        }
    }

    /// Mark the POI as refreshed for `epoch`; false if it already was
    pub(crate) fn begin_refresh(&mut self, epoch: u64) -> bool {
        if self.refresh_epoch == epoch {
            return false;
        }
        self.refresh_epoch = epoch;
        true
    }

    /// Recompute POI and trigger ETA
    pub fn refresh(&mut self, channels: &impl LoopChannels, sync_trigger: Option<u32>) {
        self.update_poi(channels);
        self.update_trigger_eta(sync_trigger);
    }

    fn update_trigger_eta(&mut self, sync_trigger: Option<u32>) {
        let own = (self.mode.is_playing() && self.position < self.length)
            .then(|| clamp_u32(self.length - self.position));
        self.next_trigger = min_poi(own, sync_trigger);
    }

    fn update_poi(&mut self, channels: &impl LoopChannels) {
        if self.mode.is_playing() && self.length == 0 {
            self.handle_transition(LoopMode::Stopped);
        }

        if let Some(poi) = &mut self.next_poi {
            poi.flags.remove(PoiFlags::LOOP_END | PoiFlags::CHANNEL);
            if poi.flags.is_empty() {
                self.next_poi = None;
            }
        }

        if self.mode.is_playing() && self.position < self.length {
            let loop_end =
                PointOfInterest::new(clamp_u32(self.length - self.position), PoiFlags::LOOP_END);
            self.next_poi = dominant_poi(self.next_poi, Some(loop_end));
        }

        let query = PoiQuery {
            mode: self.mode,
            next: PlannedTransition {
                eta: self.next_trigger,
                ..self.planned()
            },
            position: self.position,
            length: self.length,
        };
        if let Some(when) = channels.next_poi(&query) {
            if self.next_poi.map_or(true, |p| when < p.when) {
                self.next_poi = Some(PointOfInterest::new(when, PoiFlags::CHANNEL));
            }
        }
    }

    /// Act on a POI that was reached exactly
    pub fn handle_poi(&mut self, sync: Option<&SyncView>) {
        let Some(mut poi) = self.next_poi else {
            return;
        };
        if poi.when != 0 {
            return;
        }
        poi.flags.remove(PoiFlags::CHANNEL);
        if poi.flags.contains(PoiFlags::LOOP_END) {
            poi.flags.remove(PoiFlags::LOOP_END);
            // Without a running sync source the loop is its own clock
            if sync.map_or(true, |s| !s.mode.is_playing()) {
                self.trigger();
            }
        }
        self.next_poi = None;
    }

    /// Handle one sync trigger
    ///
    /// Runs at most once per chunk. Wraps a playing loop at its end and
    /// counts down the planned transitions, firing the due ones.
    pub fn trigger(&mut self) {
        if self.already_triggered {
            return;
        }
        self.already_triggered = true;
        self.triggering_now = true;

        if self.mode.is_playing() && self.position >= self.length {
            self.position = 0;
        }

        for planned in &mut self.planned {
            planned.countdown -= 1;
        }
        let due = self.planned.iter().take_while(|p| p.countdown < 0).count();
        for i in 0..due {
            let mode = self.planned[i].mode;
            self.handle_transition(mode);
        }
        self.planned.drain(..due);
        self.publish();
    }

    /// Switch mode right now
    pub fn handle_transition(&mut self, mode: LoopMode) {
        if self.mode == mode {
            return;
        }
        if !(self.mode.is_playing() && mode.is_playing()) {
            self.set_position(0);
        }
        if mode == LoopMode::Recording {
            self.set_length(0);
        }
        log::debug!("Loop transition {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        if mode == LoopMode::Stopped {
            self.position = 0;
        }
        if mode.is_playing() && self.position == 0 {
            self.triggering_now = true;
        }
        self.next_poi = None;
        self.publish();
    }

    /// Schedule a mode change
    ///
    /// Goes immediately when `wait_for_sync` is false, or when the loop has
    /// no sync source and is not playing. Otherwise the transition fires
    /// after `delay` more triggers, replacing every plan at or after that
    /// point.
    pub fn plan_transition(
        &mut self,
        mode: LoopMode,
        delay: u32,
        wait_for_sync: bool,
        has_sync_source: bool,
    ) {
        let immediate =
            !wait_for_sync || (!has_sync_source && self.mode != LoopMode::Playing);
        if immediate {
            self.handle_transition(mode);
            self.planned.clear();
        } else {
            let countdown = i64::from(delay);
            let entry = Planned { mode, countdown };
            match self.planned.iter().position(|p| p.countdown >= countdown) {
                Some(idx) => {
                    self.planned[idx] = entry;
                    self.planned.truncate(idx + 1);
                }
                None => self.planned.push(entry),
            }
        }
        self.publish();
    }

    pub fn clear_planned_transitions(&mut self) {
        self.planned.clear();
        self.publish();
    }

    pub fn set_length(&mut self, length: usize) {
        if length == self.length {
            return;
        }
        self.length = length;
        if self.position >= length {
            self.set_position(length.saturating_sub(1));
        }
        self.next_poi = None;
        self.next_trigger = None;
        self.publish();
    }

    pub fn set_position(&mut self, position: usize) {
        if position == self.position {
            return;
        }
        self.position = position;
        self.next_poi = None;
        self.next_trigger = None;
        self.publish();
    }

    /// Advance by `n_frames`, letting the channels act on the chunk
    ///
    /// `n_frames` must be non-zero and must not pass the pending POI.
    pub fn process(
        &mut self,
        n_frames: u32,
        channels: &mut impl LoopChannels,
        sync: Option<&SyncView>,
    ) -> LooperResult<()> {
        if n_frames == 0 {
            return Err(LooperError::Internal("zero-length processing chunk"));
        }
        if self.next_poi.map_or(false, |p| n_frames > p.when) {
            return Err(LooperError::Internal("chunk exceeds point of interest"));
        }

        self.triggering_now = false;
        self.already_triggered = false;

        let n = n_frames as usize;
        let (pos_before, len_before) = (self.position, self.length);
        let (mut pos_after, mut len_after) = (pos_before, len_before);
        let mut channel_mode = self.mode;

        match self.mode {
            LoopMode::Recording => len_after += n,
            LoopMode::Replacing => {
                pos_after += n;
                len_after = len_after.max(pos_after);
            }
            LoopMode::Playing | LoopMode::PlayingDryThroughWet | LoopMode::RecordingDryIntoWet => {
                pos_after = (pos_after + n).min(len_after);
                if pos_after == pos_before {
                    channel_mode = LoopMode::Stopped;
                }
            }
            LoopMode::Stopped | LoopMode::Unknown => {}
        }

        channels.process(&ChannelContext {
            mode: channel_mode,
            next: self.planned(),
            n_frames,
            pos_before,
            pos_after,
            len_before,
            len_after,
        })?;

        if let Some(poi) = &mut self.next_poi {
            poi.when -= n_frames;
        }
        self.position = pos_after;
        self.length = len_after;
        self.next_trigger = self
            .next_trigger
            .map(|t| t.saturating_sub(n_frames))
            .filter(|&t| t > 0);

        self.handle_poi(sync);
        self.publish();
        Ok(())
    }

    /// Store the current state into the shared atomics
    pub fn publish(&self) {
        let status = &self.status;
        status.mode.store(self.mode.to_u8(), Ordering::Relaxed);
        status.length.store(self.length, Ordering::Relaxed);
        status.position.store(self.position, Ordering::Relaxed);
        let (next_mode, next_delay) = match self.planned.first() {
            Some(p) => (p.mode, p.countdown),
            None => (LoopMode::Unknown, -1),
        };
        status.next_mode.store(next_mode.to_u8(), Ordering::Relaxed);
        status.next_delay.store(next_delay, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(length: usize, position: usize) -> LoopTransport {
        let mut t = LoopTransport::new();
        t.set_length(length);
        t.handle_transition(LoopMode::Playing);
        t.set_position(position);
        t.refresh(&NoChannels, None);
        t
    }

    #[test]
    fn test_recording_grows_length() {
        let mut t = LoopTransport::new();
        t.plan_transition(LoopMode::Recording, 0, true, false);
        assert_eq!(t.mode(), LoopMode::Recording);
        t.refresh(&NoChannels, None);
        assert_eq!(t.next_poi(), None);
        t.process(64, &mut NoChannels, None).unwrap();
        t.process(36, &mut NoChannels, None).unwrap();
        assert_eq!(t.length(), 100);
        assert_eq!(t.position(), 0);
    }

    #[test]
    fn test_playing_wraps_at_loop_end() {
        let mut t = playing(100, 90);
        assert_eq!(t.next_poi(), Some(10));
        assert_eq!(t.next_trigger(), Some(10));
        assert_eq!(
            t.process(11, &mut NoChannels, None),
            Err(LooperError::Internal("chunk exceeds point of interest"))
        );
        t.process(10, &mut NoChannels, None).unwrap();
        assert_eq!(t.position(), 0);
        assert!(t.is_triggering_now());
        t.refresh(&NoChannels, None);
        t.process(5, &mut NoChannels, None).unwrap();
        assert_eq!(t.position(), 5);
        assert!(!t.is_triggering_now());
    }

    #[test]
    fn test_zero_chunk_is_an_error() {
        let mut t = LoopTransport::new();
        assert!(t.process(0, &mut NoChannels, None).is_err());
    }

    #[test]
    fn test_planned_transition_fires_after_delay() {
        let mut t = playing(10, 0);
        t.plan_transition(LoopMode::Stopped, 1, true, false);
        assert_eq!(t.planned().mode, Some(LoopMode::Stopped));
        assert_eq!(t.planned().delay, Some(1));
        assert_eq!(t.planned().eta, None);

        t.refresh(&NoChannels, None);
        t.process(10, &mut NoChannels, None).unwrap();
        assert_eq!(t.mode(), LoopMode::Playing);
        assert_eq!(t.planned().delay, Some(0));

        t.refresh(&NoChannels, None);
        assert_eq!(t.planned().eta, Some(10));
        t.process(10, &mut NoChannels, None).unwrap();
        assert_eq!(t.mode(), LoopMode::Stopped);
        assert_eq!(t.position(), 0);
        assert_eq!(t.planned().mode, None);
    }

    #[test]
    fn test_plan_replaces_later_plans() {
        let mut t = playing(10, 0);
        t.plan_transition(LoopMode::Recording, 0, true, true);
        t.plan_transition(LoopMode::Playing, 2, true, true);
        t.plan_transition(LoopMode::Replacing, 4, true, true);
        t.plan_transition(LoopMode::Stopped, 1, true, true);
        let plans: Vec<_> = t.planned_transitions().collect();
        assert_eq!(plans, vec![(LoopMode::Recording, 0), (LoopMode::Stopped, 1)]);

        t.plan_transition(LoopMode::Playing, 0, false, true);
        assert_eq!(t.planned_transitions().count(), 0);
    }

    #[test]
    fn test_set_length_clamps_position() {
        let mut t = playing(100, 50);
        t.set_length(20);
        assert_eq!(t.position(), 19);
        t.set_length(0);
        assert_eq!(t.position(), 0);
        // A playing loop without content stops at the next refresh
        t.refresh(&NoChannels, None);
        assert_eq!(t.mode(), LoopMode::Stopped);
    }

    #[test]
    fn test_sync_source_eta_and_loop_end() {
        let mut t = playing(100, 10);
        t.refresh(&NoChannels, Some(25));
        assert_eq!(t.next_trigger(), Some(25));

        // Loop end is not a trigger while the sync source plays
        let mut t = playing(100, 90);
        let sync = SyncView {
            mode: LoopMode::Playing,
            position: 0,
            length: 50,
            next_trigger: Some(50),
        };
        t.process(10, &mut NoChannels, Some(&sync)).unwrap();
        assert_eq!(t.position(), 100);
        assert!(!t.is_triggering_now());
    }

    #[test]
    fn test_status_snapshot() {
        let mut t = playing(48, 0);
        t.plan_transition(LoopMode::Stopped, 2, true, true);
        let snap = t.status().snapshot();
        assert_eq!(snap.mode, LoopMode::Playing);
        assert_eq!(snap.length, 48);
        assert_eq!(snap.next_mode, Some(LoopMode::Stopped));
        assert_eq!(snap.next_delay, Some(2));
    }
}
