//! Points of interest
//!
//! A point of interest (POI) is the offset, counted from the start of the
//! next chunk, at which a loop needs to stop and re-evaluate: its end is
//! reached, or one of its channels runs out of cycle buffer. The scheduler
//! never processes a loop past its POI.

use std::ops::{BitOr, BitOrAssign};

/// Reasons a POI was set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoiFlags(u8);

impl PoiFlags {
    pub const NONE: Self = Self(0);
    /// The loop reaches its length
    pub const LOOP_END: Self = Self(1);
    /// A channel reaches the end of the cycle buffers it works on
    pub const CHANNEL: Self = Self(1 << 1);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for PoiFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PoiFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointOfInterest {
    /// Samples from now
    pub when: u32,
    pub flags: PoiFlags,
}

impl PointOfInterest {
    pub fn new(when: u32, flags: PoiFlags) -> Self {
        Self { when, flags }
    }
}

/// The earlier of two POIs; flags are merged when both fall on the same sample
pub fn dominant_poi(
    a: Option<PointOfInterest>,
    b: Option<PointOfInterest>,
) -> Option<PointOfInterest> {
    match (a, b) {
        (Some(a), Some(b)) if a.when == b.when => {
            Some(PointOfInterest::new(a.when, a.flags | b.flags))
        }
        (Some(a), Some(b)) => Some(if a.when < b.when { a } else { b }),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Smallest of a set of optional offsets
#[inline]
pub fn min_poi(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
