//! Presentation timestamps and rational time bases.
//!
//! [`Pts`] is an explicitly optional timestamp. The container's wire
//! format still needs a fixed-width representation, so `i64::MIN` is the
//! on-disk sentinel for "unset"; in memory the sentinel never appears as
//! a value, which keeps undefined timestamps from being mistaken for
//! real ones.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire sentinel for an unset timestamp. Never a legal timestamp value.
const PTS_WIRE_NONE: i64 = i64::MIN;

/// A rational time unit: each tick is `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

/// The library-wide time unit: microseconds.
pub const GLOBAL_TIMEBASE: TimeBase = TimeBase { num: 1, den: 1_000_000 };

impl TimeBase {
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1_000 };
    pub const MPEG: TimeBase = TimeBase { num: 1, den: 90_000 };

    pub fn new(num: u32, den: u32) -> Self {
        debug_assert!(num != 0 && den != 0);
        Self { num, den }
    }

    /// Rescale `value` ticks of `self` into ticks of `target`, rounding
    /// toward negative infinity. Intermediate math is 128-bit, so any
    /// realistic timestamp and time base pair is exact.
    pub fn rescale(&self, value: i64, target: TimeBase) -> i64 {
        let n = value as i128 * self.num as i128 * target.den as i128;
        let d = self.den as i128 * target.num as i128;
        (n.div_euclid(d)) as i64
    }

    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.num as f64 / self.den as f64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        GLOBAL_TIMEBASE
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// A presentation timestamp that may be unset.
///
/// Ordering: unset sorts before every set value, which matches the
/// derived `Option` ordering. Code that wants the minimum over *set*
/// timestamps must skip unset entries explicitly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Pts(Option<i64>);

impl Pts {
    pub const NONE: Pts = Pts(None);

    pub fn new(value: i64) -> Self {
        debug_assert!(value != PTS_WIRE_NONE);
        Pts(Some(value))
    }

    pub fn get(self) -> Option<i64> {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0.is_some()
    }

    /// Fixed-width wire form: the value, or the sentinel when unset.
    pub fn to_wire(self) -> i64 {
        self.0.unwrap_or(PTS_WIRE_NONE)
    }

    pub fn from_wire(raw: i64) -> Self {
        if raw == PTS_WIRE_NONE {
            Pts::NONE
        } else {
            Pts(Some(raw))
        }
    }

    /// Rescale from one time base to another; unset stays unset.
    pub fn rescale(self, from: TimeBase, to: TimeBase) -> Pts {
        match self.0 {
            Some(v) => Pts(Some(from.rescale(v, to))),
            None => Pts::NONE,
        }
    }
}

impl From<i64> for Pts {
    fn from(v: i64) -> Self {
        Pts::new(v)
    }
}

impl fmt::Display for Pts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "unset"),
        }
    }
}
