//! Presentation time.
//!
//! Media time is a signed count of 100-nanosecond ticks. Signed because
//! reverse playback and clock offsets produce negative deltas routinely.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A point (or span) on the presentation timeline, in 100-ns ticks.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MediaTime(i64);

impl MediaTime {
    /// Ticks per second.
    pub const TICKS_PER_SECOND: i64 = 10_000_000;
    /// Ticks per millisecond.
    pub const TICKS_PER_MILLI: i64 = 10_000;

    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(i64::MAX);
    pub const MIN: Self = Self(i64::MIN);

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(Self::TICKS_PER_MILLI))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * Self::TICKS_PER_SECOND as f64).round() as i64)
    }

    /// Convert a wall-clock duration, saturating at `MediaTime::MAX`.
    pub fn from_duration(d: Duration) -> Self {
        let ticks = d.as_nanos() / 100;
        Self(i64::try_from(ticks).unwrap_or(i64::MAX))
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / Self::TICKS_PER_MILLI
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / Self::TICKS_PER_SECOND as f64
    }

    /// Magnitude as a wall-clock duration. Negative spans map to their
    /// absolute value.
    pub fn to_duration(self) -> Duration {
        Duration::from_nanos(self.0.unsigned_abs().saturating_mul(100))
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Scale by a playback rate (`span * rate`).
    pub fn scale(self, rate: f64) -> Self {
        Self((self.0 as f64 * rate).round() as i64)
    }

    /// Divide a timeline span by a playback rate, giving the wall-clock
    /// span it takes at that rate. A zero rate yields `MediaTime::ZERO`.
    pub fn div_rate(self, rate: f32) -> Self {
        let rate = f64::from(rate.abs());
        if rate == 0.0 {
            return Self::ZERO;
        }
        Self((self.0 as f64 / rate).round() as i64)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for MediaTime {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for MediaTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for MediaTime {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for MediaTime {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for MediaTime {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}
