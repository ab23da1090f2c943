//! Playback rate limits.
//!
//! Without thinning every frame must reach the display, so the fastest rate
//! is bounded by how many frames the display can show per second:
//! `refresh_hz / frame_rate`. With thinning the upstream drops frames itself
//! and there is no bound. The slowest rate is always zero (scrubbing).

use fp_common::{PresentError, Rational};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDirection {
    Forward,
    Reverse,
}

/// Inputs to the rate limits; either one may be unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RateLimits {
    pub refresh_hz: Option<f32>,
    pub frame_rate: Option<Rational>,
}

impl RateLimits {
    pub fn new(refresh_hz: Option<f32>, frame_rate: Option<Rational>) -> Self {
        Self {
            refresh_hz,
            frame_rate,
        }
    }

    pub fn slowest(&self, _direction: RateDirection) -> f32 {
        0.0
    }

    /// Fastest supported rate, signed by direction. `f32::MAX` when
    /// unbounded.
    pub fn fastest(&self, direction: RateDirection, thin: bool) -> f32 {
        let max = if thin { f32::MAX } else { self.max_unthinned() };
        match direction {
            RateDirection::Forward => max,
            RateDirection::Reverse => -max,
        }
    }

    /// # Errors
    /// `PresentError::UnsupportedRate` carrying the nearest supported rate
    /// in the requested direction.
    pub fn check(&self, rate: f32, thin: bool) -> Result<(), PresentError> {
        let max = self.fastest(RateDirection::Forward, thin);
        if rate.abs() <= max {
            return Ok(());
        }
        Err(PresentError::UnsupportedRate {
            requested: rate,
            nearest: max.copysign(rate),
        })
    }

    fn max_unthinned(&self) -> f32 {
        match (self.refresh_hz, self.frame_rate) {
            (Some(hz), Some(fps)) if hz > 0.0 && fps.is_valid() => {
                (f64::from(hz) / fps.as_f64()) as f32
            }
            _ => f32::MAX,
        }
    }
}
