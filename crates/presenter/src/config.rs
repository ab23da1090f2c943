//! Presenter tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fp_common::Rational;

/// Number of frame buffers allocated per negotiated format.
pub const DEFAULT_POOL_SIZE: usize = 3;

/// Configuration shared by the pool, the scheduler and the presenter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    /// Buffers created per format.
    pub pool_size: usize,
    /// Longest the presentation thread sleeps when its queue is empty.
    pub max_poll_interval_ms: u64,
    /// How long `flush()` waits for the presentation thread.
    pub flush_timeout_ms: u64,
    /// Display refresh rate used for rate limits when the surface does not
    /// report one.
    pub display_refresh_hz: f32,
    /// Frame rate assumed when the negotiated format carries none.
    pub default_frame_rate: Rational,
}

impl PresenterConfig {
    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms.max(1))
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_poll_interval_ms: 100,
            flush_timeout_ms: 5000,
            display_refresh_hz: 60.0,
            default_frame_rate: Rational::FPS_30,
        }
    }
}
