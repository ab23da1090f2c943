//! Wall-clock driven presentation clock.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use fp_common::MediaTime;

use crate::traits::PresentationClock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Running,
    Paused,
}

struct ClockInner {
    state: ClockState,
    /// Media time at `anchor`.
    position: MediaTime,
    anchor: Instant,
    rate: f32,
}

impl ClockInner {
    fn now(&self) -> MediaTime {
        match self.state {
            ClockState::Running => {
                let elapsed = MediaTime::from_duration(self.anchor.elapsed());
                self.position + elapsed.scale(f64::from(self.rate))
            }
            ClockState::Stopped | ClockState::Paused => self.position,
        }
    }

    /// Fold elapsed time into `position` so a new rate applies from now on.
    fn rebase(&mut self) {
        self.position = self.now();
        self.anchor = Instant::now();
    }
}

/// A [`PresentationClock`] backed by `Instant`.
pub struct SystemClock {
    inner: Mutex<ClockInner>,
}

impl SystemClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ClockInner {
                state: ClockState::Stopped,
                position: MediaTime::ZERO,
                anchor: Instant::now(),
                rate: 1.0,
            }),
        })
    }

    /// Start running from `position`, or from where the clock currently is.
    pub fn start(&self, position: Option<MediaTime>) {
        let mut inner = self.inner.lock();
        let position = position.unwrap_or_else(|| inner.now());
        inner.position = position;
        inner.anchor = Instant::now();
        inner.state = ClockState::Running;
        debug!(position = %inner.position, rate = inner.rate, "Clock started");
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        inner.rebase();
        inner.state = ClockState::Paused;
        debug!(position = %inner.position, "Clock paused");
    }

    /// Stop and rewind to zero.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.state = ClockState::Stopped;
        inner.position = MediaTime::ZERO;
        debug!("Clock stopped");
    }

    pub fn set_rate(&self, rate: f32) {
        let mut inner = self.inner.lock();
        inner.rebase();
        inner.rate = rate;
    }

    pub fn state(&self) -> ClockState {
        self.inner.lock().state
    }
}

impl PresentationClock for SystemClock {
    fn now(&self) -> MediaTime {
        self.inner.lock().now()
    }

    fn rate(&self) -> f32 {
        self.inner.lock().rate
    }
}
