//! A presenter driven by its own [`SystemClock`].
//!
//! The session is the transport: it moves the clock and then forwards the
//! same notification to the presenter, the way an external media clock
//! would push state changes to its sinks.

use std::sync::Arc;

use crossbeam::channel::Receiver;
use tracing::info;

use fp_common::{MediaTime, PresentError};

use crate::clock::SystemClock;
use crate::config::PresenterConfig;
use crate::events::PresenterEvent;
use crate::presenter::Presenter;
use crate::traits::{ClockStateSink, Mixer, PresentationSurface};

pub struct PlaybackSession {
    clock: Arc<SystemClock>,
    presenter: Arc<Presenter>,
}

impl PlaybackSession {
    /// Build the clock and presenter and start the presentation thread.
    pub fn new(
        config: PresenterConfig,
        mixer: Arc<dyn Mixer>,
        surface: Arc<dyn PresentationSurface>,
    ) -> Result<(Self, Receiver<PresenterEvent>), PresentError> {
        let clock = SystemClock::new();
        let (presenter, events) = Presenter::new(config, mixer, surface, clock.clone());
        presenter.begin_streaming()?;
        Ok((Self { clock, presenter }, events))
    }

    pub fn presenter(&self) -> &Arc<Presenter> {
        &self.presenter
    }

    pub fn clock(&self) -> &Arc<SystemClock> {
        &self.clock
    }

    /// Start playing from `position`, or from the current position.
    pub fn start(&self, position: Option<MediaTime>) -> Result<(), PresentError> {
        self.clock.start(position);
        self.presenter.on_clock_start(position)
    }

    pub fn pause(&self) -> Result<(), PresentError> {
        self.clock.pause();
        self.presenter.on_clock_pause()
    }

    pub fn resume(&self) -> Result<(), PresentError> {
        self.clock.start(None);
        self.presenter.on_clock_restart()
    }

    pub fn stop(&self) -> Result<(), PresentError> {
        self.clock.stop();
        self.presenter.on_clock_stop()
    }

    /// Change the playback rate. Rejected rates leave the clock untouched.
    pub fn set_rate(&self, rate: f32, thin: bool) -> Result<(), PresentError> {
        self.presenter.is_rate_supported(rate, thin)?;
        self.clock.set_rate(rate);
        self.presenter.on_clock_set_rate(rate)
    }

    /// Stop playback and shut the presenter down.
    pub fn close(&self) {
        self.clock.stop();
        self.presenter.shutdown();
        info!("Playback session closed");
    }
}
