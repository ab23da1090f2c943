//! Presenter state machine.
//!
//! Ties the pool, the scheduler and the frame-step controller together and
//! reacts to clock notifications, upstream input and surface releases.
//!
//! ```text
//! mixer ──process_output──► Presenter ──schedule_frame──► Scheduler ──► surface
//!   ▲                          │  ▲                                        │
//!   │                  acquire │  │ release hook (PooledFrame drop)        │
//!   └──── input notify ──  FramePool ◄──────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! One state lock guards render state, format, step state and flags. It is
//! taken before the scheduler or pool locks, never after. The scheduler's
//! blocking `flush`/`stop` are only called with the state lock released.
//!
//! Dropping a [`PooledFrame`] runs the release hook, which locks the state
//! again. Frames that must be dropped while the lock is held are parked in
//! `deferred` and dropped by [`Presenter::with_state`] once it is released.

use std::sync::{Arc, Weak};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use fp_common::{
    FormatDescriptor, FrameToken, MediaTime, MixerError, PresentError, Rational, Resolution,
    SurfaceError,
};

use crate::config::PresenterConfig;
use crate::events::PresenterEvent;
use crate::frame_step::{FrameStepController, StepAction, StepContext};
use crate::pool::{FramePool, PoolStats, PooledFrame, ReleaseHook};
use crate::rate::{RateDirection, RateLimits};
use crate::scheduler::{ErrorHook, Scheduler, SchedulerStats};
use crate::traits::{ClockStateSink, Mixer, PresentationClock, PresentationSurface, Proposal};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Stopped,
    Paused,
    Started,
    Shutdown,
}

impl RenderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Started => "started",
            Self::Shutdown => "shutdown",
        }
    }

    fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Paused)
    }
}

struct PresenterState {
    render_state: RenderState,
    rate: f32,
    format: Option<FormatDescriptor>,
    /// At least one frame has been delivered since the last flush.
    prerolled: bool,
    /// Upstream said input is available and has not run dry since.
    sample_notify: bool,
    /// Upstream signalled end of stream.
    end_streaming: bool,
    frame_step: FrameStepController,
    last_error: Option<PresentError>,
    /// Frames to drop once the lock is released.
    deferred: Vec<PooledFrame>,
}

impl PresenterState {
    fn ensure_alive(&self) -> Result<(), PresentError> {
        if self.render_state == RenderState::Shutdown {
            Err(PresentError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn scrubbing(&self) -> bool {
        self.rate == 0.0
    }
}

/// Output loop bookkeeping, kept apart from the state lock.
#[derive(Default)]
struct OutputLoop {
    running: bool,
    /// Another pass was requested while the loop was running.
    retry: bool,
}

/// Result of one `process_output` pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Delivered,
    /// Nothing to do right now (not started, pool empty, no format).
    Declined,
    NeedMoreInput,
    /// Mixer has no output format.
    Renegotiate,
    /// Upstream stream type changed; the current format is void.
    StreamChanged,
}

// ---------------------------------------------------------------------------
// Presenter
// ---------------------------------------------------------------------------

pub struct Presenter {
    config: PresenterConfig,
    mixer: Arc<dyn Mixer>,
    surface: Arc<dyn PresentationSurface>,
    clock: Arc<dyn PresentationClock>,
    pool: Arc<FramePool>,
    scheduler: Scheduler,
    state: Mutex<PresenterState>,
    /// Held for the duration of a format negotiation.
    negotiating: Mutex<()>,
    output: Mutex<OutputLoop>,
    release_hook: ReleaseHook,
    events: Sender<PresenterEvent>,
}

impl Presenter {
    /// Create a presenter wired to its collaborators.
    ///
    /// Returns the presenter and the receiving end of its event channel.
    /// Call [`begin_streaming`](Self::begin_streaming) to start the
    /// presentation thread.
    pub fn new(
        config: PresenterConfig,
        mixer: Arc<dyn Mixer>,
        surface: Arc<dyn PresentationSurface>,
        clock: Arc<dyn PresentationClock>,
    ) -> (Arc<Self>, Receiver<PresenterEvent>) {
        let (events, rx) = channel::unbounded();
        let rate = clock.rate();

        let presenter = Arc::new_cyclic(|weak: &Weak<Presenter>| {
            let release_hook: ReleaseHook = {
                let weak = weak.clone();
                Arc::new(move |token| {
                    if let Some(presenter) = weak.upgrade() {
                        presenter.on_frame_released(token);
                    }
                })
            };
            let on_error: ErrorHook = {
                let weak = weak.clone();
                Arc::new(move |err| {
                    if let Some(presenter) = weak.upgrade() {
                        presenter.on_presentation_error(err);
                    }
                })
            };

            Self {
                scheduler: Scheduler::new(Arc::clone(&surface), on_error, &config),
                config,
                mixer,
                surface,
                clock,
                pool: Arc::new(FramePool::new()),
                state: Mutex::new(PresenterState {
                    render_state: RenderState::Stopped,
                    rate,
                    format: None,
                    prerolled: false,
                    sample_notify: false,
                    end_streaming: false,
                    frame_step: FrameStepController::new(),
                    last_error: None,
                    deferred: Vec::new(),
                }),
                negotiating: Mutex::new(()),
                output: Mutex::new(OutputLoop::default()),
                release_hook,
                events,
            }
        });

        info!(
            pool_size = presenter.config.pool_size,
            rate, "Presenter created"
        );
        (presenter, rx)
    }

    /// Run `f` under the state lock, then drop whatever it deferred.
    fn with_state<R>(&self, f: impl FnOnce(&mut PresenterState) -> R) -> R {
        let (result, deferred) = {
            let mut st = self.state.lock();
            let result = f(&mut st);
            (result, std::mem::take(&mut st.deferred))
        };
        drop(deferred);
        result
    }

    fn emit(&self, event: PresenterEvent) {
        trace!(?event, "Presenter event");
        if self.events.send(event).is_err() {
            trace!("No event receiver");
        }
    }

    // -- streaming lifecycle -------------------------------------------------

    /// Start the presentation thread.
    pub fn begin_streaming(&self) -> Result<(), PresentError> {
        self.with_state(|st| st.ensure_alive())?;
        self.scheduler.start(Arc::clone(&self.clock))
    }

    /// Stop the presentation thread. Queued frames are released.
    pub fn end_streaming(&self) -> Result<(), PresentError> {
        self.with_state(|st| st.ensure_alive())?;
        if !self.scheduler.is_running() {
            return Err(PresentError::NotRunning);
        }
        self.scheduler.stop();
        Ok(())
    }

    /// Upstream has new input.
    pub fn process_input_notify(&self) -> Result<(), PresentError> {
        let needs_format = self.with_state(|st| {
            st.ensure_alive()?;
            st.sample_notify = true;
            Ok::<_, PresentError>(st.format.is_none())
        })?;
        if needs_format {
            self.renegotiate()?;
        }
        self.run_output_loop()
    }

    /// Upstream will deliver no more input.
    pub fn end_of_stream(&self) -> Result<(), PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            st.end_streaming = true;
            self.check_end_of_stream(st);
            Ok(())
        })
    }

    /// Discard everything queued for presentation and every withheld step
    /// frame.
    pub fn flush(&self) -> Result<(), PresentError> {
        let withheld = self.with_state(|st| {
            st.ensure_alive()?;
            Ok::<_, PresentError>(st.frame_step.take_withheld())
        })?;
        drop(withheld);

        self.scheduler.flush()?;

        self.with_state(|st| {
            if st.render_state == RenderState::Stopped {
                st.prerolled = false;
            }
        });
        debug!("Presenter flushed");
        Ok(())
    }

    /// Shut down for good. Every later operation fails with
    /// `PresentError::Shutdown`.
    pub fn shutdown(&self) {
        let first = self.with_state(|st| {
            if st.render_state == RenderState::Shutdown {
                return false;
            }
            st.render_state = RenderState::Shutdown;
            st.frame_step.cancel();
            let withheld = st.frame_step.take_withheld();
            st.deferred.extend(withheld);
            st.format = None;
            true
        });
        if !first {
            return;
        }
        self.scheduler.stop();
        self.pool.clear();
        info!("Presenter shut down");
    }

    // -- frame stepping ------------------------------------------------------

    /// Step `steps` frames forward. Starts immediately when the clock is
    /// running, otherwise on the next clock start.
    pub fn prepare_frame_step(&self, steps: u32) -> Result<(), PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            st.frame_step.prepare(steps);
            if st.render_state == RenderState::Started {
                self.start_frame_step(st);
            }
            Ok(())
        })
    }

    pub fn cancel_frame_step(&self) -> Result<(), PresentError> {
        let cancelled = self.with_state(|st| {
            st.ensure_alive()?;
            Ok::<_, PresentError>(st.frame_step.cancel())
        })?;
        if cancelled {
            self.emit(PresenterEvent::StepCancelled);
        }
        Ok(())
    }

    /// `WaitingStart → Pending`, or hand withheld frames back to normal
    /// scheduling when no step is requested.
    fn start_frame_step(&self, st: &mut PresenterState) {
        let ctx = self.step_context(st);
        for action in st.frame_step.on_clock_start(ctx) {
            self.apply_step_action(st, action);
        }
    }

    fn step_context(&self, st: &PresenterState) -> StepContext {
        StepContext {
            scrubbing: st.scrubbing(),
            clock_now: self.clock.now(),
        }
    }

    fn apply_step_action(&self, st: &mut PresenterState, action: StepAction) {
        match action {
            StepAction::Present(frame) => self.scheduler.schedule_frame(frame, true),
            StepAction::Schedule(frame) => {
                let present_now = st.render_state != RenderState::Started || st.scrubbing();
                self.scheduler.schedule_frame(frame, present_now);
            }
            StepAction::Discard(frame) => st.deferred.push(frame),
        }
    }

    // -- repaint / format ----------------------------------------------------

    /// Present the last frame again. Does nothing before a format exists.
    pub fn repaint(&self) -> Result<(), PresentError> {
        let outcome = self.with_state(|st| {
            st.ensure_alive()?;
            if st.format.is_none() {
                return Ok(Outcome::Declined);
            }
            self.process_output(st, true)
        })?;
        debug!(?outcome, "Repaint requested");
        Ok(())
    }

    /// Throw away the current format and negotiate a new one, e.g. after the
    /// surface recreated its device.
    pub fn invalidate_format(&self) -> Result<(), PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            st.format = None;
            Ok::<_, PresentError>(())
        })?;
        self.renegotiate()?;
        self.run_output_loop()
    }

    /// Pick the first presentable format the mixer accepts and allocate
    /// buffers for it.
    fn renegotiate(&self) -> Result<(), PresentError> {
        let Some(_guard) = self.negotiating.try_lock() else {
            debug!("Format negotiation already in progress");
            return Ok(());
        };

        let mut last_rejected = None;
        for format in self.mixer.available_output_formats() {
            if format.interlaced
                || format.resolution.is_empty()
                || !format.pixel_format.is_presentable()
            {
                debug!(%format, "Skipping unusable format");
                continue;
            }
            match self.mixer.propose_format(&format) {
                Proposal::Accepted => return self.apply_format(format),
                Proposal::Rejected => {
                    debug!(%format, "Mixer rejected format");
                    last_rejected = Some(format);
                }
            }
        }

        let err = match last_rejected {
            Some(format) => PresentError::UnsupportedFormat(format),
            None => PresentError::NoSupportedFormat,
        };
        warn!(error = %err, "Format negotiation failed");
        Err(err)
    }

    fn apply_format(&self, format: FormatDescriptor) -> Result<(), PresentError> {
        self.release_resources()?;
        self.with_state(|st| st.ensure_alive())?;

        let buffers = self
            .surface
            .create_buffers(&format, self.config.pool_size)?;
        let generation = self.pool.initialize(buffers)?;

        let frame_rate = if format.frame_rate.is_valid() {
            format.frame_rate
        } else {
            self.config.default_frame_rate
        };
        self.scheduler.set_frame_rate(frame_rate);

        let installed = self.with_state(|st| {
            st.ensure_alive()?;
            st.format = Some(format.clone());
            Ok::<_, PresentError>(())
        });
        if let Err(err) = installed {
            // Shut down while allocating.
            self.pool.clear();
            return Err(err);
        }
        info!(
            %format,
            generation,
            pool_size = self.config.pool_size,
            "Output format negotiated"
        );
        self.emit(PresenterEvent::FormatChanged(format));
        Ok(())
    }

    /// Drop the current format's frames and buffers.
    fn release_resources(&self) -> Result<(), PresentError> {
        let withheld = self.with_state(|st| {
            st.format = None;
            st.prerolled = false;
            st.frame_step.take_withheld()
        });
        drop(withheld);
        self.scheduler.flush()?;
        self.pool.clear();
        Ok(())
    }

    // -- output ----------------------------------------------------------------

    /// Pull frames from the mixer until it runs dry or the pool is empty.
    ///
    /// Only one loop runs at a time. A call made while it runs, from a
    /// release hook further up the same stack or from another thread, asks
    /// the running loop for one more pass and returns.
    fn run_output_loop(&self) -> Result<(), PresentError> {
        {
            let mut output = self.output.lock();
            if output.running {
                output.retry = true;
                return Ok(());
            }
            output.running = true;
        }
        loop {
            let result = self.drain_output();
            let mut output = self.output.lock();
            if result.is_ok() && output.retry {
                output.retry = false;
                continue;
            }
            output.running = false;
            output.retry = false;
            return result;
        }
    }

    fn drain_output(&self) -> Result<(), PresentError> {
        let mut renegotiated = false;
        loop {
            let outcome = self.with_state(|st| self.process_output(st, false))?;
            match outcome {
                Outcome::Delivered => {}
                Outcome::Declined | Outcome::NeedMoreInput => return Ok(()),
                Outcome::Renegotiate | Outcome::StreamChanged if renegotiated => {
                    debug!(?outcome, "Renegotiation did not help; waiting for input");
                    return Ok(());
                }
                Outcome::Renegotiate | Outcome::StreamChanged => {
                    renegotiated = true;
                    if outcome == Outcome::StreamChanged {
                        self.with_state(|st| st.format = None);
                    }
                    self.renegotiate()?;
                }
            }
        }
    }

    /// Fill one buffer from the mixer and hand it on.
    fn process_output(
        &self,
        st: &mut PresenterState,
        repaint: bool,
    ) -> Result<Outcome, PresentError> {
        if st.render_state == RenderState::Shutdown || st.format.is_none() {
            return Ok(Outcome::Declined);
        }
        // Only the first frame is shown before the clock starts.
        if st.render_state != RenderState::Started && !repaint && st.prerolled {
            return Ok(Outcome::Declined);
        }

        let Some(mut frame) = self.pool.acquire() else {
            trace!("No free buffer; waiting for a release");
            return Ok(Outcome::Declined);
        };

        if repaint {
            let (time, duration) = self.scheduler.last_frame_time();
            frame.set_desired_time(time, duration);
        } else {
            frame.clear_desired_time();
        }

        if let Err(err) = self.mixer.process_output(&mut frame) {
            self.pool.release(frame);
            return match err {
                MixerError::NeedMoreInput => {
                    st.sample_notify = false;
                    self.check_end_of_stream(st);
                    Ok(Outcome::NeedMoreInput)
                }
                MixerError::FormatNotNegotiated => {
                    debug!("Mixer has no output format");
                    Ok(Outcome::Renegotiate)
                }
                MixerError::StreamTypeChanged => {
                    info!("Upstream stream type changed");
                    Ok(Outcome::StreamChanged)
                }
                MixerError::Failed(_) => {
                    error!(error = %err, "Mixer failed");
                    Err(err.into())
                }
            };
        }

        frame.set_repaint(repaint);
        let frame = self
            .pool
            .arm(frame, Some(Arc::clone(&self.release_hook)));
        trace!(token = %frame.token(), pts = ?frame.timestamp(), repaint, "Frame produced");

        if st.frame_step.is_active() && !repaint {
            let ctx = self.step_context(st);
            if let Some(action) = st.frame_step.deliver(frame, ctx) {
                self.apply_step_action(st, action);
            }
        } else {
            let present_now = st.render_state != RenderState::Started || st.scrubbing() || repaint;
            self.scheduler.schedule_frame(frame, present_now);
        }

        st.prerolled = true;
        Ok(Outcome::Delivered)
    }

    fn check_end_of_stream(&self, st: &mut PresenterState) {
        if !st.end_streaming || st.sample_notify || self.pool.are_frames_pending() {
            return;
        }
        st.end_streaming = false;
        info!("End of stream");
        self.emit(PresenterEvent::EndOfStream);
    }

    // -- callbacks -------------------------------------------------------------

    /// Release hook: a frame came back from the surface (or was discarded).
    fn on_frame_released(&self, token: FrameToken) {
        let completion = self.with_state(|st| {
            st.ensure_alive()?;
            Ok::<_, PresentError>(
                st.frame_step
                    .on_frame_released(token)
                    .map(|done| (done, st.scrubbing())),
            )
        });
        let Ok(completion) = completion else {
            return;
        };

        if let Some((done, scrubbing)) = completion {
            if scrubbing {
                if let Some(ts) = done.timestamp {
                    self.emit(PresenterEvent::ScrubTime(ts));
                }
            }
            self.emit(PresenterEvent::StepComplete { token: done.token });
        }

        if let Err(err) = self.run_output_loop() {
            self.report_async_error(err);
        }
        self.with_state(|st| self.check_end_of_stream(st));
    }

    fn on_presentation_error(&self, err: SurfaceError) {
        match err {
            SurfaceError::DeviceLost => {
                error!("Presentation device lost");
                self.with_state(|st| st.last_error = Some(PresentError::Surface(err)));
                self.emit(PresenterEvent::DeviceLost);
            }
            SurfaceError::Failed(_) => self.report_async_error(err.into()),
        }
    }

    fn report_async_error(&self, err: PresentError) {
        if err == PresentError::Shutdown {
            return;
        }
        if err.is_transient() {
            debug!(error = %err, "Transient failure; retrying on next input");
            return;
        }
        error!(error = %err, "Playback aborted");
        self.with_state(|st| st.last_error = Some(err.clone()));
        self.emit(PresenterEvent::PlaybackAborted(err));
    }

    // -- rate ----------------------------------------------------------------------

    fn rate_limits(&self, st: &PresenterState) -> RateLimits {
        let refresh = self
            .surface
            .refresh_rate_hz()
            .unwrap_or(self.config.display_refresh_hz);
        let frame_rate = st
            .format
            .as_ref()
            .map(|f| f.frame_rate)
            .filter(|r| r.is_valid());
        RateLimits::new(Some(refresh), frame_rate)
    }

    pub fn slowest_rate(&self, direction: RateDirection) -> Result<f32, PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            Ok(self.rate_limits(st).slowest(direction))
        })
    }

    pub fn fastest_rate(&self, direction: RateDirection, thin: bool) -> Result<f32, PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            Ok(self.rate_limits(st).fastest(direction, thin))
        })
    }

    /// # Errors
    /// `PresentError::UnsupportedRate` with the nearest supported rate.
    pub fn is_rate_supported(&self, rate: f32, thin: bool) -> Result<(), PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            self.rate_limits(st).check(rate, thin)
        })
    }

    /// Validate `rate` and apply it as if the clock changed rate.
    pub fn set_rate(&self, rate: f32, thin: bool) -> Result<(), PresentError> {
        self.is_rate_supported(rate, thin)?;
        self.on_clock_set_rate(rate)
    }

    // -- queries ---------------------------------------------------------------

    pub fn native_size(&self) -> Result<Option<Resolution>, PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            Ok(st.format.as_ref().map(|f| f.resolution))
        })
    }

    pub fn format(&self) -> Option<FormatDescriptor> {
        self.state.lock().format.clone()
    }

    pub fn frame_rate(&self) -> Option<Rational> {
        self.state.lock().format.as_ref().map(|f| f.frame_rate)
    }

    pub fn render_state(&self) -> RenderState {
        self.state.lock().render_state
    }

    /// Started or paused.
    pub fn is_active(&self) -> bool {
        self.state.lock().render_state.is_active()
    }

    pub fn last_error(&self) -> Option<PresentError> {
        self.state.lock().last_error.clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Clock notifications
// ---------------------------------------------------------------------------

impl ClockStateSink for Presenter {
    fn on_clock_start(&self, offset: Option<MediaTime>) -> Result<(), PresentError> {
        let seek = self.with_state(|st| {
            st.ensure_alive()?;
            let was_active = st.render_state.is_active();
            st.render_state = RenderState::Started;
            if was_active {
                Ok::<_, PresentError>(offset.is_some())
            } else {
                self.start_frame_step(st);
                Ok(false)
            }
        })?;
        info!(?offset, seek, "Clock started");

        if seek {
            self.flush()?;
        }
        self.run_output_loop()
    }

    fn on_clock_stop(&self) -> Result<(), PresentError> {
        let stopping = self.with_state(|st| {
            st.ensure_alive()?;
            let stopping = st.render_state != RenderState::Stopped;
            st.render_state = RenderState::Stopped;
            Ok::<_, PresentError>(stopping)
        })?;
        if !stopping {
            return Ok(());
        }
        info!("Clock stopped");

        self.flush()?;
        if self.with_state(|st| st.frame_step.cancel()) {
            self.emit(PresenterEvent::StepCancelled);
        }
        Ok(())
    }

    fn on_clock_pause(&self) -> Result<(), PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            st.render_state = RenderState::Paused;
            Ok::<_, PresentError>(())
        })?;
        info!("Clock paused");
        Ok(())
    }

    fn on_clock_restart(&self) -> Result<(), PresentError> {
        self.with_state(|st| {
            st.ensure_alive()?;
            if st.render_state != RenderState::Paused {
                return Err(PresentError::InvalidTransition {
                    operation: "restart",
                    state: st.render_state.as_str(),
                });
            }
            st.render_state = RenderState::Started;
            self.start_frame_step(st);
            Ok(())
        })?;
        info!("Clock restarted");
        self.run_output_loop()
    }

    fn on_clock_set_rate(&self, rate: f32) -> Result<(), PresentError> {
        let cancelled = self.with_state(|st| {
            st.ensure_alive()?;
            let mut cancelled = false;
            if (st.rate == 0.0) != (rate == 0.0) {
                cancelled = st.frame_step.cancel();
                let withheld = st.frame_step.take_withheld();
                st.deferred.extend(withheld);
            }
            st.rate = rate;
            Ok::<_, PresentError>(cancelled)
        })?;

        self.scheduler.set_clock_rate(rate);
        if cancelled {
            self.emit(PresenterEvent::StepCancelled);
        }
        info!(rate, "Clock rate changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::testing::{
        collect, nv12_format, wait_for_event, ManualClock, Presented, RecordingSurface,
        ScriptedMixer,
    };
    use fp_common::PixelFormat;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    struct Rig {
        presenter: Arc<Presenter>,
        events: Receiver<PresenterEvent>,
        mixer: Arc<ScriptedMixer>,
        surface: Arc<RecordingSurface>,
        shown: Receiver<Presented>,
    }

    fn rig_with(
        pool_size: usize,
        clock: Arc<dyn PresentationClock>,
        surface: (Arc<RecordingSurface>, Receiver<Presented>),
    ) -> Rig {
        let mixer = ScriptedMixer::new(nv12_format(Rational::FPS_30));
        let (surface, shown) = surface;
        let config = PresenterConfig {
            pool_size,
            max_poll_interval_ms: 10,
            ..PresenterConfig::default()
        };
        let (presenter, events) =
            Presenter::new(config, mixer.clone(), surface.clone(), clock);
        presenter.begin_streaming().unwrap();
        Rig {
            presenter,
            events,
            mixer,
            surface,
            shown,
        }
    }

    fn rig(pool_size: usize) -> Rig {
        rig_with(pool_size, ManualClock::new(), RecordingSurface::new())
    }

    #[test]
    fn negotiation_skips_unusable_formats() {
        let r = rig(3);
        let interlaced = FormatDescriptor {
            interlaced: true,
            ..nv12_format(Rational::FPS_30)
        };
        let foreign = FormatDescriptor::progressive(
            PixelFormat::Other(0x3231_5659),
            Resolution::HD,
            Rational::FPS_30,
        );
        let empty = FormatDescriptor::progressive(
            PixelFormat::Nv12,
            Resolution::new(0, 720),
            Rational::FPS_30,
        );
        let rejected = FormatDescriptor::progressive(
            PixelFormat::Bgra8,
            Resolution::FHD,
            Rational::FPS_30,
        );
        let wanted = FormatDescriptor::progressive(
            PixelFormat::Rgba8,
            Resolution::FHD,
            Rational::FPS_24,
        );
        r.mixer.set_formats(vec![
            interlaced,
            foreign,
            empty,
            rejected.clone(),
            wanted.clone(),
        ]);
        r.mixer.reject(rejected);

        r.presenter.process_input_notify().unwrap();

        assert_eq!(r.presenter.format(), Some(wanted.clone()));
        assert_eq!(r.mixer.proposals.load(Ordering::SeqCst), 2);
        assert_eq!(r.surface.created.load(Ordering::SeqCst), 3);
        assert_eq!(r.presenter.pool_stats().capacity, 3);
        assert_eq!(r.presenter.native_size(), Ok(Some(Resolution::FHD)));
        assert_eq!(
            r.events.try_recv(),
            Ok(PresenterEvent::FormatChanged(wanted))
        );
    }

    #[test]
    fn negotiation_failures_are_reported() {
        let r = rig(2);
        let only = nv12_format(Rational::FPS_30);
        r.mixer.reject(only.clone());
        assert_eq!(
            r.presenter.process_input_notify(),
            Err(PresentError::UnsupportedFormat(only))
        );

        r.mixer.set_formats(Vec::new());
        assert_eq!(
            r.presenter.invalidate_format(),
            Err(PresentError::NoSupportedFormat)
        );
    }

    #[test]
    fn only_first_frame_is_shown_before_start() {
        let r = rig(3);
        r.mixer.push_frames_ms(&[0, 33, 66]);

        r.presenter.process_input_notify().unwrap();

        let shown = collect(&r.shown, 3, Duration::from_millis(200));
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].timestamp, Some(MediaTime::ZERO));
        assert_eq!(r.mixer.outputs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frames_are_presented_in_time_with_two_buffers() {
        let clock = SystemClock::new();
        let r = rig_with(2, clock.clone(), RecordingSurface::new());
        r.mixer.push_frames_ms(&[100, 200, 300]);

        clock.start(Some(MediaTime::ZERO));
        let started = Instant::now();
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.presenter.process_input_notify().unwrap();
        r.presenter.end_of_stream().unwrap();

        let shown = collect(&r.shown, 3, Duration::from_secs(2));
        let stamps: Vec<i64> = shown
            .iter()
            .map(|p| p.timestamp.unwrap().as_millis())
            .collect();
        assert_eq!(stamps, vec![100, 200, 300]);
        for (p, due) in shown.iter().zip([100u64, 200, 300]) {
            let at = p.at.duration_since(started);
            // Up to three quarters of a frame early at 30 fps.
            assert!(at >= Duration::from_millis(due - 30), "{at:?} before {due} ms");
            assert!(at < Duration::from_millis(due + 100), "{at:?} after {due} ms");
        }

        let eos = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            *e == PresenterEvent::EndOfStream
        });
        assert!(eos.is_some());
        assert_eq!(r.presenter.pool_stats().in_use, 0);
    }

    #[test]
    fn end_of_stream_waits_for_every_condition() {
        let r = rig_with(2, ManualClock::new(), RecordingSurface::holding());
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[0]);
        r.presenter.process_input_notify().unwrap();
        collect(&r.shown, 1, Duration::from_secs(1));

        r.presenter.end_of_stream().unwrap();
        // The surface still holds the frame.
        assert!(
            wait_for_event(&r.events, Duration::from_millis(100), |e| {
                *e == PresenterEvent::EndOfStream
            })
            .is_none()
        );

        r.surface.release_held();
        assert!(
            wait_for_event(&r.events, Duration::from_secs(1), |e| {
                *e == PresenterEvent::EndOfStream
            })
            .is_some()
        );
    }

    #[test]
    fn outstanding_input_notification_blocks_end_of_stream() {
        let r = rig(2);
        r.presenter.with_state(|st| st.sample_notify = true);
        r.presenter.end_of_stream().unwrap();
        assert!(r.events.try_recv().is_err());

        // Running dry clears the notification and completes the stream.
        r.presenter.process_input_notify().unwrap();
        assert!(
            wait_for_event(&r.events, Duration::from_secs(1), |e| {
                *e == PresenterEvent::EndOfStream
            })
            .is_some()
        );
    }

    #[test]
    fn frame_step_presents_the_third_of_five() {
        let r = rig(3);
        r.presenter.prepare_frame_step(3).unwrap();
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[0, 33, 66, 100, 133]);

        r.presenter.process_input_notify().unwrap();

        let shown = collect(&r.shown, 2, Duration::from_millis(300));
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].timestamp, Some(MediaTime::from_millis(66)));

        let done = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            matches!(e, PresenterEvent::StepComplete { .. })
        });
        assert_eq!(
            done,
            Some(PresenterEvent::StepComplete {
                token: shown[0].token
            })
        );
        assert!(r.events.try_recv().is_err());
    }

    #[test]
    fn long_frame_step_skips_iteratively() {
        const STEPS: i64 = 10_000;
        let r = rig(3);
        r.presenter.prepare_frame_step(STEPS as u32).unwrap();
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        let stamps: Vec<i64> = (0..STEPS + 2).collect();
        r.mixer.push_frames_ms(&stamps);

        r.presenter.process_input_notify().unwrap();

        let shown = collect(&r.shown, 1, Duration::from_secs(5));
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].timestamp, Some(MediaTime::from_millis(STEPS - 1)));
        let done = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            matches!(e, PresenterEvent::StepComplete { .. })
        });
        assert_eq!(
            done,
            Some(PresenterEvent::StepComplete {
                token: shown[0].token
            })
        );
    }

    #[test]
    fn long_run_of_stale_scrub_frames_is_discarded() {
        let clock = ManualClock::new();
        clock.set_now_ms(20_000);
        let r = rig_with(3, clock, RecordingSurface::new());
        r.presenter.on_clock_set_rate(0.0).unwrap();
        r.presenter.prepare_frame_step(1).unwrap();
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        let mut stamps: Vec<i64> = (0..10_000).collect();
        stamps.push(20_000);
        r.mixer.push_frames_ms(&stamps);

        r.presenter.process_input_notify().unwrap();

        let shown = collect(&r.shown, 2, Duration::from_millis(500));
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].timestamp, Some(MediaTime::from_millis(20_000)));
        let scrub = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            matches!(e, PresenterEvent::ScrubTime(_))
        });
        assert_eq!(scrub, Some(PresenterEvent::ScrubTime(MediaTime::from_millis(20_000))));
    }

    #[test]
    fn leaving_scrub_rate_cancels_step() {
        let r = rig_with(3, ManualClock::new(), RecordingSurface::holding());
        r.presenter.on_clock_set_rate(0.0).unwrap();
        r.presenter.prepare_frame_step(1).unwrap();
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[0, 33]);
        r.presenter.process_input_notify().unwrap();
        collect(&r.shown, 1, Duration::from_secs(1));

        r.presenter.on_clock_set_rate(1.0).unwrap();

        let cancelled = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            *e == PresenterEvent::StepCancelled
        });
        assert!(cancelled.is_some());
        // Withheld frame dropped: only the held one is still out.
        assert_eq!(r.presenter.pool_stats().in_use, 1);
    }

    #[test]
    fn scrub_step_reports_position() {
        let r = rig(3);
        r.presenter.on_clock_set_rate(0.0).unwrap();
        r.presenter.prepare_frame_step(1).unwrap();
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[40]);
        r.presenter.process_input_notify().unwrap();

        let scrub = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            matches!(e, PresenterEvent::ScrubTime(_))
        });
        assert_eq!(scrub, Some(PresenterEvent::ScrubTime(MediaTime::from_millis(40))));
    }

    #[test]
    fn restart_requires_pause() {
        let r = rig(2);
        assert_eq!(
            r.presenter.on_clock_restart(),
            Err(PresentError::InvalidTransition {
                operation: "restart",
                state: "stopped"
            })
        );
        r.presenter.on_clock_start(None).unwrap();
        r.presenter.on_clock_pause().unwrap();
        assert!(r.presenter.is_active());
        r.presenter.on_clock_restart().unwrap();
        assert_eq!(r.presenter.render_state(), RenderState::Started);
    }

    #[test]
    fn stop_flushes_and_cancels_step() {
        let r = rig(2);
        r.presenter.on_clock_start(None).unwrap();
        r.presenter.prepare_frame_step(2).unwrap();

        r.presenter.on_clock_stop().unwrap();

        assert_eq!(r.presenter.render_state(), RenderState::Stopped);
        assert_eq!(r.events.try_recv(), Ok(PresenterEvent::StepCancelled));
        // Stopping twice is a no-op.
        r.presenter.on_clock_stop().unwrap();
        assert!(r.events.try_recv().is_err());
    }

    #[test]
    fn seek_discards_queued_frames() {
        let clock = ManualClock::new();
        let r = rig_with(3, clock, RecordingSurface::new());
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[5_000, 5_033, 5_066]);
        r.presenter.process_input_notify().unwrap();
        assert_eq!(r.presenter.scheduler_stats().queued, 3);

        r.presenter
            .on_clock_start(Some(MediaTime::from_millis(1_000)))
            .unwrap();

        assert_eq!(r.presenter.scheduler_stats().queued, 0);
        assert!(collect(&r.shown, 1, Duration::from_millis(50)).is_empty());
    }

    #[test]
    fn repaint_presents_last_timestamp_again() {
        let r = rig(2);
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[0]);
        r.presenter.process_input_notify().unwrap();
        collect(&r.shown, 1, Duration::from_secs(1));

        r.presenter.on_clock_pause().unwrap();
        r.presenter.repaint().unwrap();

        let again = collect(&r.shown, 1, Duration::from_secs(1));
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].timestamp, Some(MediaTime::ZERO));
    }

    #[test]
    fn repaint_is_not_held_behind_a_timed_frame() {
        let r = rig(3);
        r.presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();
        r.mixer.push_frames_ms(&[0, 5_000]);
        r.presenter.process_input_notify().unwrap();
        let first = collect(&r.shown, 1, Duration::from_secs(1));
        assert_eq!(first.len(), 1);
        assert_eq!(r.presenter.scheduler_stats().queued, 1);

        r.presenter.on_clock_pause().unwrap();
        r.presenter.repaint().unwrap();

        let again = collect(&r.shown, 1, Duration::from_millis(500));
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].timestamp, Some(MediaTime::ZERO));
        assert_eq!(r.presenter.scheduler_stats().queued, 1);
    }

    #[test]
    fn stream_change_recreates_the_pool() {
        let r = rig(2);
        r.presenter.process_input_notify().unwrap();
        let first_generation = r.presenter.pool_stats().generation;

        r.mixer.fail_next(MixerError::StreamTypeChanged);
        r.presenter.on_clock_start(None).unwrap();

        assert!(r.presenter.pool_stats().generation > first_generation);
        assert_eq!(r.surface.created.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn mixer_failure_returns_buffer_and_error() {
        let r = rig(2);
        r.presenter.process_input_notify().unwrap();
        r.mixer.fail_next(MixerError::Failed("decoder crashed".into()));

        let err = r.presenter.on_clock_start(None).unwrap_err();
        assert_eq!(err, PresentError::Mixer(MixerError::Failed("decoder crashed".into())));
        assert_eq!(r.presenter.pool_stats().in_use, 0);
    }

    #[test]
    fn device_loss_is_surfaced() {
        let r = rig(2);
        r.presenter.on_clock_start(None).unwrap();
        r.surface.fail_next(SurfaceError::DeviceLost);
        r.mixer.push_frames_ms(&[0]);
        r.presenter.process_input_notify().unwrap();

        let lost = wait_for_event(&r.events, Duration::from_secs(1), |e| {
            *e == PresenterEvent::DeviceLost
        });
        assert!(lost.is_some());
        assert_eq!(
            r.presenter.last_error(),
            Some(PresentError::Surface(SurfaceError::DeviceLost))
        );
    }

    #[test]
    fn rate_limits_follow_format_and_refresh() {
        let r = rig(2);
        r.presenter.process_input_notify().unwrap();
        assert_eq!(r.presenter.fastest_rate(RateDirection::Forward, false), Ok(2.0));
        assert_eq!(r.presenter.slowest_rate(RateDirection::Forward), Ok(0.0));
        assert_eq!(
            r.presenter.set_rate(3.0, false),
            Err(PresentError::UnsupportedRate {
                requested: 3.0,
                nearest: 2.0
            })
        );
        r.presenter.set_rate(3.0, true).unwrap();
        assert_eq!(r.presenter.scheduler.clock_rate(), 3.0);
    }

    #[test]
    fn streaming_can_be_restarted() {
        let r = rig(2);
        r.presenter.end_streaming().unwrap();
        assert_eq!(r.presenter.end_streaming(), Err(PresentError::NotRunning));
        r.presenter.begin_streaming().unwrap();
        assert_eq!(
            r.presenter.begin_streaming(),
            Err(PresentError::AlreadyRunning)
        );
    }

    #[test]
    fn shutdown_during_negotiation_allocates_nothing() {
        let r = rig(2);
        let weak = Arc::downgrade(&r.presenter);
        r.mixer.on_propose(move || {
            if let Some(presenter) = weak.upgrade() {
                presenter.shutdown();
            }
        });

        assert_eq!(
            r.presenter.process_input_notify(),
            Err(PresentError::Shutdown)
        );
        assert_eq!(r.surface.created.load(Ordering::SeqCst), 0);
        assert_eq!(r.presenter.pool_stats().capacity, 0);
        assert_eq!(r.presenter.format(), None);
    }

    #[test]
    fn shutdown_is_terminal() {
        let r = rig(2);
        r.presenter.process_input_notify().unwrap();
        r.presenter.shutdown();

        assert_eq!(r.presenter.render_state(), RenderState::Shutdown);
        assert_eq!(r.presenter.on_clock_start(None), Err(PresentError::Shutdown));
        assert_eq!(r.presenter.flush(), Err(PresentError::Shutdown));
        assert_eq!(r.presenter.native_size(), Err(PresentError::Shutdown));
        assert_eq!(r.presenter.pool_stats().capacity, 0);
        assert_eq!(r.presenter.scheduler_stats().queued, 0);
        // Idempotent.
        r.presenter.shutdown();
    }
}
