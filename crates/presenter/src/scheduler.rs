//! Presentation scheduler.
//!
//! Owns the queue of frames waiting for their presentation time and the
//! dedicated thread that waits for them.
//!
//! ```text
//! producer threads              presentation thread
//! ┌──────────────────┐          ┌──────────────────────────────┐
//! │ schedule_frame() │── push ─►│ wait_for(next due / poll)    │
//! │ flush() ─────────│── req ──►│ drain queue, ack ──┐         │
//! │   waits on ack ◄─│──────────│────────────────────┘         │
//! └──────────────────┘          │ surface.present(frame)       │
//!                               └──────────────────────────────┘
//! ```
//!
//! ## Timing
//!
//! For the frame at the head of the queue the thread computes
//! `delta = timestamp - clock.now()` (negated for reverse playback):
//!
//! - `delta < -¼ frame`: late, presented immediately. The scheduler never
//!   drops a frame for being late; callers that want to skip frames do so
//!   before scheduling.
//! - `delta > ¾ frame`: early, the thread sleeps `(delta - ¾ frame) / |rate|`.
//! - otherwise: presented now.
//!
//! A zero rate (scrubbing) and `present_now` entries skip the wait entirely.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use fp_common::{MediaTime, PresentError, Rational, SurfaceError};

use crate::config::PresenterConfig;
use crate::pool::PooledFrame;
use crate::traits::{PresentationClock, PresentationSurface};

/// Receives presentation failures detected on the presentation thread.
pub type ErrorHook = Arc<dyn Fn(SurfaceError) + Send + Sync>;

// ---------------------------------------------------------------------------
// Queue entries and shared state
// ---------------------------------------------------------------------------

struct ScheduleEntry {
    frame: PooledFrame,
    present_now: bool,
    /// Arrival order; only used for diagnostics.
    seq: u64,
}

struct SchedulerState {
    queue: VecDeque<ScheduleEntry>,
    clock: Option<Arc<dyn PresentationClock>>,
    rate: f32,
    frame_duration: MediaTime,
    quarter_frame: MediaTime,
    last_frame_time: MediaTime,
    running: bool,
    stop_requested: bool,
    /// Flush requests raised by callers / acknowledged by the thread.
    flush_requested: u64,
    flush_acked: u64,
    next_seq: u64,
    thread_id: Option<ThreadId>,
    presented: u64,
    late: u64,
}

struct Shared {
    state: Mutex<SchedulerState>,
    /// Wakes the presentation thread: new work, rate change, flush, stop.
    wake: Condvar,
    /// Signalled by the presentation thread when a flush completes.
    flushed: Condvar,
    surface: Arc<dyn PresentationSurface>,
    on_error: ErrorHook,
    max_poll: Duration,
    flush_timeout: Duration,
}

/// What the presentation thread does next.
enum Next {
    Present(ScheduleEntry),
    Wait(Duration),
    Flush(u64),
    Exit,
}

/// Counters for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub presented: u64,
    /// Frames presented more than a quarter frame after their due time.
    pub late: u64,
    pub queued: usize,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Rate-aware frame scheduler with its own presentation thread.
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        surface: Arc<dyn PresentationSurface>,
        on_error: ErrorHook,
        config: &PresenterConfig,
    ) -> Self {
        let frame_duration = config.default_frame_rate.frame_duration();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    queue: VecDeque::new(),
                    clock: None,
                    rate: 1.0,
                    frame_duration,
                    quarter_frame: MediaTime::from_ticks(frame_duration.ticks() / 4),
                    last_frame_time: MediaTime::ZERO,
                    running: false,
                    stop_requested: false,
                    flush_requested: 0,
                    flush_acked: 0,
                    next_seq: 0,
                    thread_id: None,
                    presented: 0,
                    late: 0,
                }),
                wake: Condvar::new(),
                flushed: Condvar::new(),
                surface,
                on_error,
                max_poll: config.max_poll_interval(),
                flush_timeout: config.flush_timeout(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the presentation thread bound to `clock`.
    ///
    /// # Errors
    /// `PresentError::AlreadyRunning` if the thread is active.
    pub fn start(&self, clock: Arc<dyn PresentationClock>) -> Result<(), PresentError> {
        {
            let mut st = self.shared.state.lock();
            if st.running {
                return Err(PresentError::AlreadyRunning);
            }
            st.rate = clock.rate();
            st.clock = Some(clock);
            st.running = true;
            st.stop_requested = false;
            st.flush_acked = st.flush_requested;
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("fp-present".to_string())
            .spawn(move || presentation_thread_main(shared))
            .map_err(|e| {
                let mut st = self.shared.state.lock();
                st.running = false;
                st.clock = None;
                PresentError::Spawn(e.to_string())
            })?;

        *self.thread.lock() = Some(handle);
        info!("Scheduler started");
        Ok(())
    }

    /// Stop the presentation thread and wait for it to exit.
    ///
    /// Frames still queued are dropped on the calling thread, which returns
    /// their buffers to the pool.
    pub fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            st.stop_requested = true;
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                // Stopping from a present callback; the loop exits on its own.
                warn!("Scheduler stopped from the presentation thread");
            } else if handle.join().is_err() {
                error!("Presentation thread panicked");
            }
        }

        let drained: Vec<ScheduleEntry> = {
            let mut st = self.shared.state.lock();
            st.running = false;
            st.clock = None;
            st.thread_id = None;
            st.queue.drain(..).collect()
        };
        self.shared.flushed.notify_all();

        if !drained.is_empty() {
            debug!(discarded = drained.len(), "Dropped queued frames on stop");
        }
        drop(drained);
    }

    /// Queue a frame. `present_now` skips the timed wait.
    pub fn schedule_frame(&self, frame: PooledFrame, present_now: bool) {
        {
            let mut st = self.shared.state.lock();
            let seq = st.next_seq;
            st.next_seq += 1;
            trace!(
                seq,
                token = %frame.token(),
                pts = ?frame.timestamp(),
                present_now,
                "Scheduling frame"
            );
            st.queue.push_back(ScheduleEntry {
                frame,
                present_now,
                seq,
            });
        }
        self.shared.wake.notify_all();
    }

    /// Discard every queued frame.
    ///
    /// Blocks until the presentation thread has acknowledged, so that once
    /// this returns no previously queued frame can still be presented and
    /// their buffers are back in the pool.
    ///
    /// # Errors
    /// `PresentError::FlushTimeout` if the thread does not answer within the
    /// configured flush timeout.
    pub fn flush(&self) -> Result<(), PresentError> {
        let mut st = self.shared.state.lock();

        if !st.running || st.thread_id == Some(thread::current().id()) {
            let drained: Vec<ScheduleEntry> = st.queue.drain(..).collect();
            drop(st);
            if !drained.is_empty() {
                debug!(discarded = drained.len(), "Flushed scheduled frames inline");
            }
            drop(drained);
            return Ok(());
        }

        st.flush_requested += 1;
        let target = st.flush_requested;
        self.shared.wake.notify_all();

        let deadline = Instant::now() + self.shared.flush_timeout;
        while st.running && st.flush_acked < target {
            if self
                .shared
                .flushed
                .wait_until(&mut st, deadline)
                .timed_out()
                && st.running
                && st.flush_acked < target
            {
                error!(target, acked = st.flush_acked, "Scheduler flush timed out");
                return Err(PresentError::FlushTimeout);
            }
        }
        Ok(())
    }

    /// Update the rate used for delay computation. Zero means scrubbing.
    pub fn set_clock_rate(&self, rate: f32) {
        self.shared.state.lock().rate = rate;
        self.shared.wake.notify_all();
        debug!(rate, "Scheduler clock rate set");
    }

    /// Nominal frame rate of the stream; sets the timing tolerance.
    pub fn set_frame_rate(&self, frame_rate: Rational) {
        let duration = frame_rate.frame_duration();
        let mut st = self.shared.state.lock();
        st.frame_duration = duration;
        st.quarter_frame = MediaTime::from_ticks(duration.ticks() / 4);
        debug!(fps = %frame_rate, duration = %duration, "Scheduler frame rate set");
    }

    /// Timestamp of the last presented frame and the nominal frame duration.
    pub fn last_frame_time(&self) -> (MediaTime, MediaTime) {
        let st = self.shared.state.lock();
        (st.last_frame_time, st.frame_duration)
    }

    pub fn frame_duration(&self) -> MediaTime {
        self.shared.state.lock().frame_duration
    }

    pub fn clock_rate(&self) -> f32 {
        self.shared.state.lock().rate
    }

    pub fn queued_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn stats(&self) -> SchedulerStats {
        let st = self.shared.state.lock();
        SchedulerStats {
            presented: st.presented,
            late: st.late,
            queued: st.queue.len(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Presentation thread
// ---------------------------------------------------------------------------

fn presentation_thread_main(shared: Arc<Shared>) {
    shared.state.lock().thread_id = Some(thread::current().id());
    debug!("Presentation thread running");

    loop {
        let next = {
            let mut st = shared.state.lock();
            let next = next_action(&mut st, shared.max_poll);
            if let Next::Wait(timeout) = next {
                shared.wake.wait_for(&mut st, timeout);
                continue;
            }
            next
        };

        match next {
            Next::Present(entry) => present(&shared, entry),
            Next::Flush(target) => {
                let drained: Vec<ScheduleEntry> = shared.state.lock().queue.drain(..).collect();
                let discarded = drained.len();
                drop(drained);
                shared.state.lock().flush_acked = target;
                shared.flushed.notify_all();
                debug!(discarded, "Flushed scheduled frames");
            }
            Next::Exit => break,
            Next::Wait(_) => {}
        }
    }

    debug!("Presentation thread exiting");
}

/// Decide what to do with the head of the queue. Flush and stop requests
/// take priority over presenting.
fn next_action(st: &mut SchedulerState, max_poll: Duration) -> Next {
    if st.flush_requested != st.flush_acked {
        return Next::Flush(st.flush_requested);
    }
    if st.stop_requested {
        return Next::Exit;
    }

    let Some((present_now, timestamp)) = st
        .queue
        .front()
        .map(|e| (e.present_now, e.frame.timestamp()))
    else {
        return Next::Wait(max_poll);
    };

    let clock_now = st.clock.as_ref().map(|c| c.now());
    if let (false, Some(ts), Some(now)) = (present_now || st.rate == 0.0, timestamp, clock_now) {
        let mut delta = ts - now;
        if st.rate < 0.0 {
            delta = -delta;
        }
        let early_window = st.quarter_frame.scale(3.0);
        if delta > early_window {
            // Immediate frames do not wait behind a timed head.
            if let Some(index) = st.queue.iter().position(|e| e.present_now) {
                return take_entry(st, index, max_poll);
            }
            let sleep = (delta - early_window).div_rate(st.rate);
            return Next::Wait(sleep.to_duration());
        }
        if delta < -st.quarter_frame {
            st.late += 1;
            trace!(late_by = %(-delta), "Presenting late frame");
        }
    }

    take_entry(st, 0, max_poll)
}

fn take_entry(st: &mut SchedulerState, index: usize, max_poll: Duration) -> Next {
    match st.queue.remove(index) {
        Some(entry) => {
            if let Some(ts) = entry.frame.timestamp() {
                st.last_frame_time = ts;
            }
            st.presented += 1;
            Next::Present(entry)
        }
        None => Next::Wait(max_poll),
    }
}

fn present(shared: &Shared, entry: ScheduleEntry) {
    let seq = entry.seq;
    let token = entry.frame.token();
    let pts = entry.frame.timestamp();

    match shared.surface.present(entry.frame) {
        Ok(()) => trace!(seq, %token, ?pts, "Frame presented"),
        Err(err) => {
            warn!(seq, %token, error = %err, "Presentation failed");
            (shared.on_error)(err);
        }
    }
}
