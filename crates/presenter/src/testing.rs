//! Test doubles for the presenter's collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use fp_common::{
    BufferHandle, FormatDescriptor, Frame, FrameToken, MediaTime, MixerError, PixelFormat,
    Rational, Resolution, SurfaceError,
};

use crate::events::PresenterEvent;
use crate::pool::{FramePool, PooledFrame};
use crate::traits::{Mixer, PresentationClock, PresentationSurface, Proposal};

pub(crate) fn nv12_format(frame_rate: Rational) -> FormatDescriptor {
    FormatDescriptor::progressive(PixelFormat::Nv12, Resolution::HD, frame_rate)
}

/// Acquire a buffer, stamp it and arm it without a release hook.
pub(crate) fn pooled(pool: &Arc<FramePool>, ts_ms: i64) -> PooledFrame {
    let mut frame = pool.acquire().expect("pool has a free buffer");
    frame.set_timestamp(MediaTime::from_millis(ts_ms), MediaTime::from_millis(10));
    pool.arm(frame, None)
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A clock that only moves when told to.
pub(crate) struct ManualClock {
    now: Mutex<MediaTime>,
    rate: Mutex<f32>,
}

impl ManualClock {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(MediaTime::ZERO),
            rate: Mutex::new(1.0),
        })
    }

    pub(crate) fn set_now_ms(&self, ms: i64) {
        *self.now.lock() = MediaTime::from_millis(ms);
    }

    pub(crate) fn set_rate(&self, rate: f32) {
        *self.rate.lock() = rate;
    }
}

impl PresentationClock for ManualClock {
    fn now(&self) -> MediaTime {
        *self.now.lock()
    }

    fn rate(&self) -> f32 {
        *self.rate.lock()
    }
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// One call to `present`.
#[derive(Clone, Debug)]
pub(crate) struct Presented {
    pub token: FrameToken,
    pub timestamp: Option<MediaTime>,
    pub at: Instant,
}

/// Records every presentation and drops the frame straight away, unless
/// told to hold the most recent one like a real swap chain.
pub(crate) struct RecordingSurface {
    tx: Sender<Presented>,
    failures: Mutex<VecDeque<SurfaceError>>,
    hold_last: bool,
    held: Mutex<Option<PooledFrame>>,
    next_buffer: AtomicU64,
    pub created: AtomicUsize,
    pub refresh_hz: Option<f32>,
}

impl RecordingSurface {
    pub(crate) fn new() -> (Arc<Self>, Receiver<Presented>) {
        Self::build(false)
    }

    pub(crate) fn holding() -> (Arc<Self>, Receiver<Presented>) {
        Self::build(true)
    }

    fn build(hold_last: bool) -> (Arc<Self>, Receiver<Presented>) {
        let (tx, rx) = channel::unbounded();
        let surface = Arc::new(Self {
            tx,
            failures: Mutex::new(VecDeque::new()),
            hold_last,
            held: Mutex::new(None),
            next_buffer: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            refresh_hz: Some(60.0),
        });
        (surface, rx)
    }

    /// Make the next `present` call fail with `err`.
    pub(crate) fn fail_next(&self, err: SurfaceError) {
        self.failures.lock().push_back(err);
    }

    /// Drop the frame currently on screen.
    pub(crate) fn release_held(&self) {
        let held = self.held.lock().take();
        drop(held);
    }
}

impl PresentationSurface for RecordingSurface {
    fn create_buffers(
        &self,
        _format: &FormatDescriptor,
        count: usize,
    ) -> Result<Vec<BufferHandle>, SurfaceError> {
        self.created.fetch_add(count, Ordering::SeqCst);
        Ok((0..count)
            .map(|_| BufferHandle(self.next_buffer.fetch_add(1, Ordering::SeqCst)))
            .collect())
    }

    fn present(&self, frame: PooledFrame) -> Result<(), SurfaceError> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let record = Presented {
            token: frame.token(),
            timestamp: frame.timestamp(),
            at: Instant::now(),
        };
        if self.hold_last {
            let previous = self.held.lock().replace(frame);
            drop(previous);
        } else {
            drop(frame);
        }
        let _ = self.tx.send(record);
        Ok(())
    }

    fn refresh_rate_hz(&self) -> Option<f32> {
        self.refresh_hz
    }
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

type ProposeHook = Box<dyn Fn() + Send + Sync>;

/// A mixer that hands out a scripted list of timestamps.
pub(crate) struct ScriptedMixer {
    formats: Mutex<Vec<FormatDescriptor>>,
    on_propose: Mutex<Option<ProposeHook>>,
    rejected: Mutex<Vec<FormatDescriptor>>,
    pending: Mutex<VecDeque<MediaTime>>,
    errors: Mutex<VecDeque<MixerError>>,
    frame_duration: MediaTime,
    pub proposals: AtomicUsize,
    pub outputs: AtomicUsize,
}

impl ScriptedMixer {
    pub(crate) fn new(format: FormatDescriptor) -> Arc<Self> {
        let frame_duration = format.frame_rate.frame_duration();
        Arc::new(Self {
            formats: Mutex::new(vec![format]),
            on_propose: Mutex::new(None),
            rejected: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
            frame_duration,
            proposals: AtomicUsize::new(0),
            outputs: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_formats(&self, formats: Vec<FormatDescriptor>) {
        *self.formats.lock() = formats;
    }

    /// Run `f` on every format proposal, before answering it.
    pub(crate) fn on_propose(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.on_propose.lock() = Some(Box::new(f));
    }

    pub(crate) fn reject(&self, format: FormatDescriptor) {
        self.rejected.lock().push(format);
    }

    pub(crate) fn push_frames_ms(&self, timestamps: &[i64]) {
        self.pending
            .lock()
            .extend(timestamps.iter().map(|ms| MediaTime::from_millis(*ms)));
    }

    /// Fail the next `process_output` call with `err`.
    pub(crate) fn fail_next(&self, err: MixerError) {
        self.errors.lock().push_back(err);
    }
}

impl Mixer for ScriptedMixer {
    fn available_output_formats(&self) -> Vec<FormatDescriptor> {
        self.formats.lock().clone()
    }

    fn propose_format(&self, format: &FormatDescriptor) -> Proposal {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_propose.lock().as_ref() {
            hook();
        }
        if self.rejected.lock().contains(format) {
            Proposal::Rejected
        } else {
            Proposal::Accepted
        }
    }

    fn process_output(&self, frame: &mut Frame) -> Result<(), MixerError> {
        if let Some(err) = self.errors.lock().pop_front() {
            return Err(err);
        }
        if let Some((time, duration)) = frame.desired_time() {
            frame.set_timestamp(time, duration);
            frame.set_repaint(true);
            self.outputs.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        let ts = self
            .pending
            .lock()
            .pop_front()
            .ok_or(MixerError::NeedMoreInput)?;
        frame.set_timestamp(ts, self.frame_duration);
        self.outputs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Collect presentations until `count` arrive or `timeout` passes.
pub(crate) fn collect(rx: &Receiver<Presented>, count: usize, timeout: Duration) -> Vec<Presented> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(p) => out.push(p),
            Err(_) => break,
        }
    }
    out
}

/// Wait for the first event matching `pred`, skipping the others.
pub(crate) fn wait_for_event(
    rx: &Receiver<PresenterEvent>,
    timeout: Duration,
    pred: impl Fn(&PresenterEvent) -> bool,
) -> Option<PresenterEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}
