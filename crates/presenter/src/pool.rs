//! Fixed-capacity pool of reusable frame buffers.
//!
//! The pool is populated once per negotiated format. Every buffer it hands
//! out carries the pool's current *generation*; when the format changes (or
//! the pool is cleared) the generation moves on and any buffer that comes
//! back from the old epoch is discarded instead of being reused. This is the
//! guard against a frame that was in flight during a format change
//! resurrecting itself into the new pool.
//!
//! ## Free callback
//!
//! Frames leave the presenter wrapped in a [`PooledFrame`]. Dropping the
//! guard returns the buffer to the pool exactly once and then runs the
//! release hook registered by [`FramePool::arm`], which is how the presenter
//! learns that the surface is done with a frame.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use fp_common::{BufferHandle, Frame, FrameId, FrameToken, PresentError};

/// Callback invoked after a pooled frame has been handed back.
pub type ReleaseHook = Arc<dyn Fn(FrameToken) + Send + Sync>;

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

struct PoolInner {
    /// Format epoch of the buffers currently owned by the pool.
    generation: u64,
    initialized: bool,
    /// Number of buffers created for this generation.
    capacity: usize,
    free: VecDeque<Frame>,
    /// Slots of this generation that are currently handed out.
    outstanding: HashSet<FrameId>,
    next_serial: u64,
    stale_discards: u64,
}

/// Snapshot of pool occupancy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub generation: u64,
    pub capacity: usize,
    pub free: usize,
    pub in_use: usize,
    /// Buffers returned from an older generation and thrown away.
    pub stale_discards: u64,
}

/// Thread-safe pool of frame buffers for one negotiated format.
pub struct FramePool {
    inner: Mutex<PoolInner>,
}

impl FramePool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                generation: 0,
                initialized: false,
                capacity: 0,
                free: VecDeque::new(),
                outstanding: HashSet::new(),
                next_serial: 0,
                stale_discards: 0,
            }),
        }
    }

    /// Populate the pool with freshly created buffers.
    ///
    /// Starts a new generation and returns it.
    ///
    /// # Errors
    /// `PresentError::AlreadyInitialized` if the pool holds buffers that were
    /// not cleared first.
    pub fn initialize(&self, buffers: Vec<BufferHandle>) -> Result<u64, PresentError> {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return Err(PresentError::AlreadyInitialized);
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.capacity = buffers.len();
        inner.free = buffers
            .into_iter()
            .enumerate()
            .map(|(slot, buffer)| {
                Frame::new(
                    buffer,
                    FrameId {
                        slot: slot as u32,
                        generation,
                    },
                )
            })
            .collect();
        inner.outstanding.clear();
        inner.initialized = true;

        info!(generation, capacity = inner.capacity, "Frame pool initialized");
        Ok(generation)
    }

    /// Take a free buffer.
    ///
    /// `None` means every buffer is in flight. That is not an error: try
    /// again once a frame has been released.
    pub fn acquire(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        if !inner.initialized {
            return None;
        }
        let mut frame = inner.free.pop_front()?;
        inner.next_serial += 1;
        frame.reissue(inner.next_serial);
        inner.outstanding.insert(frame.id());
        Some(frame)
    }

    /// Return a buffer to the free set.
    ///
    /// Returns `false` when the buffer was discarded instead: it belongs to a
    /// stale generation, or it was not handed out by this pool.
    pub fn release(&self, frame: Frame) -> bool {
        let mut inner = self.inner.lock();

        if !inner.initialized || frame.generation() != inner.generation {
            inner.stale_discards += 1;
            debug!(
                frame_generation = frame.generation(),
                pool_generation = inner.generation,
                "Discarding buffer from stale generation"
            );
            return false;
        }

        if !inner.outstanding.remove(&frame.id()) {
            error!(token = %frame.token(), "Released a frame that is not outstanding");
            debug_assert!(false, "frame {} released twice", frame.token());
            return false;
        }

        inner.free.push_back(frame);
        true
    }

    /// Drain and discard every buffer, free or in flight.
    ///
    /// The generation moves on, so releases of buffers from the cleared
    /// epoch become no-ops.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let dropped_free = inner.free.len();
        let in_flight = inner.outstanding.len();
        inner.free.clear();
        inner.outstanding.clear();
        inner.capacity = 0;
        inner.initialized = false;
        inner.generation += 1;

        debug!(dropped_free, in_flight, "Frame pool cleared");
    }

    /// True when some buffer of the current generation is still in flight.
    pub fn are_frames_pending(&self) -> bool {
        let inner = self.inner.lock();
        inner.initialized && inner.free.len() < inner.capacity
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            generation: inner.generation,
            capacity: inner.capacity,
            free: inner.free.len(),
            in_use: inner.outstanding.len(),
            stale_discards: inner.stale_discards,
        }
    }

    /// Register the free callback on a filled frame.
    ///
    /// The returned guard owns the frame; dropping it releases the buffer to
    /// this pool and then calls `hook` with the frame's token.
    pub fn arm(self: &Arc<Self>, frame: Frame, hook: Option<ReleaseHook>) -> PooledFrame {
        PooledFrame {
            token: frame.token(),
            frame: Some(frame),
            pool: Arc::clone(self),
            hook,
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("FramePool")
            .field("generation", &stats.generation)
            .field("capacity", &stats.capacity)
            .field("free", &stats.free)
            .field("in_use", &stats.in_use)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PooledFrame (RAII release guard)
// ---------------------------------------------------------------------------

/// A filled frame on its way to (or held by) the presentation surface.
///
/// Dropping the guard is the "frame no longer in use" signal: the buffer
/// goes back to its pool and the release hook runs, once.
pub struct PooledFrame {
    /// Taken only by `Drop`.
    frame: Option<Frame>,
    token: FrameToken,
    pool: Arc<FramePool>,
    hook: Option<ReleaseHook>,
}

impl PooledFrame {
    pub fn token(&self) -> FrameToken {
        self.token
    }
}

impl Deref for PooledFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame.as_ref().expect("frame present until drop")
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut Frame {
        self.frame.as_mut().expect("frame present until drop")
    }
}

impl fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledFrame").field(&self.frame).finish()
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
        if let Some(hook) = self.hook.take() {
            hook(self.token);
        }
    }
}
