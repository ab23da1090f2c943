//! Surface that logs every presentation instead of drawing it.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use fp_common::{BufferHandle, FormatDescriptor, SurfaceError};
use fp_presenter::{PooledFrame, PresentationSurface};

pub struct LoggingSurface {
    refresh_hz: f32,
    next_buffer: AtomicU64,
    presented: AtomicU64,
    /// Fail this many presentations with `DeviceLost` first.
    lose_device: AtomicU64,
}

impl LoggingSurface {
    pub fn new(refresh_hz: f32, lose_device: u64) -> Self {
        Self {
            refresh_hz,
            next_buffer: AtomicU64::new(1),
            presented: AtomicU64::new(0),
            lose_device: AtomicU64::new(lose_device),
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl PresentationSurface for LoggingSurface {
    fn create_buffers(
        &self,
        format: &FormatDescriptor,
        count: usize,
    ) -> Result<Vec<BufferHandle>, SurfaceError> {
        let first = self.next_buffer.fetch_add(count as u64, Ordering::Relaxed);
        debug!(%format, count, first, "Allocated buffers");
        Ok((first..first + count as u64).map(BufferHandle).collect())
    }

    fn present(&self, frame: PooledFrame) -> Result<(), SurfaceError> {
        if self
            .lose_device
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SurfaceError::DeviceLost);
        }

        let n = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            n,
            token = %frame.token(),
            buffer = frame.buffer().0,
            pts = ?frame.timestamp(),
            repaint = frame.is_repaint(),
            "Present"
        );
        // Blit and release straight away.
        drop(frame);
        Ok(())
    }

    fn refresh_rate_hz(&self) -> Option<f32> {
        Some(self.refresh_hz)
    }
}
