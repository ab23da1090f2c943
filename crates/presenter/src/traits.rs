//! Contracts of the collaborators the presenter is wired to.
//!
//! The presenter never creates windows, textures or decoders itself. The
//! mixer fills frame buffers, the surface allocates and displays them, and
//! the clock tells everyone what time it is.

use fp_common::{
    BufferHandle, FormatDescriptor, Frame, MediaTime, MixerError, PresentError, SurfaceError,
};

use crate::pool::PooledFrame;

/// Answer to a format proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Proposal {
    Accepted,
    Rejected,
}

/// Upstream decoder/mixer that renders decoded pictures into pool buffers.
pub trait Mixer: Send + Sync {
    /// Output formats the mixer can produce, in order of preference.
    fn available_output_formats(&self) -> Vec<FormatDescriptor>;

    /// Ask the mixer to produce `format` from now on.
    fn propose_format(&self, format: &FormatDescriptor) -> Proposal;

    /// Render the next picture into `frame` and stamp its timestamp.
    ///
    /// When `frame.desired_time()` is set the mixer must re-render the
    /// picture at that time instead of advancing (repaint).
    fn process_output(&self, frame: &mut Frame) -> Result<(), MixerError>;
}

/// Monotonic presentation clock.
pub trait PresentationClock: Send + Sync {
    /// Current presentation time.
    fn now(&self) -> MediaTime;

    /// Current playback rate. Zero means scrubbing, negative means reverse.
    fn rate(&self) -> f32;
}

/// Receiver of clock state notifications (push model).
///
/// Notifications may arrive on any thread.
pub trait ClockStateSink: Send + Sync {
    /// The clock started. `offset` is the new start position, or `None` to
    /// continue from the current position.
    fn on_clock_start(&self, offset: Option<MediaTime>) -> Result<(), PresentError>;
    fn on_clock_stop(&self) -> Result<(), PresentError>;
    fn on_clock_pause(&self) -> Result<(), PresentError>;
    fn on_clock_restart(&self) -> Result<(), PresentError>;
    fn on_clock_set_rate(&self, rate: f32) -> Result<(), PresentError>;
}

/// The draw-call consumer: a swap chain or window surface.
pub trait PresentationSurface: Send + Sync {
    /// Allocate `count` buffers for `format`.
    fn create_buffers(
        &self,
        format: &FormatDescriptor,
        count: usize,
    ) -> Result<Vec<BufferHandle>, SurfaceError>;

    /// Display `frame`.
    ///
    /// The surface owns the frame from here on; dropping it (now or after the
    /// next vsync) is the "frame no longer in use" signal.
    fn present(&self, frame: PooledFrame) -> Result<(), SurfaceError>;

    /// Refresh rate of the display, when known. Bounds the fastest
    /// supported playback rate.
    fn refresh_rate_hz(&self) -> Option<f32> {
        None
    }
}
