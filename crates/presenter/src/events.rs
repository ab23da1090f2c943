//! Notifications sent to the presenter's owner.

use fp_common::{FormatDescriptor, FrameToken, MediaTime, PresentError};

/// Everything the presenter reports asynchronously.
///
/// Delivered over the `crossbeam` channel returned by
/// [`Presenter::new`](crate::Presenter::new).
#[derive(Clone, Debug, PartialEq)]
pub enum PresenterEvent {
    /// The stepped-to frame was consumed by the surface.
    StepComplete { token: FrameToken },
    /// A frame step in progress was abandoned.
    StepCancelled,
    /// Position reached while scrubbing (zero rate).
    ScrubTime(MediaTime),
    /// Upstream ended and every frame has been presented and released.
    EndOfStream,
    /// The surface lost its device. Call `invalidate_format` once it is
    /// recreated.
    DeviceLost,
    /// Playback cannot continue without intervention.
    PlaybackAborted(PresentError),
    /// A new output format was negotiated and its buffers allocated.
    FormatChanged(FormatDescriptor),
}
