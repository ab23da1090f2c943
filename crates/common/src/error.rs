//! Error types shared by the presenter components.
//!
//! Everything here is `Clone` so that failures detected on the presentation
//! thread can be carried inside events and kept as the presenter's last error.

use crate::format::FormatDescriptor;

/// Failures reported by the upstream mixer when asked for output.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MixerError {
    /// No more input is queued; wait for the next input notification.
    #[error("mixer needs more input")]
    NeedMoreInput,

    /// The mixer has no output format set.
    #[error("mixer output format is not negotiated")]
    FormatNotNegotiated,

    /// The upstream stream type changed; the output format must be redone.
    #[error("mixer stream type changed")]
    StreamTypeChanged,

    #[error("mixer failure: {0}")]
    Failed(String),
}

/// Failures reported by the presentation surface.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SurfaceError {
    /// The graphics device was lost; resources must be recreated.
    #[error("presentation device lost")]
    DeviceLost,

    #[error("presentation surface failure: {0}")]
    Failed(String),
}

/// Errors returned by the pool, the scheduler and the presenter.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PresentError {
    #[error("presenter has been shut down")]
    Shutdown,

    #[error("frame pool is already initialized")]
    AlreadyInitialized,

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("invalid transition: {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("no supported output format offered")]
    NoSupportedFormat,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(FormatDescriptor),

    #[error("unsupported rate {requested} (nearest supported {nearest})")]
    UnsupportedRate { requested: f32, nearest: f32 },

    #[error("timed out waiting for the presentation thread to flush")]
    FlushTimeout,

    #[error("failed to spawn presentation thread: {0}")]
    Spawn(String),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

impl PresentError {
    /// Errors the presenter absorbs and retries instead of surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Mixer(MixerError::NeedMoreInput) | Self::Mixer(MixerError::FormatNotNegotiated)
        )
    }
}
