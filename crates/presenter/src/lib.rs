//! Clock-synchronized video frame presenter.
//!
//! Decoded frames come from a [`Mixer`], wait in the [`Scheduler`] until the
//! [`PresentationClock`] says they are due and are handed to a
//! [`PresentationSurface`]. Buffers cycle through a [`FramePool`]; the
//! [`Presenter`] coordinates all of it and follows the clock's
//! start/stop/pause/rate notifications.

pub mod clock;
pub mod config;
pub mod events;
pub mod frame_step;
pub mod pool;
pub mod presenter;
pub mod rate;
pub mod scheduler;
pub mod session;
pub mod traits;

#[cfg(test)]
mod testing;

pub use clock::{ClockState, SystemClock};
pub use config::{PresenterConfig, DEFAULT_POOL_SIZE};
pub use events::PresenterEvent;
pub use frame_step::{FrameStepController, FrameStepState, StepAction, StepCompletion, StepContext};
pub use pool::{FramePool, PoolStats, PooledFrame, ReleaseHook};
pub use presenter::{Presenter, RenderState};
pub use rate::{RateDirection, RateLimits};
pub use scheduler::{ErrorHook, Scheduler, SchedulerStats};
pub use session::PlaybackSession;
pub use traits::{ClockStateSink, Mixer, PresentationClock, PresentationSurface, Proposal};
