//! Shared vocabulary for the FramePace presentation pipeline.
//!
//! Everything that crosses a component boundary lives here: presentation
//! time, frame-rate ratios, negotiated formats, the frame buffer type that
//! travels between the pool, the scheduler and the surface, and the error
//! enums every component reports with.

pub mod error;
pub mod format;
pub mod frame;
pub mod time;

pub use error::{MixerError, PresentError, SurfaceError};
pub use format::{FormatDescriptor, PixelFormat, Rational, Resolution};
pub use frame::{BufferHandle, Frame, FrameId, FrameToken};
pub use time::MediaTime;
