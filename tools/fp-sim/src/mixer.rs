//! Mixer that renders a fixed number of evenly spaced frames.

use parking_lot::Mutex;
use tracing::debug;

use fp_common::{FormatDescriptor, Frame, MediaTime, MixerError, PixelFormat, Rational, Resolution};
use fp_presenter::{Mixer, Proposal};

struct Cursor {
    format: Option<FormatDescriptor>,
    /// Frames handed out so far.
    produced: u32,
}

pub struct SyntheticMixer {
    frames: u32,
    frame_rate: Rational,
    resolution: Resolution,
    /// Emit frames last to first, for reverse playback.
    reverse: bool,
    cursor: Mutex<Cursor>,
}

impl SyntheticMixer {
    pub fn new(frames: u32, frame_rate: Rational, resolution: Resolution, reverse: bool) -> Self {
        Self {
            frames,
            frame_rate,
            resolution,
            reverse,
            cursor: Mutex::new(Cursor {
                format: None,
                produced: 0,
            }),
        }
    }

    pub fn timestamp_of(&self, index: u32) -> MediaTime {
        MediaTime::from_ticks(self.frame_rate.frame_duration().ticks() * i64::from(index))
    }

    /// Timestamp of the last frame of the stream.
    pub fn last_timestamp(&self) -> MediaTime {
        self.timestamp_of(self.frames.saturating_sub(1))
    }

    pub fn produced(&self) -> u32 {
        self.cursor.lock().produced
    }
}

impl Mixer for SyntheticMixer {
    fn available_output_formats(&self) -> Vec<FormatDescriptor> {
        // Interlaced first; the presenter has to skip it.
        let interlaced = FormatDescriptor {
            interlaced: true,
            ..FormatDescriptor::progressive(PixelFormat::Nv12, self.resolution, self.frame_rate)
        };
        vec![
            interlaced,
            FormatDescriptor::progressive(PixelFormat::Nv12, self.resolution, self.frame_rate),
            FormatDescriptor::progressive(PixelFormat::Bgra8, self.resolution, self.frame_rate),
        ]
    }

    fn propose_format(&self, format: &FormatDescriptor) -> Proposal {
        if format.interlaced {
            return Proposal::Rejected;
        }
        self.cursor.lock().format = Some(format.clone());
        debug!(%format, "Mixer output format set");
        Proposal::Accepted
    }

    fn process_output(&self, frame: &mut Frame) -> Result<(), MixerError> {
        let mut cursor = self.cursor.lock();
        if cursor.format.is_none() {
            return Err(MixerError::FormatNotNegotiated);
        }
        let duration = self.frame_rate.frame_duration();

        if let Some((time, _)) = frame.desired_time() {
            frame.set_timestamp(time, duration);
            return Ok(());
        }

        if cursor.produced >= self.frames {
            return Err(MixerError::NeedMoreInput);
        }
        let index = if self.reverse {
            self.frames - 1 - cursor.produced
        } else {
            cursor.produced
        };
        cursor.produced += 1;
        frame.set_timestamp(self.timestamp_of(index), duration);
        Ok(())
    }
}
