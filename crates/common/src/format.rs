//! Negotiated video format description.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::MediaTime;

// ---------------------------------------------------------------------------
// Rational
// ---------------------------------------------------------------------------

/// A frame-rate ratio (`num / den` frames per second).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_29_97: Self = Self::new(30_000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// A ratio with a zero numerator or denominator carries no rate.
    pub const fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    pub fn as_f64(self) -> f64 {
        if self.is_valid() {
            f64::from(self.num) / f64::from(self.den)
        } else {
            0.0
        }
    }

    /// Nominal duration of one frame. Invalid ratios fall back to 30 fps.
    pub fn frame_duration(self) -> MediaTime {
        let r = if self.is_valid() { self } else { Self::FPS_30 };
        let ticks = (MediaTime::TICKS_PER_SECOND as u128 * u128::from(r.den)
            + u128::from(r.num) / 2)
            / u128::from(r.num);
        MediaTime::from_ticks(ticks as i64)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{:.3}", self.as_f64())
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self::new(1280, 720);
    pub const FHD: Self = Self::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Pixel format / format descriptor
// ---------------------------------------------------------------------------

/// Uncompressed layouts a surface may be asked to allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
    P010,
    Rgba8,
    Bgra8,
    /// Anything the mixer offers that the presenter does not render.
    Other(u32),
}

impl PixelFormat {
    /// Whether frames in this layout can be allocated and presented.
    pub fn is_presentable(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// One output format offered by the mixer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub pixel_format: PixelFormat,
    pub resolution: Resolution,
    pub frame_rate: Rational,
    pub interlaced: bool,
}

impl FormatDescriptor {
    pub fn progressive(pixel_format: PixelFormat, resolution: Resolution, frame_rate: Rational) -> Self {
        Self {
            pixel_format,
            resolution,
            frame_rate,
            interlaced: false,
        }
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} @ {} fps{}",
            self.pixel_format,
            self.resolution,
            self.frame_rate,
            if self.interlaced { " (interlaced)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_for_common_rates() {
        assert_eq!(Rational::FPS_25.frame_duration(), MediaTime::from_millis(40));
        assert_eq!(Rational::FPS_30.frame_duration().ticks(), 333_333);
        // 1001/30000 s = 333666.67 ticks, rounded
        assert_eq!(Rational::FPS_29_97.frame_duration().ticks(), 333_667);
    }

    #[test]
    fn invalid_rate_falls_back_to_30fps() {
        assert_eq!(
            Rational::new(0, 1).frame_duration(),
            Rational::FPS_30.frame_duration()
        );
        assert_eq!(Rational::new(30, 0).as_f64(), 0.0);
    }

    #[test]
    fn format_display() {
        let f = FormatDescriptor::progressive(PixelFormat::Nv12, Resolution::FHD, Rational::FPS_24);
        assert_eq!(f.to_string(), "Nv12 1920x1080 @ 24 fps");
    }

    #[test]
    fn other_pixel_formats_are_not_presentable() {
        assert!(PixelFormat::Bgra8.is_presentable());
        assert!(!PixelFormat::Other(0x3231_564E).is_presentable());
    }
}
