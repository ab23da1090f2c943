//! Frame buffers travelling through the presentation pipeline.
//!
//! A [`Frame`] is deliberately not `Clone`: at any moment exactly one
//! component owns it (the pool, the caller filling it, the scheduler queue,
//! or the surface). Components that only need to *recognise* a frame later
//! keep a [`FrameToken`], which is a plain value.

use std::fmt;

use crate::time::MediaTime;

/// Opaque reference to the graphics resource backing a frame (a texture or
/// swap-chain surface id owned by the presentation surface).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Names one pool slot within one format epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub slot: u32,
    pub generation: u64,
}

/// Names one acquisition of a pool slot.
///
/// Slots are recycled, so `FrameId` alone cannot tell two trips through the
/// pipeline apart; `serial` increments on every acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameToken {
    pub id: FrameId,
    pub serial: u64,
}

impl fmt::Display for FrameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot{}/gen{}#{}",
            self.id.slot, self.id.generation, self.serial
        )
    }
}

/// One decoded picture awaiting or undergoing presentation.
pub struct Frame {
    buffer: BufferHandle,
    id: FrameId,
    serial: u64,
    timestamp: Option<MediaTime>,
    duration: Option<MediaTime>,
    /// Time the mixer is asked to render into this buffer (repaint).
    desired: Option<(MediaTime, MediaTime)>,
    repaint: bool,
}

impl Frame {
    pub fn new(buffer: BufferHandle, id: FrameId) -> Self {
        Self {
            buffer,
            id,
            serial: 0,
            timestamp: None,
            duration: None,
            desired: None,
            repaint: false,
        }
    }

    /// Reset per-trip metadata when the pool hands this buffer out again.
    pub fn reissue(&mut self, serial: u64) {
        self.serial = serial;
        self.timestamp = None;
        self.duration = None;
        self.desired = None;
        self.repaint = false;
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.id.generation
    }

    pub fn token(&self) -> FrameToken {
        FrameToken {
            id: self.id,
            serial: self.serial,
        }
    }

    pub fn timestamp(&self) -> Option<MediaTime> {
        self.timestamp
    }

    pub fn duration(&self) -> Option<MediaTime> {
        self.duration
    }

    pub fn set_timestamp(&mut self, timestamp: MediaTime, duration: MediaTime) {
        self.timestamp = Some(timestamp);
        self.duration = Some(duration);
    }

    pub fn clear_timestamp(&mut self) {
        self.timestamp = None;
        self.duration = None;
    }

    /// Timestamp plus duration, when both are known.
    pub fn end_time(&self) -> Option<MediaTime> {
        match (self.timestamp, self.duration) {
            (Some(ts), Some(d)) => Some(ts + d),
            (Some(ts), None) => Some(ts),
            _ => None,
        }
    }

    pub fn desired_time(&self) -> Option<(MediaTime, MediaTime)> {
        self.desired
    }

    /// Ask the mixer to render the picture at `time` into this buffer.
    pub fn set_desired_time(&mut self, time: MediaTime, duration: MediaTime) {
        self.desired = Some((time, duration));
    }

    pub fn clear_desired_time(&mut self) {
        self.desired = None;
    }

    pub fn is_repaint(&self) -> bool {
        self.repaint
    }

    pub fn set_repaint(&mut self, repaint: bool) {
        self.repaint = repaint;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("buffer", &format_args!("0x{:x}", self.buffer.0))
            .field("token", &format_args!("{}", self.token()))
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("repaint", &self.repaint)
            .finish()
    }
}
