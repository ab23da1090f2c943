//! Frame stepping: advance exactly N frames while playback is otherwise held.
//!
//! The controller never presents or drops anything itself. Every decision is
//! returned as a [`StepAction`] so the caller can act on it after releasing
//! its own lock (dropping a pooled frame runs the release hook, which calls
//! back into the presenter).

use std::collections::VecDeque;

use tracing::debug;

use fp_common::{FrameToken, MediaTime};

use crate::pool::PooledFrame;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameStepState {
    /// No step requested.
    #[default]
    None,
    /// Steps requested, clock not running yet.
    WaitingStart,
    /// Clock running, looking for the target frame.
    Pending,
    /// Target frame handed to the surface, waiting for its release.
    Scheduled,
    /// Target frame consumed by the surface.
    Complete,
}

impl FrameStepState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WaitingStart => "waiting-start",
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Complete => "complete",
        }
    }
}

/// Clock facts a stepping decision depends on.
#[derive(Clone, Copy, Debug)]
pub struct StepContext {
    /// Clock rate is zero.
    pub scrubbing: bool,
    pub clock_now: MediaTime,
}

/// What the caller must do with a frame.
#[derive(Debug)]
pub enum StepAction {
    /// Present immediately, bypassing the timed wait.
    Present(PooledFrame),
    /// Hand back to normal scheduling.
    Schedule(PooledFrame),
    /// Drop (returns the buffer to the pool).
    Discard(PooledFrame),
}

/// The stepped-to frame was consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepCompletion {
    pub token: FrameToken,
    pub timestamp: Option<MediaTime>,
}

#[derive(Debug, Default)]
pub struct FrameStepController {
    state: FrameStepState,
    steps: u32,
    withheld: VecDeque<PooledFrame>,
    /// Identity of the presented step frame. A token, not the frame, so the
    /// pool still gets the buffer back when the surface drops it.
    target: Option<StepCompletion>,
}

impl FrameStepController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameStepState {
        self.state
    }

    pub fn remaining_steps(&self) -> u32 {
        self.steps
    }

    pub fn withheld_len(&self) -> usize {
        self.withheld.len()
    }

    /// Frames produced while a step is requested go through [`deliver`].
    ///
    /// [`deliver`]: Self::deliver
    pub fn is_active(&self) -> bool {
        self.state != FrameStepState::None
    }

    /// Request `steps` more frames.
    ///
    /// A request made while a step is `Scheduled` accumulates; frames keep
    /// being withheld until the clock starts again.
    pub fn prepare(&mut self, steps: u32) {
        self.steps = self.steps.saturating_add(steps);
        self.state = FrameStepState::WaitingStart;
        debug!(requested = steps, remaining = self.steps, "Frame step prepared");
    }

    /// The clock started running.
    pub fn on_clock_start(&mut self, ctx: StepContext) -> Vec<StepAction> {
        let mut actions = Vec::new();
        match self.state {
            FrameStepState::WaitingStart => {
                self.state = FrameStepState::Pending;
                while self.state == FrameStepState::Pending {
                    let Some(frame) = self.withheld.pop_front() else {
                        break;
                    };
                    if let Some(action) = self.deliver(frame, ctx) {
                        actions.push(action);
                    }
                }
            }
            FrameStepState::None => {
                actions.extend(self.withheld.drain(..).map(StepAction::Schedule));
            }
            _ => {}
        }
        actions
    }

    /// Decide the fate of a frame produced while stepping.
    ///
    /// Returns `None` when the frame is withheld for a later step.
    pub fn deliver(&mut self, frame: PooledFrame, ctx: StepContext) -> Option<StepAction> {
        if ctx.scrubbing && frame.end_time().is_some_and(|end| end < ctx.clock_now) {
            debug!(token = %frame.token(), "Discarding stale scrub frame");
            return Some(StepAction::Discard(frame));
        }

        match self.state {
            FrameStepState::None => Some(StepAction::Schedule(frame)),
            FrameStepState::Scheduled | FrameStepState::Complete => {
                self.withheld.push_back(frame);
                None
            }
            FrameStepState::WaitingStart | FrameStepState::Pending => {
                self.steps = self.steps.saturating_sub(1);
                if self.steps > 0 {
                    debug!(token = %frame.token(), remaining = self.steps, "Skipping frame");
                    Some(StepAction::Discard(frame))
                } else if self.state == FrameStepState::WaitingStart {
                    self.withheld.push_back(frame);
                    None
                } else {
                    self.target = Some(StepCompletion {
                        token: frame.token(),
                        timestamp: frame.timestamp(),
                    });
                    self.state = FrameStepState::Scheduled;
                    debug!(token = %frame.token(), "Presenting stepped frame");
                    Some(StepAction::Present(frame))
                }
            }
        }
    }

    /// A frame came back from the surface. Completes the step when it is
    /// the stepped-to frame.
    pub fn on_frame_released(&mut self, token: FrameToken) -> Option<StepCompletion> {
        if self.state != FrameStepState::Scheduled {
            return None;
        }
        match self.target {
            Some(target) if target.token == token => {
                self.state = FrameStepState::Complete;
                self.target = None;
                debug!(%token, "Frame step complete");
                Some(target)
            }
            _ => None,
        }
    }

    /// Abandon the current step. Returns `true` when a step was in progress,
    /// meaning the owner should report a cancellation.
    ///
    /// Withheld frames are kept; only [`take_withheld`](Self::take_withheld)
    /// clears them.
    pub fn cancel(&mut self) -> bool {
        let previous = self.state;
        self.state = FrameStepState::None;
        self.steps = 0;
        self.target = None;
        let cancelled = matches!(
            previous,
            FrameStepState::WaitingStart | FrameStepState::Pending | FrameStepState::Scheduled
        );
        if cancelled {
            debug!(state = previous.as_str(), "Frame step cancelled");
        }
        cancelled
    }

    /// Remove every withheld frame.
    pub fn take_withheld(&mut self) -> Vec<PooledFrame> {
        self.withheld.drain(..).collect()
    }
}
