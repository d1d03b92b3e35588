use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::Frame;
use crate::upload::LivenessTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Process,
    DropRateLimited,
    DropDisconnected,
}

/// Admission control in front of the encoder.
///
/// Two independent checks, in order: the frame must be at least one interval
/// after the last admitted frame, then the endpoint must be believed
/// reachable. Only an admitted frame moves the rate-limit clock.
#[derive(Debug)]
pub struct FrameGate {
    interval: Duration,
    last_processed_at: Option<Instant>,
    liveness: Arc<LivenessTracker>,
}

impl FrameGate {
    pub fn new(interval: Duration, liveness: Arc<LivenessTracker>) -> Self {
        Self {
            interval,
            last_processed_at: None,
            liveness,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_processed_at(&self) -> Option<Instant> {
        self.last_processed_at
    }

    pub fn admit(&mut self, _frame: &Frame, now: Instant) -> Admission {
        self.admit_at(now)
    }

    pub(crate) fn admit_at(&mut self, now: Instant) -> Admission {
        if let Some(last) = self.last_processed_at {
            // A timestamp before the last admitted one is never overdue
            match now.checked_duration_since(last) {
                Some(elapsed) if elapsed >= self.interval => {}
                _ => return Admission::DropRateLimited,
            }
        }

        if !self.liveness.get() {
            return Admission::DropDisconnected;
        }

        self.last_processed_at = Some(now);
        Admission::Process
    }
}
