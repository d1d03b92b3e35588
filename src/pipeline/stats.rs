//! Lock-free pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use super::Step;

/// Per-step frame counters, shared between the capture loop and observers
#[derive(Debug, Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    rate_limited: AtomicU64,
    disconnected: AtomicU64,
    encode_failed: AtomicU64,
    dispatched: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub rate_limited: u64,
    pub disconnected: u64,
    pub encode_failed: u64,
    pub dispatched: u64,
}

impl StatsSnapshot {
    /// Frames that got past the gate, whether or not they encoded
    pub fn admitted(&self) -> u64 {
        self.encode_failed + self.dispatched
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, step: &Step) {
        let c = &self.counters;
        c.captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_captured_total").increment(1);

        let (counter, name) = match step {
            Step::RateLimited => (&c.rate_limited, "rate_limited"),
            Step::Disconnected => (&c.disconnected, "disconnected"),
            Step::EncodeFailed(_) => (&c.encode_failed, "encode_failed"),
            Step::Dispatched(_) => (&c.dispatched, "dispatched"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_total", "step" => name).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            captured: c.captured.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            disconnected: c.disconnected.load(Ordering::Relaxed),
            encode_failed: c.encode_failed.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
        }
    }
}
