use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Last known reachability of the upload endpoint.
///
/// A plain atomic flag: every completed probe or delivery overwrites it, so it
/// always holds the outcome of whichever network call finished last. Reads may
/// race with writes; the value is a snapshot either way.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    connected: CachePadded<AtomicBool>,
    updates: AtomicU64,
}

impl LivenessTracker {
    /// Starts disconnected until the first call completes
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns the previous value
    pub fn set(&self, connected: bool) -> bool {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.connected.swap(connected, Ordering::AcqRel)
    }

    /// Number of writes since construction
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}
