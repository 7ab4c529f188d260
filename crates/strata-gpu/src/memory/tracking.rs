//! Allocation accounting.
//!
//! Every backend reports the bytes it allocates for staging and device
//! resources to an [`AllocationTracker`]. Trackers are cheap to clone and
//! share their counters, so a test can hand one to a [`GraphicsApi`] or a
//! [`HostAllocator`] and check the balance afterwards.
//!
//! [`GraphicsApi`]: crate::GraphicsApi
//! [`HostAllocator`]: crate::memory::HostAllocator

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    allocated: AtomicU64,
    freed: AtomicU64,
    alloc_calls: AtomicU64,
    free_calls: AtomicU64,
}

/// Shared byte and call counters.
#[derive(Clone, Default)]
pub struct AllocationTracker {
    counters: Arc<Counters>,
}

/// Point-in-time copy of a tracker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationStats {
    pub allocated: u64,
    pub freed: u64,
    pub alloc_calls: u64,
    pub free_calls: u64,
}

impl AllocationStats {
    /// Bytes currently allocated.
    pub fn in_use(&self) -> u64 {
        self.allocated - self.freed
    }
}

impl AllocationTracker {
    /// Create a tracker with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation of `bytes`.
    pub fn record_alloc(&self, bytes: u64) {
        self.counters.allocated.fetch_add(bytes, Ordering::Relaxed);
        self.counters.alloc_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release of `bytes`.
    pub fn record_free(&self, bytes: u64) {
        self.counters.freed.fetch_add(bytes, Ordering::Relaxed);
        self.counters.free_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Total bytes ever allocated.
    pub fn allocated(&self) -> u64 {
        self.counters.allocated.load(Ordering::Relaxed)
    }

    /// Total bytes ever freed.
    pub fn freed(&self) -> u64 {
        self.counters.freed.load(Ordering::Relaxed)
    }

    /// Bytes currently in use.
    pub fn in_use(&self) -> u64 {
        self.stats().in_use()
    }

    /// Number of allocations made.
    pub fn alloc_calls(&self) -> u64 {
        self.counters.alloc_calls.load(Ordering::Relaxed)
    }

    /// Number of frees made.
    pub fn free_calls(&self) -> u64 {
        self.counters.free_calls.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    pub fn stats(&self) -> AllocationStats {
        AllocationStats {
            allocated: self.allocated(),
            freed: self.freed(),
            alloc_calls: self.alloc_calls(),
            free_calls: self.free_calls(),
        }
    }
}

impl std::fmt::Debug for AllocationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AllocationTracker").field(&self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance() {
        let tracker = AllocationTracker::new();
        tracker.record_alloc(128);
        tracker.record_alloc(64);
        assert_eq!(tracker.in_use(), 192);

        tracker.record_free(128);
        assert_eq!(tracker.in_use(), 64);
        assert_eq!(tracker.alloc_calls(), 2);
        assert_eq!(tracker.free_calls(), 1);
    }

    #[test]
    fn clones_share_counters() {
        let tracker = AllocationTracker::new();
        let other = tracker.clone();
        other.record_alloc(10);
        assert_eq!(tracker.allocated(), 10);

        // Independent trackers do not see each other.
        let unrelated = AllocationTracker::new();
        assert_eq!(unrelated.allocated(), 0);
    }
}
