//! Change tracker: tells a real mutation apart from a no-op.
//!
//! Every index mutation bumps a generation counter while the index write
//! lock is held. A flush records the generation of the snapshot it wrote.
//! The store is dirty while the mutation generation is ahead of the
//! flushed generation, so a flush that fails (or is abandoned on timeout)
//! leaves the store dirty without any explicit re-marking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Dirty flag plus flush statistics for one record store.
#[derive(Debug)]
pub struct ChangeTracker {
    /// Incremented on every index mutation
    generation: AtomicU64,
    /// Highest generation known to be on disk
    flushed: AtomicU64,
    /// Successful file writes since the store was opened
    total_flushes: AtomicU64,
    /// Failed or timed-out flushes since the store was opened
    failed_flushes: AtomicU64,
}

impl ChangeTracker {
    /// Create a clean tracker.
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            total_flushes: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
        }
    }

    /// Record a mutation. Returns the new generation.
    pub fn mark_dirty(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current mutation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Generation of the last snapshot written to disk.
    pub fn flushed_generation(&self) -> u64 {
        self.flushed.load(Ordering::Acquire)
    }

    /// True when the index holds changes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.generation() > self.flushed_generation()
    }

    /// Record that the snapshot taken at `generation` is on disk.
    /// Never moves the flushed generation backwards.
    pub fn mark_flushed(&self, generation: u64) {
        self.flushed.fetch_max(generation, Ordering::AcqRel);
    }

    /// Count a completed file write.
    pub fn record_write(&self) {
        self.total_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed or timed-out flush.
    pub fn record_failure(&self) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful file writes since open.
    pub fn total_flushes(&self) -> u64 {
        self.total_flushes.load(Ordering::Relaxed)
    }

    /// Failed flushes since open.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }
}

impl Default for ChangeTracker {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_basics() {
        let tracker = ChangeTracker::new();
        assert!(!tracker.is_dirty());

        assert_eq!(tracker.mark_dirty(), 1);
        assert_eq!(tracker.mark_dirty(), 2);
        assert!(tracker.is_dirty());

        tracker.mark_flushed(2);
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn test_flush_of_older_snapshot_stays_dirty() {
        let tracker = ChangeTracker::new();
        let snapshot_gen = tracker.mark_dirty();
        tracker.mark_dirty(); // mutation lands while the flush is writing
        tracker.mark_flushed(snapshot_gen);
        assert!(tracker.is_dirty());
    }

    #[test]
    fn test_flushed_generation_is_monotonic() {
        let tracker = ChangeTracker::new();
        tracker.mark_dirty();
        tracker.mark_dirty();
        tracker.mark_flushed(2);
        tracker.mark_flushed(1);
        assert_eq!(tracker.flushed_generation(), 2);
    }

    #[test]
    fn test_stats() {
        let tracker = ChangeTracker::new();
        tracker.record_write();
        tracker.record_write();
        tracker.record_failure();
        assert_eq!(tracker.total_flushes(), 2);
        assert_eq!(tracker.failed_flushes(), 1);
    }
}
