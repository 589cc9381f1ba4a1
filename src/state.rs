//! Shared mutable state for an open store.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, RwLock,
};

use crate::segment::Segment;

/// All mutable state shared between the public handle, the write pipeline,
/// and the compactor.
pub struct StoreState {
    /// Ordered segment set, oldest first. The active segment is always the
    /// last element; everything before it is frozen.
    pub segments: RwLock<Vec<Arc<Segment>>>,

    /// Counter feeding segment file names. Never reused within a directory.
    pub next_segment_id: AtomicU64,

    /// Set once close begins; mutations are rejected from then on.
    pub closed: AtomicBool,

    /// At most one compaction pass runs at a time.
    compaction_running: AtomicBool,
}

impl StoreState {
    pub fn new(segments: Vec<Arc<Segment>>, next_segment_id: u64) -> Self {
        Self {
            segments: RwLock::new(segments),
            next_segment_id: AtomicU64::new(next_segment_id),
            closed: AtomicBool::new(false),
            compaction_running: AtomicBool::new(false),
        }
    }

    /// Get the next segment ID atomically.
    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the store closed. Returns true if it already was.
    pub fn mark_closed(&self) -> bool {
        self.closed.swap(true, Ordering::SeqCst)
    }

    /// Try to start a compaction pass (returns a guard if none is running).
    pub fn try_start_compaction(&self) -> Option<CompactionGuard> {
        if !self.compaction_running.swap(true, Ordering::SeqCst) {
            Some(CompactionGuard { state: self })
        } else {
            None
        }
    }
}

/// RAII guard for a running compaction pass.
pub struct CompactionGuard<'a> {
    state: &'a StoreState,
}

impl Drop for CompactionGuard<'_> {
    fn drop(&mut self) {
        self.state.compaction_running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_ids_are_monotonic() {
        let state = StoreState::new(Vec::new(), 5);
        assert_eq!(state.next_segment_id(), 5);
        assert_eq!(state.next_segment_id(), 6);
        assert_eq!(state.next_segment_id(), 7);
    }

    #[test]
    fn test_compaction_guard_is_exclusive() {
        let state = StoreState::new(Vec::new(), 0);

        let guard = state.try_start_compaction();
        assert!(guard.is_some());
        assert!(state.try_start_compaction().is_none());

        drop(guard);
        assert!(state.try_start_compaction().is_some());
    }

    #[test]
    fn test_mark_closed_is_idempotent() {
        let state = StoreState::new(Vec::new(), 0);
        assert!(!state.is_closed());
        assert!(!state.mark_closed());
        assert!(state.mark_closed());
        assert!(state.is_closed());
    }
}
