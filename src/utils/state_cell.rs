use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free cell holding the application lifecycle state string.
///
/// Snapshot replacement goes through [`ArcSwap`], so a concurrent reader
/// always sees a complete state value, never a torn one. A sequence counter
/// lets observers detect transitions without comparing strings.
#[derive(Debug)]
pub struct StateCell {
    snap: ArcSwap<String>,
    seq: CachePadded<AtomicU64>,
}

impl StateCell {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            snap: ArcSwap::from(Arc::new(initial.into())),
            seq: CachePadded::new(AtomicU64::new(1)),
        }
    }

    /// Current state as an owned snapshot.
    #[inline]
    pub fn get(&self) -> Arc<String> {
        self.snap.load_full()
    }

    /// Replace the state and bump the sequence.
    #[inline]
    pub fn set(&self, next: impl Into<String>) {
        self.snap.store(Arc::new(next.into()));
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// Compare the current state against a candidate without cloning.
    #[inline]
    pub fn is(&self, state: &str) -> bool {
        self.snap.load().as_str() == state
    }

    /// Transition counter; increments on every `set`.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}
