use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cheaply clonable boolean flag, cache-padded to avoid false sharing.
///
/// Used for the `busy`/`error`/`initialized` overlays of the application
/// state. Reads pair with writes via Acquire/Release so a flag observed by
/// a telemetry snapshot is never torn or reordered past the state it guards.
#[derive(Clone)]
#[repr(transparent)]
pub struct Flag(Arc<CachePadded<AtomicBool>>);

impl Flag {
    #[inline]
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(CachePadded::new(AtomicBool::new(initial))))
    }

    #[inline(always)]
    fn atomic(&self) -> &AtomicBool {
        &self.0
    }

    #[inline(always)]
    pub fn get(&self) -> bool {
        self.atomic().load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn set(&self, v: bool) {
        self.atomic().store(v, Ordering::Release)
    }

    #[inline(always)]
    pub fn raise(&self) {
        self.set(true);
    }

    #[inline(always)]
    pub fn clear(&self) {
        self.set(false);
    }

    /// Atomically flip `false -> true`. Returns whether this caller won.
    ///
    /// Two threads racing to raise the flag cannot both observe it low.
    #[inline]
    pub fn try_raise(&self) -> bool {
        self.atomic()
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag").field("value", &self.get()).finish()
    }
}
