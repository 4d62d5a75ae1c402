//! InFlightGuard - single-slot exclusion for long-running operations
//!
//! Losers of the race are told "busy" once. Nothing is queued and nothing is
//! retried on their behalf.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct InFlightGuard {
    in_progress: AtomicBool,
}

impl InFlightGuard {
    pub const fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
        }
    }

    /// Transition idle -> busy. Returns true only for the caller that won.
    pub fn try_start(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition busy -> idle, whoever holds it.
    pub fn finish(&self) {
        self.in_progress.store(false, Ordering::Release);
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Like `try_start`, but hands back a permit that calls `finish` on drop,
    /// so early returns and cancelled futures cannot leave the guard stuck.
    pub fn try_acquire(&self) -> Option<InFlightPermit<'_>> {
        self.try_start().then_some(InFlightPermit { guard: self })
    }
}

/// Held while the guarded operation runs
#[derive(Debug)]
pub struct InFlightPermit<'a> {
    guard: &'a InFlightGuard,
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.finish();
    }
}
