// src/core/tasks/generation.rs

//! Per-worker generation counter (§9 "generational workers"). Each
//! start/stop cycle bumps a monotonic counter; a scheduled continuation
//! captures the generation at the time it was scheduled and is discarded if
//! the live generation has since moved on. This replaces "was my timer
//! cancelled" bookkeeping with an invariant checkable in constant time.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Generation(AtomicU64);

impl Generation {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Starts a new era, invalidating any continuation scheduled under a
    /// prior one. Returns the new generation.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// True if `captured` is still the live generation.
    pub fn is_current(&self, captured: u64) -> bool {
        captured == self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_invalidates_prior_generation() {
        let generation = Generation::new();
        let captured = generation.current();
        assert!(generation.is_current(captured));
        generation.bump();
        assert!(!generation.is_current(captured));
    }

    #[test]
    fn rapid_stop_start_only_trusts_latest_generation() {
        let generation = Generation::new();
        let first = generation.bump();
        let second = generation.bump();
        assert_ne!(first, second);
        assert!(generation.is_current(second));
        assert!(!generation.is_current(first));
    }
}
