//! Monotonic tick source.
//!
//! Grounded in `strata-transport`'s use of `quanta::Instant` for its hot
//! path: production code reads a `quanta::Clock`, tests drive a
//! [`TestClock`] they can advance deterministically instead of sleeping.

use crate::types::Ticks;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of monotonic 100-ns ticks.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Ticks;
}

/// Production clock backed by `quanta`, anchored at construction time so
/// `now()` returns small, human-debuggable tick values instead of raw
/// `Instant` bit patterns.
pub struct QuantaClock {
    inner: quanta::Clock,
    epoch: quanta::Instant,
}

impl fmt::Debug for QuantaClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantaClock").finish()
    }
}

impl Default for QuantaClock {
    fn default() -> Self {
        let inner = quanta::Clock::new();
        let epoch = inner.now();
        Self { inner, epoch }
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> Ticks {
        let elapsed = self.inner.now().saturating_duration_since(self.epoch);
        (elapsed.as_nanos() / 100) as Ticks
    }
}

/// Deterministic clock for tests: starts at tick 0, advances only when told to.
#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(0),
        })
    }

    pub fn advance(&self, ticks: Ticks) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set(&self, ticks: Ticks) {
        self.now.store(ticks, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Ticks {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let c = TestClock::new();
        assert_eq!(c.now(), 0);
        c.advance(100);
        assert_eq!(c.now(), 100);
        c.set(5);
        assert_eq!(c.now(), 5);
    }
}
