//! Monotonic clock abstraction
//!
//! Gating decisions (throttle, cooldown, model refresh) run on a monotonic
//! clock expressed in fractional seconds. Production code uses
//! [`SystemClock`]; tests drive time explicitly with [`ManualClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

pub trait MonotonicClock: Send + Sync {
    /// Seconds since an arbitrary fixed origin. Never decreases.
    fn now(&self) -> f64;
}

/// Process clock backed by `Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock();
        *now += seconds.max(0.0);
    }

    pub fn set(&self, seconds: f64) {
        let mut now = self.now.lock();
        if seconds > *now {
            *now = seconds;
        }
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared_and_monotonic() {
        let clock = ManualClock::new(10.0);
        let shared = clock.clone();
        clock.advance(2.5);
        assert_eq!(shared.now(), 12.5);

        shared.set(5.0);
        assert_eq!(clock.now(), 12.5);
        clock.advance(-1.0);
        assert_eq!(clock.now(), 12.5);
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}
