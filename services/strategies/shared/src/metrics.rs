//! Strategy metrics collection

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Thread-safe metrics collector for strategies
#[derive(Debug)]
pub struct MetricsCollector {
    start_time: Instant,
    snapshots_processed: AtomicU64,
    snapshots_dropped: AtomicU64,
    signals_generated: AtomicU64,
    signals_suppressed: AtomicU64,
    model_failures: AtomicU64,
    errors: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            snapshots_processed: AtomicU64::new(0),
            snapshots_dropped: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            signals_suppressed: AtomicU64::new(0),
            model_failures: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn increment_processed(&self) {
        self.snapshots_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dropped(&self) {
        self.snapshots_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_signals(&self) {
        self.signals_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_suppressed(&self) {
        self.signals_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_model_failures(&self) {
        self.model_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> super::StrategyMetrics {
        super::StrategyMetrics {
            snapshots_processed: self.snapshots_processed.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            signals_suppressed: self.signals_suppressed.load(Ordering::Relaxed),
            model_failures: self.model_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let collector = MetricsCollector::new();
        collector.increment_processed();
        collector.increment_processed();
        collector.increment_dropped();
        collector.increment_suppressed();
        collector.increment_model_failures();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.snapshots_processed, 2);
        assert_eq!(metrics.snapshots_dropped, 1);
        assert_eq!(metrics.signals_generated, 0);
        assert_eq!(metrics.signals_suppressed, 1);
        assert_eq!(metrics.model_failures, 1);
    }
}
