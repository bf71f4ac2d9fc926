//! Price structure window and zone detection

use std::collections::VecDeque;

/// Zone of the structure window the mid price currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Support,
    Resistance,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Support => "support",
            Zone::Resistance => "resistance",
        }
    }

    /// Stacking metric that confirms a trade out of this zone
    pub fn stacking_key(&self) -> &'static str {
        match self {
            Zone::Support => "stacking_intensity_buy",
            Zone::Resistance => "stacking_intensity_sell",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-bounded buffer of `(timestamp, mid_price)` samples
#[derive(Debug, Clone)]
pub struct StructureWindow {
    window_seconds: f64,
    samples: VecDeque<(f64, f64)>,
}

impl StructureWindow {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds: window_seconds.max(0.0),
            samples: VecDeque::new(),
        }
    }

    /// Append a sample and evict everything older than the window.
    ///
    /// A timestamp earlier than the newest sample is recorded at the newest
    /// sample's time so the buffer stays ordered.
    pub fn record(&mut self, timestamp: f64, mid_price: f64) {
        let timestamp = match self.samples.back() {
            Some(&(last, _)) if timestamp < last => last,
            _ => timestamp,
        };
        self.samples.push_back((timestamp, mid_price));
        self.evict(timestamp);
    }

    fn evict(&mut self, latest: f64) {
        let cutoff = latest - self.window_seconds;
        while let Some(&(oldest, _)) = self.samples.front() {
            if oldest >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// `(min, max)` mid price over the window, `None` when empty
    pub fn extremes(&self) -> Option<(f64, f64)> {
        let mut prices = self.samples.iter().map(|&(_, price)| price);
        let first = prices.next()?;
        Some(prices.fold((first, first), |(low, high), price| (low.min(price), high.max(price))))
    }

    pub fn set_window_seconds(&mut self, window_seconds: f64) {
        self.window_seconds = window_seconds.max(0.0);
        if let Some(&(latest, _)) = self.samples.back() {
            self.evict(latest);
        }
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.samples.front().map(|&(timestamp, _)| timestamp)
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.samples.back().map(|&(timestamp, _)| timestamp)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Classify `mid_price` against the window extremes.
///
/// Support is checked first, so a single-sample window (where support and
/// resistance coincide) always resolves to support.
pub fn detect_zone(
    mid_price: f64,
    support: f64,
    resistance: f64,
    tolerance_ticks: f64,
    tick_size: f64,
) -> Option<Zone> {
    let tolerance = tolerance_ticks * tick_size;
    if mid_price <= support + tolerance {
        Some(Zone::Support)
    } else if mid_price >= resistance - tolerance {
        Some(Zone::Resistance)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_window_evicts_stale_samples() {
        let mut window = StructureWindow::new(10.0);
        window.record(0.0, 100.0);
        window.record(5.0, 101.0);
        window.record(10.0, 99.0);
        assert_eq!(window.len(), 3);
        assert_eq!(window.extremes(), Some((99.0, 101.0)));

        window.record(12.0, 100.5);
        assert_eq!(window.len(), 3);
        assert_eq!(window.oldest_timestamp(), Some(5.0));
    }

    #[test]
    fn test_out_of_order_timestamp_is_clamped() {
        let mut window = StructureWindow::new(10.0);
        window.record(20.0, 100.0);
        window.record(15.0, 102.0);
        assert_eq!(window.latest_timestamp(), Some(20.0));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_shrinking_window_evicts_immediately() {
        let mut window = StructureWindow::new(30.0);
        for t in 0..30 {
            window.record(t as f64, 100.0 + t as f64);
        }
        window.set_window_seconds(5.0);
        assert_eq!(window.oldest_timestamp(), Some(24.0));
        assert_eq!(window.extremes(), Some((124.0, 129.0)));
    }

    #[test]
    fn test_detect_zone() {
        // ES tick 0.25, two ticks of tolerance
        assert_eq!(detect_zone(100.25, 100.0, 102.0, 2.0, 0.25), Some(Zone::Support));
        assert_eq!(detect_zone(101.75, 100.0, 102.0, 2.0, 0.25), Some(Zone::Resistance));
        assert_eq!(detect_zone(101.0, 100.0, 102.0, 2.0, 0.25), None);
        assert_eq!(detect_zone(100.0, 100.0, 100.0, 0.0, 0.25), Some(Zone::Support));
    }

    #[test]
    fn test_empty_window_has_no_extremes() {
        let window = StructureWindow::new(10.0);
        assert!(window.is_empty());
        assert_eq!(window.extremes(), None);
    }

    proptest! {
        #[test]
        fn prop_window_never_retains_stale_entries(
            window_seconds in 1.0f64..60.0,
            steps in prop::collection::vec((0.0f64..5.0, 90.0f64..110.0), 1..200),
        ) {
            let mut window = StructureWindow::new(window_seconds);
            let mut now = 0.0;
            for (delta, price) in steps {
                now += delta;
                window.record(now, price);
                let oldest = window.oldest_timestamp().unwrap();
                prop_assert!(now - oldest <= window_seconds);
                let (low, high) = window.extremes().unwrap();
                prop_assert!(low <= price && price <= high);
            }
        }
    }
}
