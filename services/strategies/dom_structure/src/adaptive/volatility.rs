//! Realised volatility estimator

use std::collections::VecDeque;

/// Weight of the newest reading in the long-run baseline
const BASELINE_ALPHA: f64 = 0.05;

/// Rolling realised volatility over a time window.
///
/// Volatility is the root mean square of relative mid-price returns
/// inside the window. A slow EWMA of that figure forms the baseline, and
/// the raw volatility scale is `volatility / baseline`.
#[derive(Debug, Clone)]
pub struct VolatilityEstimator {
    window_seconds: f64,
    samples: VecDeque<(f64, f64)>,
    volatility: f64,
    baseline: Option<f64>,
}

impl VolatilityEstimator {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds: window_seconds.max(0.0),
            samples: VecDeque::new(),
            volatility: 0.0,
            baseline: None,
        }
    }

    pub fn update(&mut self, price: f64, timestamp: f64) -> f64 {
        if !price.is_finite() || price <= 0.0 {
            return self.volatility;
        }
        let timestamp = match self.samples.back() {
            Some(&(last, _)) if timestamp < last => last,
            _ => timestamp,
        };
        self.samples.push_back((timestamp, price));
        self.evict(timestamp);

        self.volatility = self.realised();
        if self.volatility > 0.0 {
            self.baseline = Some(match self.baseline {
                Some(baseline) => baseline + BASELINE_ALPHA * (self.volatility - baseline),
                None => self.volatility,
            });
        }
        self.volatility
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

    fn realised(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let (sum, count) = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(&(_, previous), &(_, current))| (current - previous) / previous)
            .fold((0.0, 0usize), |(sum, count), ret| (sum + ret * ret, count + 1));
        (sum / count as f64).sqrt()
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Unbounded volatility scale; 1.0 until a baseline exists
    pub fn raw_scale(&self) -> f64 {
        match self.baseline {
            Some(baseline) if baseline > 0.0 => self.volatility / baseline,
            _ => 1.0,
        }
    }

    pub fn set_window_seconds(&mut self, window_seconds: f64) {
        self.window_seconds = window_seconds.max(0.0);
        if let Some(&(latest, _)) = self.samples.back() {
            self.evict(latest);
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.volatility = 0.0;
        self.baseline = None;
    }
}
