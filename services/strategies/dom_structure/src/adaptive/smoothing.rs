//! Exponential smoothing with a hysteresis gate

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothingRecord {
    pub raw: f64,
    pub smoothed: f64,
    /// The gate held the previous smoothed value
    pub hysteresis_applied: bool,
}

/// One smoothing step.
///
/// The first observation seeds `smoothed = raw`. Afterwards the smoothed
/// value moves by `factor * (raw - smoothed)` only when
/// `|raw - smoothed| >= hysteresis`; the gate compares against the previous
/// smoothed value, never the previous raw.
pub fn smooth_step(previous: Option<f64>, raw: f64, factor: f64, hysteresis: f64) -> SmoothingRecord {
    match previous {
        None => SmoothingRecord {
            raw,
            smoothed: raw,
            hysteresis_applied: false,
        },
        Some(smoothed) if (raw - smoothed).abs() >= hysteresis => SmoothingRecord {
            raw,
            smoothed: smoothed + factor * (raw - smoothed),
            hysteresis_applied: false,
        },
        Some(smoothed) => SmoothingRecord {
            raw,
            smoothed,
            hysteresis_applied: true,
        },
    }
}

/// Named smoothing records, one per threshold key
#[derive(Debug, Clone, Default)]
pub struct ThresholdSmoother {
    records: BTreeMap<String, SmoothingRecord>,
}

impl ThresholdSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smooth each `(key, raw)` pair. Non-finite raws are skipped and keep
    /// their previous record.
    pub fn smooth(
        &mut self,
        raws: &[(&str, f64)],
        factor: f64,
        hysteresis: f64,
    ) -> BTreeMap<String, SmoothingRecord> {
        let mut updated = BTreeMap::new();
        for &(key, raw) in raws {
            if !raw.is_finite() {
                continue;
            }
            let previous = self.records.get(key).map(|record| record.smoothed);
            let record = smooth_step(previous, raw, factor, hysteresis);
            self.records.insert(key.to_string(), record);
            updated.insert(key.to_string(), record);
        }
        updated
    }

    /// Force a key to `value` as if it had just been seeded
    pub fn seed(&mut self, key: &str, value: f64) {
        self.records.insert(
            key.to_string(),
            SmoothingRecord {
                raw: value,
                smoothed: value,
                hysteresis_applied: false,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&SmoothingRecord> {
        self.records.get(key)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
