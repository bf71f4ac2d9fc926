//! Recent-metrics ring and empirical quantiles

use std::collections::{BTreeMap, VecDeque};

/// Bounded ring of metric maps; the oldest entry is evicted when full.
///
/// Entries are heterogeneous: a quantile over a key only considers the
/// entries that carry it.
#[derive(Debug, Clone)]
pub struct RecentMetrics {
    capacity: usize,
    entries: VecDeque<BTreeMap<String, f64>>,
}

impl RecentMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: BTreeMap<String, f64>) {
        if entry.is_empty() {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Shrinking keeps the newest entries
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn quantile(&self, key: &str, q: f64) -> Option<f64> {
        let values: Vec<f64> = self
            .entries
            .iter()
            .filter_map(|entry| entry.get(key).copied())
            .filter(|value| value.is_finite())
            .collect();
        empirical_quantile(values, q)
    }
}

/// Linear-interpolation quantile at position `q * (n - 1)` of the sorted
/// values. `q` is clamped to `[0, 1]`.
pub fn empirical_quantile(mut values: Vec<f64>, q: f64) -> Option<f64> {
    if values.is_empty() || !q.is_finite() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let position = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_empirical_quantile_interpolates() {
        let values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(empirical_quantile(values.clone(), 0.0), Some(1.0));
        assert_eq!(empirical_quantile(values.clone(), 0.5), Some(3.0));
        assert_eq!(empirical_quantile(values.clone(), 0.75), Some(4.0));
        assert_eq!(empirical_quantile(vec![0.0, 10.0], 0.25), Some(2.5));
        assert_eq!(empirical_quantile(Vec::new(), 0.5), None);
    }

    #[test]
    fn test_quantile_ignores_entries_without_key() {
        let mut recent = RecentMetrics::new(8);
        recent.push(entry(&[("ofi", 2.0)]));
        recent.push(entry(&[("mid_price", 100.0), ("volatility_scale", 1.0)]));
        recent.push(entry(&[("ofi", 6.0)]));

        assert_eq!(recent.quantile("ofi", 0.5), Some(4.0));
        assert_eq!(recent.quantile("obi", 0.5), None);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut recent = RecentMetrics::new(2);
        recent.push(entry(&[("obi", 0.1)]));
        recent.push(entry(&[("obi", 0.2)]));
        recent.push(entry(&[("obi", 0.3)]));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent.quantile("obi", 0.0), Some(0.2));

        recent.set_capacity(1);
        assert_eq!(recent.quantile("obi", 0.0), Some(0.3));
    }
}
