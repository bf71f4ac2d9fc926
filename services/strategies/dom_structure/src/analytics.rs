//! Order-book analytics
//!
//! Derives the per-snapshot flow metrics consumed by the condition
//! evaluator from the top `depth_levels` of each side:
//!
//! - `obi`: bid share of visible depth, 0.5 for an empty book
//! - `imbalance_ratio`: `(bid - ask) / (bid + ask)`
//! - `ofi`: best-level order flow imbalance between consecutive snapshots
//! - `stacking_intensity_buy` / `_sell`: depth added since the oldest
//!   sample still inside the analytics window
//! - `fake_breakout_prob`: opposing depth share when the mid breaks the
//!   prior window range

use dom_types::{DomLevel, DomSnapshot};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;

/// Metric keys appended to the recent-metrics ring for quantile blending
pub const TRACKED_METRIC_KEYS: [&str; 4] = [
    "obi",
    "ofi",
    "stacking_intensity_buy",
    "stacking_intensity_sell",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DomMetrics {
    pub obi: f64,
    pub imbalance_ratio: f64,
    pub ofi: f64,
    pub stacking_intensity_buy: f64,
    pub stacking_intensity_sell: f64,
    pub fake_breakout_prob: f64,
}

impl Default for DomMetrics {
    fn default() -> Self {
        Self {
            obi: 0.5,
            imbalance_ratio: 0.0,
            ofi: 0.0,
            stacking_intensity_buy: 0.0,
            stacking_intensity_sell: 0.0,
            fake_breakout_prob: 0.0,
        }
    }
}

impl DomMetrics {
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "obi" => Some(self.obi),
            "imbalance_ratio" => Some(self.imbalance_ratio),
            "ofi" => Some(self.ofi),
            "stacking_intensity_buy" => Some(self.stacking_intensity_buy),
            "stacking_intensity_sell" => Some(self.stacking_intensity_sell),
            "fake_breakout_prob" => Some(self.fake_breakout_prob),
            _ => None,
        }
    }

    /// Tracked metrics as `(key, value)` pairs, finite values only
    pub fn tracked(&self) -> Vec<(&'static str, f64)> {
        TRACKED_METRIC_KEYS
            .iter()
            .filter_map(|key| self.get(key).filter(|v| v.is_finite()).map(|v| (*key, v)))
            .collect()
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("obi".into(), json!(self.obi));
        map.insert("imbalance_ratio".into(), json!(self.imbalance_ratio));
        map.insert("ofi".into(), json!(self.ofi));
        map.insert("stacking_intensity_buy".into(), json!(self.stacking_intensity_buy));
        map.insert("stacking_intensity_sell".into(), json!(self.stacking_intensity_sell));
        map.insert("fake_breakout_prob".into(), json!(self.fake_breakout_prob));
        map
    }
}

#[derive(Debug, Clone, Copy)]
struct BestLevels {
    bid_price: f64,
    bid_size: f64,
    ask_price: f64,
    ask_size: f64,
}

#[derive(Debug, Clone, Copy)]
struct DepthSample {
    timestamp: f64,
    bid_depth: f64,
    ask_depth: f64,
    mid_price: f64,
}

/// Stateful analytics processor, one per strategy instance
#[derive(Debug, Clone)]
pub struct DomAnalytics {
    depth_levels: usize,
    window_seconds: f64,
    previous_best: Option<BestLevels>,
    history: VecDeque<DepthSample>,
}

impl DomAnalytics {
    pub fn new(depth_levels: usize, window_seconds: f64) -> Self {
        Self {
            depth_levels: depth_levels.max(1),
            window_seconds: window_seconds.max(0.0),
            previous_best: None,
            history: VecDeque::new(),
        }
    }

    pub fn depth_levels(&self) -> usize {
        self.depth_levels
    }

    pub fn set_window_seconds(&mut self, window_seconds: f64) {
        self.window_seconds = window_seconds.max(0.0);
    }

    pub fn update(&mut self, snapshot: &DomSnapshot, mid_price: f64) -> DomMetrics {
        let timestamp = snapshot.timestamp_seconds();
        let bids = self.top(&snapshot.bids);
        let asks = self.top(&snapshot.asks);
        let bid_depth: f64 = bids.iter().map(|(_, size)| size).sum();
        let ask_depth: f64 = asks.iter().map(|(_, size)| size).sum();
        let total = bid_depth + ask_depth;

        let (obi, imbalance_ratio) = if total > 0.0 {
            (bid_depth / total, (bid_depth - ask_depth) / total)
        } else {
            (0.5, 0.0)
        };

        let current_best = match (bids.first(), asks.first()) {
            (Some(&(bid_price, bid_size)), Some(&(ask_price, ask_size))) => Some(BestLevels {
                bid_price,
                bid_size,
                ask_price,
                ask_size,
            }),
            _ => None,
        };
        let ofi = match (self.previous_best, current_best) {
            (Some(previous), Some(current)) => order_flow_imbalance(&previous, &current),
            _ => 0.0,
        };
        if current_best.is_some() {
            self.previous_best = current_best;
        }

        let cutoff = timestamp - self.window_seconds;
        while let Some(oldest) = self.history.front() {
            if oldest.timestamp >= cutoff {
                break;
            }
            self.history.pop_front();
        }

        let (stacking_intensity_buy, stacking_intensity_sell) = match self.history.front() {
            Some(oldest) => (
                (bid_depth - oldest.bid_depth).max(0.0),
                (ask_depth - oldest.ask_depth).max(0.0),
            ),
            None => (0.0, 0.0),
        };

        let prior_range = self.history.iter().fold(None, |range: Option<(f64, f64)>, sample| {
            Some(match range {
                Some((low, high)) => (low.min(sample.mid_price), high.max(sample.mid_price)),
                None => (sample.mid_price, sample.mid_price),
            })
        });
        let fake_breakout_prob = match prior_range {
            Some((_, high)) if mid_price > high && total > 0.0 => ask_depth / total,
            Some((low, _)) if mid_price < low && total > 0.0 => bid_depth / total,
            _ => 0.0,
        };

        self.history.push_back(DepthSample {
            timestamp,
            bid_depth,
            ask_depth,
            mid_price,
        });

        DomMetrics {
            obi,
            imbalance_ratio,
            ofi,
            stacking_intensity_buy,
            stacking_intensity_sell,
            fake_breakout_prob,
        }
    }

    fn top(&self, levels: &[DomLevel]) -> Vec<(f64, f64)> {
        levels
            .iter()
            .take(self.depth_levels)
            .map(|level| (level.price_f64(), level.size_f64().max(0.0)))
            .collect()
    }
}

/// Cont-Kukanov-Stoikov best-level contribution: bid flow minus ask flow.
fn order_flow_imbalance(previous: &BestLevels, current: &BestLevels) -> f64 {
    let bid_flow = if current.bid_price > previous.bid_price {
        current.bid_size
    } else if current.bid_price < previous.bid_price {
        -previous.bid_size
    } else {
        current.bid_size - previous.bid_size
    };
    let ask_flow = if current.ask_price < previous.ask_price {
        current.ask_size
    } else if current.ask_price > previous.ask_price {
        -previous.ask_size
    } else {
        current.ask_size - previous.ask_size
    };
    bid_flow - ask_flow
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn level(price: f64, size: u32) -> DomLevel {
        DomLevel::new(Decimal::try_from(price).unwrap(), Decimal::from(size))
    }

    fn snapshot(seconds: i64, bids: Vec<DomLevel>, asks: Vec<DomLevel>) -> DomSnapshot {
        DomSnapshot::new("ES", bids, asks, Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap())
    }

    #[test]
    fn test_empty_book_defaults() {
        let mut analytics = DomAnalytics::new(10, 10.0);
        let metrics = analytics.update(&snapshot(0, vec![], vec![]), 100.0);
        assert_eq!(metrics, DomMetrics::default());
    }

    #[test]
    fn test_imbalance_uses_top_levels_only() {
        let mut analytics = DomAnalytics::new(1, 10.0);
        let metrics = analytics.update(
            &snapshot(0, vec![level(100.0, 30), level(99.75, 500)], vec![level(100.25, 10)]),
            100.125,
        );
        assert_eq!(metrics.obi, 0.75);
        assert_eq!(metrics.imbalance_ratio, 0.5);
        assert_eq!(metrics.ofi, 0.0);
    }

    #[test]
    fn test_order_flow_imbalance_rules() {
        let mut analytics = DomAnalytics::new(5, 10.0);
        analytics.update(&snapshot(0, vec![level(100.0, 10)], vec![level(100.25, 10)]), 100.125);

        // Bid size grows at the same price, ask unchanged
        let same = analytics.update(&snapshot(1, vec![level(100.0, 16)], vec![level(100.25, 10)]), 100.125);
        assert_eq!(same.ofi, 6.0);

        // Bid steps up, ask lifted away to a higher price
        let up = analytics.update(&snapshot(2, vec![level(100.25, 4)], vec![level(100.5, 7)]), 100.375);
        assert_eq!(up.ofi, 4.0 + 10.0);
    }

    #[test]
    fn test_stacking_relative_to_window_start() {
        let mut analytics = DomAnalytics::new(5, 10.0);
        analytics.update(&snapshot(0, vec![level(100.0, 10)], vec![level(100.25, 20)]), 100.125);
        let metrics = analytics.update(&snapshot(5, vec![level(100.0, 35)], vec![level(100.25, 5)]), 100.125);
        assert_eq!(metrics.stacking_intensity_buy, 25.0);
        assert_eq!(metrics.stacking_intensity_sell, 0.0);

        // First sample leaves the window, baseline moves to t=5
        let later = analytics.update(&snapshot(12, vec![level(100.0, 40)], vec![level(100.25, 5)]), 100.125);
        assert_eq!(later.stacking_intensity_buy, 5.0);
    }

    #[test]
    fn test_fake_breakout_probability() {
        let mut analytics = DomAnalytics::new(5, 10.0);
        analytics.update(&snapshot(0, vec![level(100.0, 10)], vec![level(100.25, 10)]), 100.125);
        let breakout = analytics.update(&snapshot(1, vec![level(101.0, 10)], vec![level(101.25, 30)]), 101.125);
        assert_eq!(breakout.fake_breakout_prob, 0.75);

        let inside = analytics.update(&snapshot(2, vec![level(100.5, 10)], vec![level(100.75, 30)]), 100.625);
        assert_eq!(inside.fake_breakout_prob, 0.0);
    }
}
