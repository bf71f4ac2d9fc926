//! Futures market constants
//!
//! Minimum price increments for the index and volatility futures the DOM
//! strategies trade. Unknown symbols use [`DEFAULT_TICK_SIZE`].

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Tick size applied to symbols missing from the table
pub const DEFAULT_TICK_SIZE: f64 = 0.25;

static TICK_SIZES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        // E-mini / Micro S&P 500 and Nasdaq-100
        ("ES", 0.25),
        ("MES", 0.25),
        ("NQ", 0.25),
        ("MNQ", 0.25),
        // E-mini / Micro Dow
        ("YM", 1.0),
        ("MYM", 1.0),
        // E-mini / Micro Russell 2000
        ("RTY", 0.1),
        ("M2K", 0.1),
        // VIX futures
        ("VX", 0.05),
    ])
});

/// Tick size for `symbol` (case-insensitive)
pub fn tick_size(symbol: &str) -> f64 {
    TICK_SIZES
        .get(symbol.trim().to_ascii_uppercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_TICK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_symbols() {
        assert_eq!(tick_size("es"), 0.25);
        assert_eq!(tick_size("MYM"), 1.0);
        assert_eq!(tick_size("M2K"), 0.1);
        assert_eq!(tick_size("VX"), 0.05);
        assert_eq!(tick_size("CL"), DEFAULT_TICK_SIZE);
    }
}
