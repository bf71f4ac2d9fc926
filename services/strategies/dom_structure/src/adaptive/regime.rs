//! Market regime classification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Calm,
    #[default]
    Normal,
    Volatile,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Calm, Regime::Normal, Regime::Volatile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Calm => "calm",
            Regime::Normal => "normal",
            Regime::Volatile => "volatile",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calm" => Ok(Regime::Calm),
            "normal" => Ok(Regime::Normal),
            "volatile" => Ok(Regime::Volatile),
            other => Err(format!("unknown regime '{}'", other)),
        }
    }
}

/// Volatile when either high breakpoint is exceeded, calm when both low
/// breakpoints are undercut, normal otherwise. Trend is compared on its
/// absolute value.
pub fn classify_regime(
    volatility_scale: f64,
    trend_score: f64,
    volatility_breakpoints: (f64, f64),
    trend_breakpoints: (f64, f64),
) -> Regime {
    let (vol_low, vol_high) = volatility_breakpoints;
    let (trend_low, trend_high) = trend_breakpoints;
    let trend = trend_score.abs();

    if volatility_scale > vol_high || trend > trend_high {
        Regime::Volatile
    } else if volatility_scale < vol_low && trend < trend_low {
        Regime::Calm
    } else {
        Regime::Normal
    }
}
