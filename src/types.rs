// =============================================================================
// Shared request-level types: timeframes and indicator kinds
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChartError;

/// Chart timeframe selectable by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "1Y")]
    OneYear,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Self::OneDay,
        Self::OneWeek,
        Self::OneMonth,
        Self::OneYear,
    ];

    /// Upstream `range` parameter (how far back to fetch).
    pub fn range(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::OneWeek => "1mo",
            Self::OneMonth => "3mo",
            Self::OneYear => "1y",
        }
    }

    /// Upstream bar interval.
    pub fn interval(self) -> &'static str {
        match self {
            Self::OneDay => "5m",
            Self::OneWeek | Self::OneMonth => "1d",
            Self::OneYear => "1wk",
        }
    }

    /// Intraday bars move with the live session; they get the short cache TTL.
    pub fn is_intraday(self) -> bool {
        matches!(self, Self::OneDay)
    }

    pub fn has_daily_bars(self) -> bool {
        self.interval() == "1d"
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1D",
            Self::OneWeek => "1W",
            Self::OneMonth => "1M",
            Self::OneYear => "1Y",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::OneMonth
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s.trim())
            .ok_or_else(|| {
                ChartError::invalid(format!(
                    "invalid timeframe '{s}', must be one of: 1D, 1W, 1M, 1Y"
                ))
            })
    }
}

/// Technical indicator selectable by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Macd,
    Bollinger,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 5] = [
        Self::Sma,
        Self::Ema,
        Self::Rsi,
        Self::Macd,
        Self::Bollinger,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Rsi => "rsi",
            Self::Macd => "macd",
            Self::Bollinger => "bollinger",
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorKind {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| {
                ChartError::invalid(format!(
                    "invalid indicator '{s}', must be one of: sma, ema, rsi, macd, bollinger"
                ))
            })
    }
}

/// Normalise a client-supplied ticker: trimmed, upper-cased, non-empty.
pub fn normalize_symbol(raw: &str) -> Result<String, ChartError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ChartError::invalid("symbol must not be empty"));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | ':'))
    {
        return Err(ChartError::invalid(format!("invalid symbol '{raw}'")));
    }
    Ok(symbol)
}
