use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChartError, ChartResult};
use crate::types::Timeframe;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar. `timestamp` is epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Column-oriented rows exactly as an upstream chart API returns them.
/// Any cell may be missing and the columns may disagree in length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawChart {
    pub timestamps: Vec<i64>,
    pub open: Vec<Option<f64>>,
    pub high: Vec<Option<f64>>,
    pub low: Vec<Option<f64>>,
    pub close: Vec<Option<f64>>,
    pub volume: Vec<Option<f64>>,
}

/// Columnar projection served to clients. All columns have equal length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesColumns {
    pub timestamps: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Immutable, strictly time-ordered candle series for one (symbol, timeframe).
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    candles: Arc<[Candle]>,
}

impl Series {
    /// Wrap already-clean candles, checking ordering and finiteness.
    pub fn new(candles: Vec<Candle>) -> ChartResult<Self> {
        if let Some(w) = candles.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(ChartError::unavailable(format!(
                "series timestamps not strictly increasing at {}",
                w[1].timestamp
            )));
        }
        if let Some(c) = candles.iter().find(|c| !prices_finite(c)) {
            return Err(ChartError::unavailable(format!(
                "non-finite price in bar {}",
                c.timestamp
            )));
        }
        Ok(Self {
            candles: candles.into(),
        })
    }

    /// Clean upstream rows into a series.
    ///
    /// A row survives only when all five OHLCV cells are present and valid;
    /// short columns count as missing cells. Rows are dropped before any
    /// length comparison, so a ragged upstream payload still yields its
    /// complete rows. Rows that would break strict timestamp ordering are
    /// dropped too. Zero surviving rows is `DataUnavailable`.
    pub fn from_raw(symbol: &str, raw: &RawChart) -> ChartResult<Self> {
        let mut candles: Vec<Candle> = Vec::with_capacity(raw.timestamps.len());
        let mut dropped = 0usize;

        for (i, &timestamp) in raw.timestamps.iter().enumerate() {
            let row = (
                cell(&raw.open, i),
                cell(&raw.high, i),
                cell(&raw.low, i),
                cell(&raw.close, i),
                cell(&raw.volume, i),
            );
            let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = row else {
                dropped += 1;
                continue;
            };
            if volume < 0.0 {
                dropped += 1;
                continue;
            }
            if candles.last().is_some_and(|prev| prev.timestamp >= timestamp) {
                dropped += 1;
                continue;
            }
            candles.push(Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume: volume.round() as u64,
            });
        }

        if dropped > 0 {
            debug!(symbol, dropped, kept = candles.len(), "dropped incomplete rows");
        }
        if candles.is_empty() {
            return Err(ChartError::unavailable(format!(
                "no valid price data for {symbol}"
            )));
        }
        Self::new(candles)
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.candles.iter().map(|c| c.timestamp).collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn to_columns(&self) -> SeriesColumns {
        let n = self.candles.len();
        let mut cols = SeriesColumns {
            timestamps: Vec::with_capacity(n),
            open: Vec::with_capacity(n),
            high: Vec::with_capacity(n),
            low: Vec::with_capacity(n),
            close: Vec::with_capacity(n),
            volume: Vec::with_capacity(n),
        };
        for c in self.candles.iter() {
            cols.timestamps.push(c.timestamp);
            cols.open.push(c.open);
            cols.high.push(c.high);
            cols.low.push(c.low);
            cols.close.push(c.close);
            cols.volume.push(c.volume);
        }
        cols
    }
}

fn cell(col: &[Option<f64>], i: usize) -> Option<f64> {
    col.get(i).copied().flatten().filter(|v| v.is_finite())
}

fn prices_finite(c: &Candle) -> bool {
    [c.open, c.high, c.low, c.close].iter().all(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with(rows: &[(i64, Option<f64>)]) -> RawChart {
        RawChart {
            timestamps: rows.iter().map(|r| r.0).collect(),
            open: rows.iter().map(|r| r.1).collect(),
            high: rows.iter().map(|r| r.1.map(|v| v + 1.0)).collect(),
            low: rows.iter().map(|r| r.1.map(|v| v - 1.0)).collect(),
            close: rows.iter().map(|r| r.1).collect(),
            volume: rows.iter().map(|_| Some(1_000.0)).collect(),
        }
    }

    #[test]
    fn incomplete_rows_are_dropped_whole() {
        let raw = raw_with(&[(100, Some(10.0)), (200, None), (300, Some(12.0))]);
        let series = Series::from_raw("AAPL", &raw).unwrap();
        assert_eq!(series.timestamps(), vec![100, 300]);
        let cols = series.to_columns();
        assert_eq!(cols.open.len(), 2);
        assert_eq!(cols.volume, vec![1_000, 1_000]);
    }

    #[test]
    fn ragged_columns_keep_complete_prefix() {
        let mut raw = raw_with(&[(100, Some(10.0)), (200, Some(11.0)), (300, Some(12.0))]);
        raw.volume.truncate(2);
        let series = Series::from_raw("AAPL", &raw).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().timestamp, 200);
    }

    #[test]
    fn all_invalid_rows_is_unavailable() {
        let raw = raw_with(&[(100, None), (200, None)]);
        let err = Series::from_raw("AAPL", &raw).unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");
        assert!(Series::from_raw("AAPL", &RawChart::default()).is_err());
    }

    #[test]
    fn nan_and_negative_volume_rows_dropped() {
        let mut raw = raw_with(&[(100, Some(10.0)), (200, Some(f64::NAN)), (300, Some(12.0))]);
        raw.volume[2] = Some(-5.0);
        let series = Series::from_raw("AAPL", &raw).unwrap();
        assert_eq!(series.timestamps(), vec![100]);
    }

    #[test]
    fn duplicate_or_backwards_timestamps_dropped() {
        let raw = raw_with(&[(100, Some(10.0)), (100, Some(10.5)), (50, Some(9.0)), (200, Some(11.0))]);
        let series = Series::from_raw("AAPL", &raw).unwrap();
        assert_eq!(series.timestamps(), vec![100, 200]);
        assert_eq!(series.closes(), vec![10.0, 11.0]);
    }

    #[test]
    fn new_rejects_unordered() {
        let c = |t| Candle { timestamp: t, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0 };
        assert!(Series::new(vec![c(2), c(1)]).is_err());
        assert!(Series::new(vec![c(1), c(2)]).is_ok());
    }

    #[test]
    fn key_display() {
        let key = CandleKey::new("MSFT", Timeframe::OneYear);
        assert_eq!(key.to_string(), "MSFT@1Y");
    }
}
