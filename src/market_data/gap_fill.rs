// =============================================================================
// Calendar gap filling — presentation-only transform
// =============================================================================
//
// Daily charts with a continuous calendar axis need a row for every day,
// including weekends and holidays. Bars are bucketed by their UTC calendar
// date; for each date missing between two adjacent bars a placeholder row
// with null OHLCV is inserted, stamped at that date's UTC midnight. Working
// on dates rather than raw second offsets keeps bars stamped at the session
// open (which shifts by an hour across daylight-saving changes) from losing
// or misplacing placeholder days.
//
// The output is built per request and never written back to the cache.
// =============================================================================

use chrono::{DateTime, NaiveDate};
use serde::Serialize;

use crate::market_data::Series;

/// Columnar series where placeholder rows carry `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilledColumns {
    pub timestamps: Vec<i64>,
    pub open: Vec<Option<f64>>,
    pub high: Vec<Option<f64>>,
    pub low: Vec<Option<f64>>,
    pub close: Vec<Option<f64>>,
    pub volume: Vec<Option<u64>>,
}

impl FilledColumns {
    fn push_bar(&mut self, timestamp: i64, ohlcv: Option<(f64, f64, f64, f64, u64)>) {
        self.timestamps.push(timestamp);
        self.open.push(ohlcv.map(|b| b.0));
        self.high.push(ohlcv.map(|b| b.1));
        self.low.push(ohlcv.map(|b| b.2));
        self.close.push(ohlcv.map(|b| b.3));
        self.volume.push(ohlcv.map(|b| b.4));
    }
}

fn utc_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}

fn midnight(date: NaiveDate) -> Option<i64> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp())
}

/// Insert null placeholder rows for missing calendar days.
///
/// A timestamp outside chrono's range leaves its neighbouring gap unfilled.
pub fn fill_daily_gaps(series: &Series) -> FilledColumns {
    let mut out = FilledColumns::default();
    let candles = series.candles();

    for (i, c) in candles.iter().enumerate() {
        out.push_bar(c.timestamp, Some((c.open, c.high, c.low, c.close, c.volume)));

        let Some(next) = candles.get(i + 1) else {
            continue;
        };
        let (Some(from), Some(to)) = (utc_date(c.timestamp), utc_date(next.timestamp)) else {
            continue;
        };

        let mut day = from.succ_opt();
        while let Some(date) = day.filter(|d| *d < to) {
            if let Some(ts) = midnight(date) {
                out.push_bar(ts, None);
            }
            day = date.succ_opt();
        }
    }
    out
}
