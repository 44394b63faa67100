// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free transforms over a close-price series. Calculators
// work in full `f64` precision; rounding happens exactly once, in `compute`,
// when a result is packaged for emission. Rounding inside a recurrence would
// compound across every subsequent step.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use serde::Serialize;

use crate::error::ChartResult;
use crate::market_data::Series;
use crate::types::IndicatorKind;

pub use bollinger::{calculate_bollinger, DEFAULT_BOLLINGER_K, DEFAULT_BOLLINGER_PERIOD};
pub use ema::calculate_ema;
pub use macd::{calculate_macd, MacdParams};
pub use rsi::{calculate_rsi, DEFAULT_RSI_PERIOD};
pub use sma::calculate_sma;

/// Decimal places for price-scale outputs (SMA, EMA, Bollinger) and RSI.
pub const PRICE_DECIMALS: i32 = 2;
/// Decimal places for MACD-scale outputs.
pub const MACD_DECIMALS: i32 = 4;

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn round_all(values: &[f64], places: i32) -> Vec<f64> {
    values.iter().map(|&v| round_to(v, places)).collect()
}

fn round_opt(values: &[Option<f64>], places: i32) -> Vec<Option<f64>> {
    values.iter().map(|v| v.map(|v| round_to(v, places))).collect()
}

/// Moving-average window used when a request names no period.
pub const DEFAULT_MA_PERIOD: usize = 20;

/// Period a request falls back to when it names none.
pub fn default_period(kind: IndicatorKind) -> usize {
    match kind {
        IndicatorKind::Rsi => DEFAULT_RSI_PERIOD,
        IndicatorKind::Bollinger => DEFAULT_BOLLINGER_PERIOD,
        IndicatorKind::Sma | IndicatorKind::Ema | IndicatorKind::Macd => DEFAULT_MA_PERIOD,
    }
}

/// Parameters for one indicator request. `period` is ignored by MACD.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorParams {
    pub period: usize,
    pub macd: MacdParams,
    pub num_std: f64,
}

impl IndicatorParams {
    pub fn with_period(period: usize) -> Self {
        Self {
            period,
            macd: MacdParams::default(),
            num_std: DEFAULT_BOLLINGER_K,
        }
    }
}

/// Timestamp-aligned indicator output, already rounded for emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorData {
    Line {
        timestamps: Vec<i64>,
        values: Vec<Option<f64>>,
    },
    Macd {
        timestamps: Vec<i64>,
        macd: Vec<f64>,
        signal: Vec<f64>,
        histogram: Vec<f64>,
    },
    Bands {
        timestamps: Vec<i64>,
        upper: Vec<Option<f64>>,
        middle: Vec<Option<f64>>,
        lower: Vec<Option<f64>>,
    },
}

/// Run `kind` over the close projection of `series`.
pub fn compute(
    series: &Series,
    kind: IndicatorKind,
    params: IndicatorParams,
) -> ChartResult<IndicatorData> {
    let closes = series.closes();
    let timestamps = series.timestamps();

    let data = match kind {
        IndicatorKind::Sma => IndicatorData::Line {
            timestamps,
            values: round_opt(&calculate_sma(&closes, params.period)?, PRICE_DECIMALS),
        },
        IndicatorKind::Ema => IndicatorData::Line {
            timestamps,
            values: calculate_ema(&closes, params.period)?
                .into_iter()
                .map(|v| Some(round_to(v, PRICE_DECIMALS)))
                .collect(),
        },
        IndicatorKind::Rsi => IndicatorData::Line {
            timestamps,
            values: round_opt(&calculate_rsi(&closes, params.period)?, PRICE_DECIMALS),
        },
        IndicatorKind::Macd => {
            let r = calculate_macd(&closes, params.macd)?;
            IndicatorData::Macd {
                timestamps,
                macd: round_all(&r.macd, MACD_DECIMALS),
                signal: round_all(&r.signal, MACD_DECIMALS),
                histogram: round_all(&r.histogram, MACD_DECIMALS),
            }
        }
        IndicatorKind::Bollinger => {
            let r = calculate_bollinger(&closes, params.period, params.num_std)?;
            IndicatorData::Bands {
                timestamps,
                upper: round_opt(&r.upper, PRICE_DECIMALS),
                middle: round_opt(&r.middle, PRICE_DECIMALS),
                lower: round_opt(&r.lower, PRICE_DECIMALS),
            }
        }
    };
    Ok(data)
}
