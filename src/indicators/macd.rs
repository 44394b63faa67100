// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   macd      = EMA(fast) - EMA(slow)
//   signal    = EMA(macd, signal_period)
//   histogram = macd - signal
//
// All three series are full-length and index-aligned with the input because
// the underlying EMA has no absent prefix.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{ChartError, ChartResult};
use crate::indicators::ema::calculate_ema;

/// Fast / slow / signal periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacdResult {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(prices: &[f64], params: MacdParams) -> ChartResult<MacdResult> {
    if params.fast == 0 || params.slow == 0 || params.signal == 0 {
        return Err(ChartError::invalid(format!(
            "MACD periods must be positive (fast={}, slow={}, signal={})",
            params.fast, params.slow, params.signal
        )));
    }

    let fast = calculate_ema(prices, params.fast)?;
    let slow = calculate_ema(prices, params.slow)?;

    let macd: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
    let signal = calculate_ema(&macd, params.signal)?;
    let histogram = macd.iter().zip(signal.iter()).map(|(m, s)| m - s).collect();

    Ok(MacdResult {
        macd,
        signal,
        histogram,
    })
}
