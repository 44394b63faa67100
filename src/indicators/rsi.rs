// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Split into a gain series and a loss series (losses stored as
//          positive magnitudes, zero where the delta has the other sign).
// Step 3 — Smooth both with the first-value-seeded exponential recurrence,
//          span = period (alpha = 2 / (period + 1)), the same policy as EMA.
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// Output is index-aligned with the input closes. Index 0 has no delta and
// indices below `period` lack `period` deltas of history, so both are absent.
// Implementations that zero-seed the gain series and emit after `period`
// smoothed points (pandas `ewm(min_periods=period)`) start one bar earlier,
// at index `period - 1`; here the first value is at index `period`.
// =============================================================================

use crate::error::{ChartError, ChartResult};
use crate::indicators::ema::smooth;

/// Default look-back used when a caller does not supply one.
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Compute the RSI series for `prices`.
///
/// # Edge cases
/// - `period == 0` => `InvalidParameter`
/// - `prices.len() < period + 1` => every entry absent
/// - average loss zero, average gain positive => 100.0
/// - both averages zero (no movement) => absent, the ratio is undefined
pub fn calculate_rsi(prices: &[f64], period: usize) -> ChartResult<Vec<Option<f64>>> {
    if period == 0 {
        return Err(ChartError::invalid("RSI period must be positive"));
    }

    let mut out = vec![None; prices.len()];
    if prices.len() < period + 1 {
        return Ok(out);
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|&d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|&d| (-d).max(0.0)).collect();

    let alpha = 2.0 / (period as f64 + 1.0);
    let avg_gain = smooth(&gains, alpha);
    let avg_loss = smooth(&losses, alpha);

    // Delta j describes the move into price index j + 1.
    for j in (period - 1)..deltas.len() {
        out[j + 1] = rsi_from_averages(avg_gain[j], avg_loss[j]);
    }
    Ok(out)
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        return (avg_gain > 0.0).then_some(100.0);
    }
    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - 100.0 / (1.0 + rs);
    rsi.is_finite().then_some(rsi)
}
