// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_0      = close_0
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The series is seeded with the first close, not with an SMA of the first
// `period` closes, so there is no absent prefix: a value exists for every
// input index. Chart consumers rely on this alignment; do not swap in an
// SMA-seeded or bias-adjusted variant.
// =============================================================================

use crate::error::{ChartError, ChartResult};

/// Compute the EMA series for `prices`, one value per input element.
///
/// # Edge cases
/// - `period == 0` => `InvalidParameter`
/// - empty input => empty vec
pub fn calculate_ema(prices: &[f64], period: usize) -> ChartResult<Vec<f64>> {
    if period == 0 {
        return Err(ChartError::invalid("EMA period must be positive"));
    }
    Ok(smooth(prices, 2.0 / (period as f64 + 1.0)))
}

/// First-value-seeded exponential recurrence with smoothing factor `alpha`.
///
/// Shared with RSI, which smooths gain / loss series with the same policy.
pub(crate) fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut iter = values.iter();

    let Some(&seed) = iter.next() else {
        return out;
    };
    out.push(seed);

    let mut prev = seed;
    for &v in iter {
        prev = v * alpha + prev * (1.0 - alpha);
        out.push(prev);
    }
    out
}
