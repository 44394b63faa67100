// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
//   SMA_i = (close_{i-period+1} + ... + close_i) / period      for i >= period-1
//
// Indices before the first full window are absent.
// =============================================================================

use crate::error::{ChartError, ChartResult};

/// Compute the SMA series, index-aligned with `prices`.
///
/// The output always has `prices.len()` entries; the first `period - 1` are
/// `None`. When the input is shorter than `period` every entry is `None`.
pub fn calculate_sma(prices: &[f64], period: usize) -> ChartResult<Vec<Option<f64>>> {
    if period == 0 {
        return Err(ChartError::invalid("SMA period must be positive"));
    }

    let mut out = vec![None; prices.len().min(period - 1)];
    out.extend(
        prices
            .windows(period)
            .map(|w| Some(w.iter().sum::<f64>() / period as f64)),
    );
    Ok(out)
}
