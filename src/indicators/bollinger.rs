// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), where σ is the population standard deviation
// of the same rolling window. Every band is absent until the window is full.

use crate::error::{ChartError, ChartResult};
use crate::indicators::sma::calculate_sma;

pub const DEFAULT_BOLLINGER_PERIOD: usize = 20;
pub const DEFAULT_BOLLINGER_K: f64 = 2.0;

/// Index-aligned band series.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerResult {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Calculate rolling Bollinger Bands over the closing prices.
///
/// Returns `InvalidParameter` when `period == 0` or `num_std` is negative or
/// non-finite.
pub fn calculate_bollinger(
    closes: &[f64],
    period: usize,
    num_std: f64,
) -> ChartResult<BollingerResult> {
    if !num_std.is_finite() || num_std < 0.0 {
        return Err(ChartError::invalid(format!(
            "Bollinger std-dev multiplier must be a non-negative number, got {num_std}"
        )));
    }

    let middle = calculate_sma(closes, period)?;
    let mut upper = Vec::with_capacity(closes.len());
    let mut lower = Vec::with_capacity(closes.len());

    for (i, mid) in middle.iter().enumerate() {
        match mid {
            Some(m) => {
                let window = &closes[i + 1 - period..=i];
                let variance =
                    window.iter().map(|x| (x - m).powi(2)).sum::<f64>() / period as f64;
                let band = num_std * variance.sqrt();
                upper.push(Some(m + band));
                lower.push(Some(m - band));
            }
            None => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    Ok(BollingerResult {
        upper,
        middle,
        lower,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=25).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert_eq!(bb.upper.len(), 25);
        assert!(bb.middle[..19].iter().all(Option::is_none));
        assert!(bb.upper[..19].iter().all(Option::is_none));
        let (u, m, l) = (bb.upper[24].unwrap(), bb.middle[24].unwrap(), bb.lower[24].unwrap());
        assert!(u > m && m > l);
        assert!(((u - m) - (m - l)).abs() < 1e-10);
    }

    #[test]
    fn bollinger_population_std() {
        // Window [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, population σ = 2.
        let closes = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bb = calculate_bollinger(&closes, 8, 2.0).unwrap();
        assert!((bb.middle[7].unwrap() - 5.0).abs() < 1e-12);
        assert!((bb.upper[7].unwrap() - 9.0).abs() < 1e-12);
        assert!((bb.lower[7].unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bollinger_insufficient_data() {
        let bb = calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).unwrap();
        assert!(bb.upper.iter().chain(&bb.middle).chain(&bb.lower).all(Option::is_none));
    }

    #[test]
    fn bollinger_flat() {
        let bb = calculate_bollinger(&[100.0; 20], 20, 2.0).unwrap();
        assert_eq!(bb.upper[19], Some(100.0));
        assert_eq!(bb.lower[19], Some(100.0));
    }

    #[test]
    fn bollinger_rejects_bad_multiplier() {
        assert!(calculate_bollinger(&[1.0; 5], 3, -1.0).is_err());
        assert!(calculate_bollinger(&[1.0; 5], 3, f64::NAN).is_err());
        assert!(calculate_bollinger(&[1.0; 5], 0, 2.0).is_err());
    }
}
