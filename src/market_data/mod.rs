pub mod cache;
pub mod candle;
pub mod gap_fill;
pub mod yahoo;

use async_trait::async_trait;

pub use cache::{CacheSettings, HistoricalCache};
pub use candle::{Candle, CandleKey, RawChart, Series, SeriesColumns};
pub use gap_fill::{fill_daily_gaps, FilledColumns};
pub use yahoo::YahooChartClient;

/// Vendor endpoint that returns raw OHLCV rows for a symbol.
///
/// Implementations may return ragged or partially-null columns; cleaning is
/// the cache's job. Transport failures and HTTP errors come back as `Err`.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch(&self, symbol: &str, range: &str, interval: &str) -> anyhow::Result<RawChart>;
}
