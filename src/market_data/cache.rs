// =============================================================================
// Historical Candle Cache — TTL memoisation with single-flight fetches
// =============================================================================
//
// Each (symbol, timeframe) key owns a slot guarded by an async mutex. A `get`
// holds that slot's lock across the upstream fetch, so concurrent requests for
// the same missing/expired key queue behind one fetch and then read its
// result. Different keys never contend beyond the brief map lookup.
//
// Entries are replaced wholesale on refetch. Failed fetches are not cached.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ChartError, ChartResult};
use crate::market_data::{CandleKey, HistoricalSource, Series};
use crate::types::Timeframe;

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// TTL for daily / weekly bars.
    pub historical_ttl: Duration,
    /// TTL for intraday bars, which move with the live session.
    pub intraday_ttl: Duration,
    /// Ceiling on one upstream fetch; exceeding it is a fetch failure.
    pub fetch_timeout: Duration,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            historical_ttl: Duration::from_secs(86_400),
            intraday_ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(10),
            max_entries: 100,
        }
    }
}

struct CacheEntry {
    series: Series,
    fetched_at: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

pub struct HistoricalCache {
    source: Arc<dyn HistoricalSource>,
    settings: CacheSettings,
    slots: Mutex<HashMap<CandleKey, Slot>>,
    upstream_fetches: AtomicU64,
}

impl HistoricalCache {
    pub fn new(source: Arc<dyn HistoricalSource>, settings: CacheSettings) -> Self {
        Self {
            source,
            settings,
            slots: Mutex::new(HashMap::new()),
            upstream_fetches: AtomicU64::new(0),
        }
    }

    fn ttl_for(&self, timeframe: Timeframe) -> Duration {
        if timeframe.is_intraday() {
            self.settings.intraday_ttl
        } else {
            self.settings.historical_ttl
        }
    }

    /// Return the cached series for `(symbol, timeframe)` or fetch, validate
    /// and store it.
    pub async fn get(&self, symbol: &str, timeframe: Timeframe) -> ChartResult<Series> {
        let key = CandleKey::new(symbol, timeframe);
        let ttl = self.ttl_for(timeframe);
        let slot = self.slot(&key);

        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < ttl {
                debug!(key = %key, "cache hit");
                return Ok(entry.series.clone());
            }
        }

        let series = self.fetch(&key).await?;
        *guard = Some(CacheEntry {
            series: series.clone(),
            fetched_at: Instant::now(),
        });
        info!(key = %key, bars = series.len(), "historical series cached");
        Ok(series)
    }

    async fn fetch(&self, key: &CandleKey) -> ChartResult<Series> {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        let tf = key.timeframe;

        let request = self.source.fetch(&key.symbol, tf.range(), tf.interval());
        let raw = match timeout(self.settings.fetch_timeout, request).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "historical fetch failed");
                return Err(ChartError::unavailable(format!(
                    "stock data service temporarily unavailable for {}",
                    key.symbol
                )));
            }
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_ms = self.settings.fetch_timeout.as_millis() as u64,
                    "historical fetch timed out"
                );
                return Err(ChartError::unavailable(format!(
                    "timed out fetching data for {}",
                    key.symbol
                )));
            }
        };

        Series::from_raw(&key.symbol, &raw)
    }

    fn slot(&self, key: &CandleKey) -> Slot {
        let mut map = self.slots.lock();
        if let Some(slot) = map.get(key) {
            return slot.clone();
        }
        if map.len() >= self.settings.max_entries {
            let target = self.settings.max_entries.saturating_sub(1);
            Self::evict(&mut map, target, |tf| self.ttl_for(tf));
        }
        map.entry(key.clone()).or_default().clone()
    }

    /// Drop expired and empty slots nobody is using. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.slots.lock();
        let before = map.len();
        Self::evict(&mut map, usize::MAX, |tf| self.ttl_for(tf));
        before - map.len()
    }

    /// Remove idle slots: first every stale one, then the oldest fresh ones
    /// until at most `target` remain. A slot is idle when the map holds the
    /// only reference, which also means no fetch is in flight for it.
    fn evict(
        map: &mut HashMap<CandleKey, Slot>,
        target: usize,
        ttl_for: impl Fn(Timeframe) -> Duration,
    ) {
        let mut fresh: Vec<(CandleKey, Instant)> = Vec::new();
        map.retain(|key, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            match guard.as_ref() {
                Some(entry) if entry.fetched_at.elapsed() < ttl_for(key.timeframe) => {
                    fresh.push((key.clone(), entry.fetched_at));
                    true
                }
                _ => false,
            }
        });

        if map.len() <= target {
            return;
        }
        fresh.sort_by_key(|(_, at)| *at);
        let excess = map.len() - target;
        for (key, _) in fresh.into_iter().take(excess) {
            debug!(key = %key, "evicting cache entry for capacity");
            map.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of upstream fetches issued since start.
    pub fn upstream_fetches(&self) -> u64 {
        self.upstream_fetches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::RawChart;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Counts calls and optionally sleeps before answering.
    struct CountingSource {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HistoricalSource for CountingSource {
        async fn fetch(&self, _symbol: &str, _range: &str, _interval: &str) -> anyhow::Result<RawChart> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("HTTP 500 from upstream");
            }
            Ok(RawChart {
                timestamps: vec![100, 200, 300],
                open: vec![Some(1.0), Some(2.0), Some(3.0)],
                high: vec![Some(1.5), Some(2.5), Some(3.5)],
                low: vec![Some(0.5), Some(1.5), Some(2.5)],
                close: vec![Some(1.2), Some(2.2), Some(3.2)],
                volume: vec![Some(10.0), Some(20.0), Some(30.0)],
            })
        }
    }

    fn cache_with(source: Arc<CountingSource>, settings: CacheSettings) -> HistoricalCache {
        HistoricalCache::new(source, settings)
    }

    #[tokio::test]
    async fn second_get_within_ttl_hits_cache() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = cache_with(source.clone(), CacheSettings::default());

        let a = cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        let b = cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.upstream_fetches(), 1);
    }

    #[tokio::test]
    async fn concurrent_gets_collapse_into_one_fetch() {
        let source = CountingSource::new(Duration::from_millis(50));
        let cache = Arc::new(cache_with(source.clone(), CacheSettings::default()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("MSFT", Timeframe::OneWeek).await })
            })
            .collect();
        for t in futures_util::future::join_all(tasks).await {
            assert_eq!(t.unwrap().unwrap().len(), 3);
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_fetch_separately() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = cache_with(source.clone(), CacheSettings::default());
        cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        cache.get("AAPL", Timeframe::OneYear).await.unwrap();
        cache.get("TSLA", Timeframe::OneMonth).await.unwrap();
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let source = CountingSource::new(Duration::ZERO);
        let settings = CacheSettings {
            historical_ttl: Duration::ZERO,
            ..CacheSettings::default()
        };
        let cache = cache_with(source.clone(), settings);
        cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn intraday_uses_short_ttl() {
        let source = CountingSource::new(Duration::ZERO);
        let settings = CacheSettings {
            intraday_ttl: Duration::ZERO,
            ..CacheSettings::default()
        };
        let cache = cache_with(source.clone(), settings);
        cache.get("AAPL", Timeframe::OneDay).await.unwrap();
        cache.get("AAPL", Timeframe::OneDay).await.unwrap();
        cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn upstream_failure_is_unavailable_and_not_cached() {
        let source = CountingSource::failing();
        let cache = cache_with(source.clone(), CacheSettings::default());
        let err = cache.get("AAPL", Timeframe::OneMonth).await.unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");
        assert!(!err.message().contains("HTTP 500"));
        assert!(cache.get("AAPL", Timeframe::OneMonth).await.is_err());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let source = CountingSource::new(Duration::from_millis(500));
        let settings = CacheSettings {
            fetch_timeout: Duration::from_millis(20),
            ..CacheSettings::default()
        };
        let cache = cache_with(source, settings);
        let err = cache.get("AAPL", Timeframe::OneMonth).await.unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let source = CountingSource::new(Duration::ZERO);
        let settings = CacheSettings {
            max_entries: 2,
            ..CacheSettings::default()
        };
        let cache = cache_with(source.clone(), settings);
        cache.get("A", Timeframe::OneMonth).await.unwrap();
        cache.get("B", Timeframe::OneMonth).await.unwrap();
        cache.get("C", Timeframe::OneMonth).await.unwrap();
        assert_eq!(cache.len(), 2);

        // "A" was the oldest and must be fetched again.
        cache.get("A", Timeframe::OneMonth).await.unwrap();
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn purge_drops_expired_and_failed_slots() {
        let source = CountingSource::new(Duration::ZERO);
        let settings = CacheSettings {
            historical_ttl: Duration::ZERO,
            ..CacheSettings::default()
        };
        let cache = cache_with(source, settings);
        cache.get("AAPL", Timeframe::OneMonth).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 0);
    }
}
