// =============================================================================
// Central Application State
// =============================================================================
//
// Process-scoped collaborators injected into every handler:
//   - the historical candle cache (single-flight, TTL-bounded),
//   - the feed adapter (one upstream connection per demanded symbol),
//   - the subscription registry (symbol → client connections).
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::feed::{FeedAdapter, LiveFeedSource};
use crate::market_data::{HistoricalCache, HistoricalSource};
use crate::registry::SubscriptionRegistry;

pub struct AppState {
    pub config: ServerConfig,
    pub cache: Arc<HistoricalCache>,
    pub feed: Arc<FeedAdapter>,
    pub registry: Arc<SubscriptionRegistry>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        historical: Arc<dyn HistoricalSource>,
        live: Arc<dyn LiveFeedSource>,
    ) -> Arc<Self> {
        let cache = Arc::new(HistoricalCache::new(historical, config.cache_settings()));
        let feed = Arc::new(FeedAdapter::new(live, config.connect_timeout()));
        let registry = SubscriptionRegistry::new(feed.clone());

        Arc::new(Self {
            config,
            cache,
            feed,
            registry,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Stop every live feed. Called once on process shutdown.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.feed.shutdown().await;
    }
}
