// =============================================================================
// Subscription Registry — per-symbol fan-out with demand-driven feeds
// =============================================================================
//
// symbol ──▶ SymbolEntry { lifecycle lock, subscribers }
//
// Mutations for one symbol (subscribe, unsubscribe, feed start/stop) run under
// that symbol's async lifecycle lock, so the 0→1 and 1→0 transitions are
// serialised without blocking other symbols. Broadcasts never take the
// lifecycle lock: they snapshot the subscriber map and send concurrently.
//
// An entry whose last subscriber leaves is retired and dropped from the map.
// A caller that raced with retirement looks the symbol up again and gets a
// fresh entry.
// =============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ChartError, ChartResult};
use crate::feed::{FeedControl, TradeEvent, TradeSink};
use crate::protocol::ServerFrame;

/// Identity of one downstream client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection send primitive.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Deliver one serialised frame. An `Err` marks the connection dead.
    async fn send(&self, payload: &str) -> ChartResult<()>;
}

#[derive(Default)]
struct Lifecycle {
    /// Generation of the feed this entry started, while it is believed live.
    feed: Option<u64>,
    retired: bool,
}

#[derive(Default)]
struct SymbolEntry {
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    subscribers: RwLock<HashMap<ConnectionId, Arc<dyn ClientTransport>>>,
}

impl SymbolEntry {
    fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

pub struct SubscriptionRegistry {
    feed: Arc<dyn FeedControl>,
    symbols: RwLock<HashMap<String, Arc<SymbolEntry>>>,
    this: Weak<SubscriptionRegistry>,
}

impl SubscriptionRegistry {
    pub fn new(feed: Arc<dyn FeedControl>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            feed,
            symbols: RwLock::new(HashMap::new()),
            this: this.clone(),
        })
    }

    fn entry(&self, symbol: &str) -> Arc<SymbolEntry> {
        if let Some(entry) = self.symbols.read().get(symbol) {
            return Arc::clone(entry);
        }
        let mut symbols = self.symbols.write();
        Arc::clone(symbols.entry(symbol.to_string()).or_default())
    }

    fn lookup(&self, symbol: &str) -> Option<Arc<SymbolEntry>> {
        self.symbols.read().get(symbol).cloned()
    }

    /// Add `conn` to `symbol`'s subscribers, starting the upstream feed on the
    /// first one.
    ///
    /// # Edge cases
    /// - Subscribing the same connection twice keeps a single membership.
    /// - If the feed cannot be started the new membership is rolled back and
    ///   the error is returned; existing subscribers are untouched.
    pub async fn subscribe(&self, conn: Arc<dyn ClientTransport>, symbol: &str) -> ChartResult<()> {
        let sink: Arc<dyn TradeSink> = match self.this.upgrade() {
            Some(registry) => registry as Arc<dyn TradeSink>,
            None => return Err(ChartError::unavailable("registry is shutting down")),
        };
        let id = conn.id();

        loop {
            let entry = self.entry(symbol);
            let mut life = entry.lifecycle.lock().await;
            if life.retired {
                continue;
            }

            let newly_added = entry.subscribers.write().insert(id, conn.clone()).is_none();
            if life.feed.is_some() {
                debug!(symbol = %symbol, conn = %id, newly_added, "subscribed");
                return Ok(());
            }

            match self.feed.start(symbol, Arc::clone(&sink)).await {
                Ok(generation) => {
                    life.feed = Some(generation);
                    info!(symbol = %symbol, conn = %id, generation, "subscribed, live feed started");
                    return Ok(());
                }
                Err(e) => {
                    if newly_added {
                        entry.subscribers.write().remove(&id);
                    }
                    if entry.is_empty() {
                        self.retire(symbol, &entry, &mut life).await;
                    }
                    warn!(symbol = %symbol, conn = %id, error = %e, "subscribe failed");
                    return Err(e);
                }
            }
        }
    }

    /// Remove `id` from `symbol`'s subscribers, stopping the feed when the set
    /// empties. Returns whether the connection was subscribed.
    pub async fn unsubscribe(&self, id: ConnectionId, symbol: &str) -> bool {
        let Some(entry) = self.lookup(symbol) else {
            return false;
        };
        let mut life = entry.lifecycle.lock().await;
        if life.retired {
            return false;
        }

        let removed = entry.subscribers.write().remove(&id).is_some();
        if entry.is_empty() {
            self.retire(symbol, &entry, &mut life).await;
        }
        debug!(symbol = %symbol, conn = %id, removed, "unsubscribed");
        removed
    }

    /// Implicit unsubscribe of `id` from every symbol, on connection close.
    pub async fn disconnect(&self, id: ConnectionId) {
        let symbols: Vec<String> = self
            .symbols
            .read()
            .iter()
            .filter(|(_, entry)| entry.subscribers.read().contains_key(&id))
            .map(|(symbol, _)| symbol.clone())
            .collect();

        for symbol in &symbols {
            self.unsubscribe(id, symbol).await;
        }
        debug!(conn = %id, symbols = symbols.len(), "connection released");
    }

    /// Deliver `event` to every current subscriber of its symbol.
    ///
    /// Sends run concurrently over a point-in-time snapshot. A failed send
    /// drops that connection from the symbol and does not affect the rest.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, event: &TradeEvent) -> usize {
        let Some(entry) = self.lookup(&event.symbol) else {
            return 0;
        };
        let targets: Vec<Arc<dyn ClientTransport>> =
            entry.subscribers.read().values().cloned().collect();
        if targets.is_empty() {
            return 0;
        }

        let payload = match ServerFrame::realtime(event).to_json() {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %event.symbol, error = %e, "failed to serialise trade");
                return 0;
            }
        };

        let results = join_all(targets.iter().map(|t| {
            let payload = payload.as_str();
            async move { (t.id(), t.send(payload).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(symbol = %event.symbol, conn = %id, error = %e, "delivery failed, dropping subscriber");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let now_empty = {
                let mut subs = entry.subscribers.write();
                for id in &failed {
                    subs.remove(id);
                }
                subs.is_empty()
            };
            // Runs detached: the caller may be the feed listener that a stop
            // would wait on.
            if now_empty {
                self.release_later(&event.symbol);
            }
        }
        delivered
    }

    fn release_later(&self, symbol: &str) {
        let Some(registry) = self.this.upgrade() else {
            return;
        };
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            registry.release_if_idle(&symbol).await;
        });
    }

    async fn release_if_idle(&self, symbol: &str) {
        let Some(entry) = self.lookup(symbol) else {
            return;
        };
        let mut life = entry.lifecycle.lock().await;
        if !life.retired && entry.is_empty() {
            self.retire(symbol, &entry, &mut life).await;
        }
    }

    /// Stop the feed if running, mark the entry dead and drop it from the map.
    async fn retire(&self, symbol: &str, entry: &Arc<SymbolEntry>, life: &mut Lifecycle) {
        if life.feed.take().is_some() {
            self.feed.stop(symbol).await;
            info!(symbol = %symbol, "last subscriber left, live feed stopped");
        }
        life.retired = true;

        let mut symbols = self.symbols.write();
        if symbols.get(symbol).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            symbols.remove(symbol);
        }
    }

    /// Forget the feed of `generation`. A notice for any other generation is
    /// stale: its feed was already stopped and possibly replaced.
    async fn mark_feed_closed(&self, symbol: &str, generation: u64) {
        let Some(entry) = self.lookup(symbol) else {
            return;
        };
        let mut life = entry.lifecycle.lock().await;
        if life.retired || life.feed != Some(generation) {
            debug!(symbol = %symbol, generation, current = ?life.feed, "stale feed-closed notice ignored");
            return;
        }
        life.feed = None;
        let remaining = entry.subscribers.read().len();
        warn!(symbol = %symbol, generation, remaining, "live feed closed upstream; next subscribe restarts it");
    }

    /// Symbols with at least one subscriber, sorted.
    pub fn active_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .symbols
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        out.sort();
        out
    }

    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.lookup(symbol)
            .map(|entry| entry.subscribers.read().len())
            .unwrap_or(0)
    }

    /// Drop every subscription and stop every feed. Used on process shutdown.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Arc<SymbolEntry>)> = self
            .symbols
            .read()
            .iter()
            .map(|(s, e)| (s.clone(), Arc::clone(e)))
            .collect();

        for (symbol, entry) in entries {
            let mut life = entry.lifecycle.lock().await;
            if life.retired {
                continue;
            }
            entry.subscribers.write().clear();
            self.retire(&symbol, &entry, &mut life).await;
        }
        info!("subscription registry shut down");
    }
}

#[async_trait]
impl TradeSink for SubscriptionRegistry {
    async fn publish(&self, event: TradeEvent) {
        self.broadcast(&event).await;
    }

    fn feed_closed(&self, symbol: &str, generation: u64) {
        let Some(registry) = self.this.upgrade() else {
            return;
        };
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            registry.mark_feed_closed(&symbol, generation).await;
        });
    }
}
