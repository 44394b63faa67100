// =============================================================================
// Live Feed — upstream trade streams and their normalised events
// =============================================================================
//
// The adapter owns at most one upstream connection per symbol. Connections
// come from a `LiveFeedSource` (the vendor WebSocket, or the simulated walk
// used when no vendor key is configured). Parsed trades are pushed into a
// `TradeSink`, which is the subscription registry in production.
// =============================================================================

pub mod adapter;
pub mod finnhub;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChartResult;

pub use adapter::{FeedAdapter, FeedState};
pub use finnhub::FinnhubFeed;
pub use simulated::SimulatedFeed;

/// One normalised trade. `timestamp` is epoch milliseconds as sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: i64,
}

/// An open upstream connection carrying text frames.
#[async_trait]
pub trait FeedConnection: Send {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;

    /// Next text payload. `None` once the connection is closed.
    async fn next_text(&mut self) -> Option<anyhow::Result<String>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait LiveFeedSource: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn FeedConnection>>;
}

/// Receiver of normalised trades.
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn publish(&self, event: TradeEvent);

    /// The upstream for `symbol` went away on its own (not via `stop`).
    /// `generation` is the value `FeedControl::start` returned for it.
    fn feed_closed(&self, _symbol: &str, _generation: u64) {}
}

/// Start/stop surface the registry drives. Implemented by [`FeedAdapter`].
#[async_trait]
pub trait FeedControl: Send + Sync {
    /// Ensure a feed for `symbol` and return the generation of the running
    /// connection.
    async fn start(&self, symbol: &str, sink: Arc<dyn TradeSink>) -> ChartResult<u64>;
    async fn stop(&self, symbol: &str);
}

// ---------------------------------------------------------------------------
// Vendor wire format
// ---------------------------------------------------------------------------

pub fn subscribe_message(symbol: &str) -> String {
    control_message("subscribe", symbol)
}

pub fn unsubscribe_message(symbol: &str) -> String {
    control_message("unsubscribe", symbol)
}

fn control_message(kind: &str, symbol: &str) -> String {
    serde_json::json!({ "type": kind, "symbol": symbol }).to_string()
}

#[derive(Deserialize)]
struct TradeEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawTrade {
    s: String,
    p: f64,
    v: f64,
    t: i64,
}

/// Parse a vendor message into the trades it carries for `symbol`.
///
/// Expected shape:
/// ```json
/// { "type": "trade", "data": [ { "s": "AAPL", "p": 189.3, "v": 100, "t": 1700000000000 } ] }
/// ```
/// Anything else (pings, acks, other symbols, malformed entries) yields
/// nothing.
pub fn parse_trades(text: &str, symbol: &str) -> Vec<TradeEvent> {
    let Ok(envelope) = serde_json::from_str::<TradeEnvelope>(text) else {
        return Vec::new();
    };
    if envelope.kind != "trade" {
        return Vec::new();
    }

    envelope
        .data
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawTrade>(item).ok())
        .filter(|t| t.s == symbol && t.p.is_finite() && t.v.is_finite() && t.v >= 0.0)
        .map(|t| TradeEvent {
            symbol: t.s,
            price: t.p,
            volume: t.v,
            timestamp: t.t,
        })
        .collect()
}
