// =============================================================================
// Simulated Feed — random-walk trades for development without a vendor key
// =============================================================================
//
// Speaks the same text protocol as the vendor socket: it honours
// subscribe/unsubscribe control messages and emits `{"type":"trade",...}`
// frames on a fixed tick for every subscribed symbol.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tokio::time::{interval_at, Instant, Interval};
use tracing::debug;

use crate::feed::{FeedConnection, LiveFeedSource};

const DEFAULT_START_PRICE: f64 = 100.0;
/// Largest relative move per tick.
const MAX_STEP: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct SimulatedFeed {
    tick: Duration,
    start_price: f64,
}

impl SimulatedFeed {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            start_price: DEFAULT_START_PRICE,
        }
    }

    pub fn with_start_price(mut self, price: f64) -> Self {
        self.start_price = price;
        self
    }
}

#[async_trait]
impl LiveFeedSource for SimulatedFeed {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        debug!(tick_ms = self.tick.as_millis() as u64, "simulated feed connected");
        Ok(Box::new(SimulatedConnection {
            prices: HashMap::new(),
            start_price: self.start_price,
            ticker: interval_at(Instant::now() + self.tick, self.tick),
            closed: false,
        }))
    }
}

#[derive(Deserialize)]
struct Control {
    #[serde(rename = "type")]
    kind: String,
    symbol: String,
}

struct SimulatedConnection {
    /// Subscribed symbols and their last price.
    prices: HashMap<String, f64>,
    start_price: f64,
    ticker: Interval,
    closed: bool,
}

impl SimulatedConnection {
    /// Advance every subscribed symbol one step and render the trade frame.
    fn next_batch(&mut self) -> String {
        let mut rng = rand::rng();
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut symbols: Vec<String> = self.prices.keys().cloned().collect();
        symbols.sort();

        let mut data = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let Some(price) = self.prices.get_mut(&symbol) else {
                continue;
            };
            let step = rng.random_range(-MAX_STEP..=MAX_STEP);
            *price = (*price * (1.0 + step)).max(0.01);
            let volume: u32 = rng.random_range(100..=1000);
            data.push(serde_json::json!({
                "s": symbol,
                "p": (*price * 100.0).round() / 100.0,
                "v": volume,
                "t": now_ms,
            }));
        }

        serde_json::json!({ "type": "trade", "data": data }).to_string()
    }
}

#[async_trait]
impl FeedConnection for SimulatedConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            anyhow::bail!("simulated feed is closed");
        }
        let control: Control = serde_json::from_str(&text)?;
        match control.kind.as_str() {
            "subscribe" => {
                let start = self.start_price;
                self.prices.entry(control.symbol).or_insert(start);
            }
            "unsubscribe" => {
                self.prices.remove(&control.symbol);
            }
            other => anyhow::bail!("unknown control message type {other:?}"),
        }
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        self.ticker.tick().await;
        Some(Ok(self.next_batch()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.prices.clear();
        Ok(())
    }
}
