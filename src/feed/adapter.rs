// =============================================================================
// Feed Adapter — one upstream connection per symbol
// =============================================================================
//
// State per symbol:
//
//   Idle ──start──▶ Connecting ──ok──▶ Streaming ──stop──▶ Closing ──▶ Idle
//                        └──fail──▶ Idle         └─remote close─▶ Idle
//
// Each connection gets a listener task that forwards parsed trades to the
// sink until told to stop or the remote end goes away. A generation number
// tags every slot so a finishing listener never removes a newer connection.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChartError, ChartResult};
use crate::feed::{
    parse_trades, subscribe_message, unsubscribe_message, FeedConnection, FeedControl,
    LiveFeedSource, TradeSink,
};

/// Upper bound on waiting for a listener to wind down before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Idle,
    Connecting,
    Streaming,
    Closing,
}

struct FeedSlot {
    state: FeedState,
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

type Slots = Arc<Mutex<HashMap<String, FeedSlot>>>;

pub struct FeedAdapter {
    source: Arc<dyn LiveFeedSource>,
    slots: Slots,
    next_generation: AtomicU64,
    connect_timeout: Duration,
}

impl FeedAdapter {
    pub fn new(source: Arc<dyn LiveFeedSource>, connect_timeout: Duration) -> Self {
        Self {
            source,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            connect_timeout,
        }
    }

    /// Current state for `symbol`; `Idle` when nothing is tracked.
    pub fn state(&self, symbol: &str) -> FeedState {
        self.slots
            .lock()
            .get(symbol)
            .map(|s| s.state)
            .unwrap_or(FeedState::Idle)
    }

    pub fn streaming_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, s)| s.state == FeedState::Streaming)
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }

    /// Open the upstream stream for `symbol` and return its generation.
    ///
    /// # Edge cases
    /// - Already `Connecting` or `Streaming`: no-op, returns the generation
    ///   already in place.
    /// - Connect or subscribe fails (or exceeds the connect timeout):
    ///   state returns to `Idle`, `UpstreamConnectFailure` is returned.
    pub async fn start(&self, symbol: &str, sink: Arc<dyn TradeSink>) -> ChartResult<u64> {
        let generation = {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get(symbol) {
                if matches!(slot.state, FeedState::Connecting | FeedState::Streaming) {
                    debug!(symbol = %symbol, state = ?slot.state, "feed already active");
                    return Ok(slot.generation);
                }
            }
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
            slots.insert(
                symbol.to_string(),
                FeedSlot {
                    state: FeedState::Connecting,
                    generation,
                    stop_tx: None,
                    task: None,
                },
            );
            generation
        };

        let conn = match self.open(symbol).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "upstream feed connect failed");
                release(&self.slots, symbol, generation);
                return Err(ChartError::connect(format!(
                    "could not open live feed for {symbol}"
                )));
            }
        };

        let mut slots = self.slots.lock();
        match slots.get_mut(symbol) {
            Some(slot) if slot.generation == generation && slot.state == FeedState::Connecting => {
                let (stop_tx, stop_rx) = oneshot::channel();
                slot.state = FeedState::Streaming;
                slot.stop_tx = Some(stop_tx);
                slot.task = Some(tokio::spawn(listen(
                    symbol.to_string(),
                    generation,
                    conn,
                    stop_rx,
                    sink,
                    Arc::clone(&self.slots),
                )));
                info!(symbol = %symbol, generation, "live feed streaming");
            }
            _ => {
                // Slot was torn down while connecting; the connection drops here.
                debug!(symbol = %symbol, generation, "feed superseded during connect");
            }
        }
        Ok(generation)
    }

    async fn open(&self, symbol: &str) -> anyhow::Result<Box<dyn FeedConnection>> {
        let mut conn = tokio::time::timeout(self.connect_timeout, self.source.connect())
            .await
            .context("connect timed out")??;
        if let Err(e) = conn.send_text(subscribe_message(symbol)).await {
            let _ = conn.close().await;
            return Err(e.context("subscribe failed"));
        }
        Ok(conn)
    }

    /// Close the upstream stream for `symbol`. Only acts on `Streaming`.
    ///
    /// The unsubscribe and close are best-effort; the state always ends at
    /// `Idle`.
    pub async fn stop(&self, symbol: &str) {
        let (generation, stop_tx, task) = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(symbol) else {
                return;
            };
            if slot.state != FeedState::Streaming {
                debug!(symbol = %symbol, state = ?slot.state, "stop ignored");
                return;
            }
            slot.state = FeedState::Closing;
            (slot.generation, slot.stop_tx.take(), slot.task.take())
        };

        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }
        if let Some(mut task) = task {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                warn!(symbol = %symbol, "feed listener did not stop in time, aborting");
                task.abort();
            }
        }
        release(&self.slots, symbol, generation);
        info!(symbol = %symbol, "live feed stopped");
    }

    /// Stop every streaming symbol. Used on process shutdown.
    pub async fn shutdown(&self) {
        for symbol in self.streaming_symbols() {
            self.stop(&symbol).await;
        }
    }
}

#[async_trait]
impl FeedControl for FeedAdapter {
    async fn start(&self, symbol: &str, sink: Arc<dyn TradeSink>) -> ChartResult<u64> {
        FeedAdapter::start(self, symbol, sink).await
    }

    async fn stop(&self, symbol: &str) {
        FeedAdapter::stop(self, symbol).await
    }
}

/// Drop the slot for `symbol` if it still belongs to `generation`.
fn release(slots: &Slots, symbol: &str, generation: u64) {
    let mut slots = slots.lock();
    if slots.get(symbol).is_some_and(|s| s.generation == generation) {
        slots.remove(symbol);
    }
}

async fn listen(
    symbol: String,
    generation: u64,
    mut conn: Box<dyn FeedConnection>,
    mut stop_rx: oneshot::Receiver<()>,
    sink: Arc<dyn TradeSink>,
    slots: Slots,
) {
    let stopped = loop {
        tokio::select! {
            _ = &mut stop_rx => break true,
            msg = conn.next_text() => match msg {
                Some(Ok(text)) => {
                    for event in parse_trades(&text, &symbol) {
                        sink.publish(event).await;
                    }
                }
                Some(Err(e)) => {
                    warn!(symbol = %symbol, error = %e, "live feed read error");
                    break false;
                }
                None => {
                    warn!(symbol = %symbol, "live feed ended by remote");
                    break false;
                }
            },
        }
    };

    if stopped {
        if let Err(e) = conn.send_text(unsubscribe_message(&symbol)).await {
            debug!(symbol = %symbol, error = %e, "unsubscribe failed (ignored)");
        }
    }
    if let Err(e) = conn.close().await {
        debug!(symbol = %symbol, error = %e, "close failed (ignored)");
    }

    release(&slots, &symbol, generation);
    if !stopped {
        sink.feed_closed(&symbol, generation);
    }
}
