// =============================================================================
// Finnhub trade WebSocket — LiveFeedSource over tokio-tungstenite
// =============================================================================
//
// One socket per symbol: the adapter sends `{"type":"subscribe",...}` after
// connecting and `{"type":"unsubscribe",...}` before closing. Ping/pong
// frames are answered by tungstenite; only text frames reach the caller.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::feed::{FeedConnection, LiveFeedSource};

pub const DEFAULT_FINNHUB_WS_URL: &str = "wss://ws.finnhub.io";

pub struct FinnhubFeed {
    ws_url: String,
    api_key: String,
}

impl FinnhubFeed {
    pub fn new(ws_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}?token={}", self.ws_url.trim_end_matches('/'), self.api_key)
    }
}

impl std::fmt::Debug for FinnhubFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinnhubFeed")
            .field("ws_url", &self.ws_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl LiveFeedSource for FinnhubFeed {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        info!(url = %self.ws_url, "connecting to trade WebSocket");
        let (stream, _response) = connect_async(self.endpoint())
            .await
            .context("failed to connect to trade WebSocket")?;
        debug!(url = %self.ws_url, "trade WebSocket connected");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("failed to send on trade WebSocket")
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "trade WebSocket close frame");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "trade WebSocket read error");
                    return Some(Err(e.into()));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .context("failed to close trade WebSocket")
    }
}
