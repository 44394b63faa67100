// =============================================================================
// Live channel wire protocol — tagged JSON frames
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::ChartError;
use crate::feed::TradeEvent;
use crate::market_data::SeriesColumns;
use crate::types::Timeframe;

/// Frames a client may send on the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    Ping,
}

/// Frames the server pushes on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Historical {
        symbol: String,
        timeframe: Timeframe,
        data: SeriesColumns,
    },
    Realtime {
        symbol: String,
        price: f64,
        volume: f64,
        timestamp: i64,
    },
    Subscribed {
        symbol: String,
    },
    Unsubscribed {
        symbol: String,
    },
    Pong {
        timestamp: i64,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn realtime(event: &TradeEvent) -> Self {
        Self::Realtime {
            symbol: event.symbol.clone(),
            price: event.price,
            volume: event.volume,
            timestamp: event.timestamp,
        }
    }

    pub fn error(err: &ChartError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.message().to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
