// =============================================================================
// WebSocket Handler — live trade channel
// =============================================================================
//
// Clients connect to `/ws/:symbol?timeframe=1D` and receive:
//   1. A `historical` snapshot for the path symbol.
//   2. `subscribed`, then a stream of `realtime` frames until disconnect.
//
// Further client frames (`subscribe`, `unsubscribe`, `ping`) let one
// connection follow several symbols.
//
// Outbound frames go through a bounded per-connection queue drained by a
// writer task, so a broadcast never waits on a slow socket. A full queue
// counts as a failed delivery and the registry drops that subscriber.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::error::{ChartError, ChartResult};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::{ClientTransport, ConnectionId};
use crate::types::{normalize_symbol, Timeframe};

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
pub struct WsQuery {
    timeframe: Option<String>,
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
///
/// The symbol and timeframe are validated before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<WsQuery>,
) -> Response {
    let symbol = match normalize_symbol(&symbol) {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };
    let timeframe = match query.timeframe.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<Timeframe>() {
            Ok(tf) => tf,
            Err(e) => return e.into_response(),
        },
        None => Timeframe::OneDay,
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, symbol, timeframe))
        .into_response()
}

// =============================================================================
// Client transport
// =============================================================================

/// Registry-facing handle for one socket: a bounded queue into its writer.
pub struct ChannelTransport {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    fn enqueue(&self, msg: Message) -> ChartResult<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => ChartError::delivery("client outbound queue full"),
            TrySendError::Closed(_) => ChartError::delivery("client connection closed"),
        })
    }

    /// Queue a frame directly to this client, outside any broadcast.
    fn push(&self, frame: &ServerFrame) {
        let result = frame
            .to_json()
            .map_err(|e| ChartError::delivery(e.to_string()))
            .and_then(|json| self.enqueue(Message::Text(json)));
        if let Err(e) = result {
            debug!(conn = %self.id, error = %e, "direct frame dropped");
        }
    }
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, payload: &str) -> ChartResult<()> {
        self.enqueue(Message::Text(payload.to_owned()))
    }
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// A writer task drains the outbound queue into the socket while this task
/// reads client frames. Either side ending closes the connection, after which
/// every subscription it held is released.
async fn handle_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    symbol: String,
    timeframe: Timeframe,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.client_buffer);
    let client = Arc::new(ChannelTransport::new(tx));
    let id = client.id;
    info!(conn = %id, symbol = %symbol, timeframe = %timeframe, "live channel opened");

    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                debug!(error = %e, "WebSocket send failed, closing writer");
                break;
            }
        }
        let _ = sender.close().await;
    });

    follow(&state, &client, &symbol, timeframe).await;

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(conn = %id, "writer finished");
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&state, &client, &text, timeframe).await;
                }
                Some(Ok(Message::Ping(data))) => {
                    if client.enqueue(Message::Pong(data)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn = %id, "WebSocket closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn = %id, error = %e, "WebSocket receive error, disconnecting");
                    break;
                }
            },
        }
    }

    state.registry.disconnect(id).await;
    writer.abort();
    info!(conn = %id, "live channel closed");
}

/// Send the historical snapshot for `symbol`, then join its live stream.
///
/// Without a snapshot the symbol is not followed: the client gets an error
/// frame and the upstream feed is left alone.
async fn follow(state: &AppState, client: &Arc<ChannelTransport>, symbol: &str, timeframe: Timeframe) {
    match state.cache.get(symbol, timeframe).await {
        Ok(series) => client.push(&ServerFrame::Historical {
            symbol: symbol.to_string(),
            timeframe,
            data: series.to_columns(),
        }),
        Err(e) => {
            client.push(&ServerFrame::error(&e));
            return;
        }
    }

    let transport: Arc<dyn ClientTransport> = client.clone();
    match state.registry.subscribe(transport, symbol).await {
        Ok(()) => client.push(&ServerFrame::Subscribed {
            symbol: symbol.to_string(),
        }),
        Err(e) => client.push(&ServerFrame::error(&e)),
    }
}

async fn handle_client_frame(
    state: &AppState,
    client: &Arc<ChannelTransport>,
    text: &str,
    timeframe: Timeframe,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(conn = %client.id, error = %e, "unrecognised client frame");
            client.push(&ServerFrame::error(&ChartError::invalid(
                "unrecognised message; expected subscribe, unsubscribe or ping",
            )));
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { symbol } => match normalize_symbol(&symbol) {
            Ok(symbol) => follow(state, client, &symbol, timeframe).await,
            Err(e) => client.push(&ServerFrame::error(&e)),
        },
        ClientFrame::Unsubscribe { symbol } => match normalize_symbol(&symbol) {
            Ok(symbol) => {
                state.registry.unsubscribe(client.id, &symbol).await;
                client.push(&ServerFrame::Unsubscribed { symbol });
            }
            Err(e) => client.push(&ServerFrame::error(&e)),
        },
        ClientFrame::Ping => client.push(&ServerFrame::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }),
    }
}
