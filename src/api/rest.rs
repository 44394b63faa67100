// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
//   GET  /health
//   GET  /api/historical_data?symbol=..&timeframe=1M[&fill_gaps=true]
//   GET  /api/indicators?symbol=..&indicator_type=..&period=..&timeframe=..
//   POST /api/indicators/advanced
//   GET  /ws/:symbol?timeframe=1D            (upgrade, see `ws`)
//
// Query parameters are taken as raw strings and validated here so every
// rejection carries the same `{kind, message}` body as the rest of the API.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::error::{ChartError, ChartResult};
use crate::indicators::{self, default_period, IndicatorData, IndicatorParams};
use crate::market_data::{fill_daily_gaps, FilledColumns, SeriesColumns};
use crate::types::{normalize_symbol, IndicatorKind, Timeframe};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/api/historical_data", get(historical_data))
        .route("/api/indicators", get(indicator))
        .route("/api/indicators/advanced", post(advanced_indicators))
        .route("/ws/:symbol", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(values))
}

// =============================================================================
// Parameter parsing
// =============================================================================

fn parse_symbol(raw: Option<&str>) -> ChartResult<String> {
    normalize_symbol(raw.unwrap_or_default())
}

fn parse_timeframe(raw: Option<&str>, default: Timeframe) -> ChartResult<Timeframe> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.parse(),
        None => Ok(default),
    }
}

fn parse_flag(name: &str, raw: Option<&str>) -> ChartResult<bool> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(ChartError::invalid(format!(
            "{name} must be true or false, got '{other}'"
        ))),
    }
}

/// Parse an optional window length bounded to `1..=max`.
fn parse_window(name: &str, raw: Option<&str>, max: usize) -> ChartResult<Option<usize>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let value: i64 = raw
        .parse()
        .map_err(|_| ChartError::invalid(format!("{name} must be an integer, got '{raw}'")))?;
    check_window(name, value, max).map(Some)
}

fn check_window(name: &str, value: i64, max: usize) -> ChartResult<usize> {
    if value < 1 || value as u64 > max as u64 {
        return Err(ChartError::invalid(format!(
            "{name} must be between 1 and {max}"
        )));
    }
    Ok(value as usize)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: String,
    uptime_secs: u64,
    active_symbols: Vec<String>,
    streaming: Vec<String>,
    cached_series: usize,
    upstream_fetches: u64,
    subscribers: BTreeMap<String, usize>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_symbols = state.registry.active_symbols();
    let subscribers = active_symbols
        .iter()
        .map(|symbol| (symbol.clone(), state.registry.subscriber_count(symbol)))
        .collect();
    Json(HealthResponse {
        status: "healthy",
        server_time: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        active_symbols,
        streaming: state.feed.streaming_symbols(),
        cached_series: state.cache.len(),
        upstream_fetches: state.cache.upstream_fetches(),
        subscribers,
    })
}

// =============================================================================
// Historical data
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoricalQuery {
    symbol: Option<String>,
    timeframe: Option<String>,
    fill_gaps: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Columns {
    Dense(SeriesColumns),
    Filled(FilledColumns),
}

#[derive(Debug, Serialize)]
struct HistoricalResponse {
    #[serde(rename = "type")]
    kind: &'static str,
    symbol: String,
    timeframe: Timeframe,
    data: Columns,
}

async fn historical_data(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoricalQuery>,
) -> ChartResult<Json<HistoricalResponse>> {
    let symbol = parse_symbol(q.symbol.as_deref())?;
    let timeframe = parse_timeframe(q.timeframe.as_deref(), Timeframe::OneMonth)?;
    let fill_gaps = parse_flag("fill_gaps", q.fill_gaps.as_deref())?;
    if fill_gaps && !timeframe.has_daily_bars() {
        return Err(ChartError::invalid(format!(
            "fill_gaps needs a daily-bar timeframe (1W or 1M), got {timeframe}"
        )));
    }

    let series = state.cache.get(&symbol, timeframe).await?;
    let data = if fill_gaps {
        Columns::Filled(fill_daily_gaps(&series))
    } else {
        Columns::Dense(series.to_columns())
    };
    debug!(symbol = %symbol, timeframe = %timeframe, bars = series.len(), fill_gaps, "historical served");

    Ok(Json(HistoricalResponse {
        kind: "historical",
        symbol,
        timeframe,
        data,
    }))
}

// =============================================================================
// Single indicator
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct IndicatorQuery {
    symbol: Option<String>,
    indicator_type: Option<String>,
    period: Option<String>,
    timeframe: Option<String>,
    fast: Option<String>,
    slow: Option<String>,
    signal: Option<String>,
    std_dev: Option<String>,
}

#[derive(Debug, Serialize)]
struct IndicatorResponse {
    symbol: String,
    indicator_type: IndicatorKind,
    period: usize,
    timeframe: Timeframe,
    data: IndicatorData,
}

async fn indicator(
    State(state): State<Arc<AppState>>,
    Query(q): Query<IndicatorQuery>,
) -> ChartResult<Json<IndicatorResponse>> {
    let max = state.config.max_indicator_period;
    let symbol = parse_symbol(q.symbol.as_deref())?;
    let kind: IndicatorKind = q
        .indicator_type
        .as_deref()
        .ok_or_else(|| ChartError::invalid("indicator_type is required"))?
        .parse()?;
    let timeframe = parse_timeframe(q.timeframe.as_deref(), Timeframe::OneMonth)?;
    let period = parse_window("period", q.period.as_deref(), max)?.unwrap_or(default_period(kind));

    let mut params = IndicatorParams::with_period(period);
    if let Some(fast) = parse_window("fast", q.fast.as_deref(), max)? {
        params.macd.fast = fast;
    }
    if let Some(slow) = parse_window("slow", q.slow.as_deref(), max)? {
        params.macd.slow = slow;
    }
    if let Some(signal) = parse_window("signal", q.signal.as_deref(), max)? {
        params.macd.signal = signal;
    }
    if let Some(raw) = q.std_dev.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        params.num_std = raw
            .parse()
            .map_err(|_| ChartError::invalid(format!("std_dev must be a number, got '{raw}'")))?;
    }

    let series = state.cache.get(&symbol, timeframe).await?;
    let data = indicators::compute(&series, kind, params)?;

    Ok(Json(IndicatorResponse {
        symbol,
        indicator_type: kind,
        period,
        timeframe,
        data,
    }))
}

// =============================================================================
// Multi-indicator request
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct IndicatorRequest {
    #[serde(rename = "type")]
    kind: String,
    period: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdvancedRequest {
    symbol: String,
    timeframe: Option<String>,
    #[serde(default)]
    indicators: Vec<IndicatorRequest>,
}

#[derive(Debug, Serialize)]
struct AdvancedResponse {
    symbol: String,
    timeframe: Timeframe,
    indicators: BTreeMap<&'static str, IndicatorData>,
}

/// Compute several indicators over one series. Results are keyed by type; a
/// type named twice keeps the last one.
async fn advanced_indicators(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AdvancedRequest>, JsonRejection>,
) -> ChartResult<Json<AdvancedResponse>> {
    let Json(req) =
        body.map_err(|e| ChartError::invalid(format!("invalid request body: {}", e.body_text())))?;
    let max = state.config.max_indicator_period;
    let symbol = normalize_symbol(&req.symbol)?;
    let timeframe = parse_timeframe(req.timeframe.as_deref(), Timeframe::OneYear)?;
    if req.indicators.is_empty() {
        return Err(ChartError::invalid("at least one indicator is required"));
    }

    let mut requested = Vec::with_capacity(req.indicators.len());
    for item in &req.indicators {
        let kind: IndicatorKind = item.kind.parse()?;
        let period = match item.period {
            Some(p) => check_window("period", p, max)?,
            None => default_period(kind),
        };
        requested.push((kind, IndicatorParams::with_period(period)));
    }

    let series = state.cache.get(&symbol, timeframe).await?;
    let mut out = BTreeMap::new();
    for (kind, params) in requested {
        out.insert(kind.as_str(), indicators::compute(&series, kind, params)?);
    }

    Ok(Json(AdvancedResponse {
        symbol,
        timeframe,
        indicators: out,
    }))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::feed::SimulatedFeed;
    use crate::market_data::{HistoricalSource, RawChart};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    pub(crate) const BARS: usize = 40;

    /// Daily bars on weekdays only; `FAIL` errors and `EMPTY` has no usable rows.
    pub(crate) struct FixtureSource;

    #[async_trait]
    impl HistoricalSource for FixtureSource {
        async fn fetch(&self, symbol: &str, _range: &str, _interval: &str) -> anyhow::Result<RawChart> {
            match symbol {
                "FAIL" => anyhow::bail!("upstream exploded: secret stack trace"),
                "EMPTY" => Ok(RawChart {
                    timestamps: vec![1, 2],
                    close: vec![None, None],
                    ..RawChart::default()
                }),
                _ => {
                    let mut raw = RawChart::default();
                    for i in 0..BARS as i64 {
                        let day = i + (i / 5) * 2;
                        let close = 100.0 + i as f64;
                        raw.timestamps.push(1_700_006_400 + day * 86_400);
                        raw.open.push(Some(close - 0.5));
                        raw.high.push(Some(close + 1.0));
                        raw.low.push(Some(close - 1.0));
                        raw.close.push(Some(close));
                        raw.volume.push(Some(1_000.0));
                    }
                    Ok(raw)
                }
            }
        }
    }

    pub(crate) fn test_state() -> Arc<AppState> {
        let config = ServerConfig::default();
        AppState::new(
            config,
            Arc::new(FixtureSource),
            Arc::new(SimulatedFeed::new(Duration::from_millis(10))),
        )
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read(resp).await
    }

    async fn post_json(uri: &str, body: Value) -> (StatusCode, Value) {
        let app = router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        read(app.oneshot(req).await.unwrap()).await
    }

    async fn read(resp: axum::response::Response) -> (StatusCode, Value) {
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["active_symbols"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn historical_returns_equal_length_columns() {
        let (status, body) = get_json("/api/historical_data?symbol=aapl&timeframe=1M").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "historical");
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["timeframe"], "1M");
        for col in ["timestamps", "open", "high", "low", "close", "volume"] {
            assert_eq!(body["data"][col].as_array().unwrap().len(), BARS, "{col}");
        }
    }

    #[tokio::test]
    async fn historical_fill_gaps_inserts_placeholders() {
        let (status, body) =
            get_json("/api/historical_data?symbol=AAPL&timeframe=1M&fill_gaps=true").await;
        assert_eq!(status, StatusCode::OK);
        let closes = body["data"]["close"].as_array().unwrap();
        // 7 weekends inside 40 weekday bars, two days each.
        assert_eq!(closes.len(), BARS + 14);
        assert!(closes[5].is_null());
        assert!(closes[6].is_null());
        assert_eq!(closes[7], 105.0);
    }

    #[tokio::test]
    async fn fill_gaps_rejected_for_intraday() {
        let (status, body) =
            get_json("/api/historical_data?symbol=AAPL&timeframe=1D&fill_gaps=true").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");
    }

    #[tokio::test]
    async fn historical_rejects_bad_parameters() {
        let (status, body) = get_json("/api/historical_data?symbol=AAPL&timeframe=5Y").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");

        let (status, _) = get_json("/api/historical_data?timeframe=1M").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upstream_failure_is_sanitised() {
        let (status, body) = get_json("/api/historical_data?symbol=FAIL").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "data_unavailable");
        assert!(!body["message"].as_str().unwrap().contains("secret"));

        let (status, body) = get_json("/api/historical_data?symbol=EMPTY").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "data_unavailable");
    }

    #[tokio::test]
    async fn sma_indicator() {
        let (status, body) =
            get_json("/api/indicators?symbol=AAPL&indicator_type=sma&period=3&timeframe=1M").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["indicator_type"], "sma");
        assert_eq!(body["period"], 3);
        let values = body["data"]["values"].as_array().unwrap();
        assert_eq!(values.len(), BARS);
        assert!(values[0].is_null() && values[1].is_null());
        assert_eq!(values[2], 101.0);
        assert_eq!(body["data"]["timestamps"].as_array().unwrap().len(), BARS);
    }

    #[tokio::test]
    async fn indicator_period_bounds() {
        for period in ["0", "201", "-3", "abc"] {
            let uri = format!("/api/indicators?symbol=AAPL&indicator_type=ema&period={period}");
            let (status, body) = get_json(&uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "period={period}");
            assert_eq!(body["kind"], "invalid_parameter");
        }
        let (status, _) =
            get_json("/api/indicators?symbol=AAPL&indicator_type=ema&period=200").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn macd_and_bollinger_shapes() {
        let (status, body) = get_json("/api/indicators?symbol=AAPL&indicator_type=MACD").await;
        assert_eq!(status, StatusCode::OK);
        for key in ["macd", "signal", "histogram"] {
            assert_eq!(body["data"][key].as_array().unwrap().len(), BARS);
        }

        let (status, body) =
            get_json("/api/indicators?symbol=AAPL&indicator_type=bollinger&period=5&std_dev=1.5")
                .await;
        assert_eq!(status, StatusCode::OK);
        let upper = body["data"]["upper"].as_array().unwrap();
        assert!(upper[3].is_null());
        assert!(upper[4].as_f64().unwrap() > body["data"]["middle"][4].as_f64().unwrap());
    }

    #[tokio::test]
    async fn unknown_indicator_rejected() {
        let (status, body) = get_json("/api/indicators?symbol=AAPL&indicator_type=vwap").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");
    }

    #[tokio::test]
    async fn advanced_keys_by_type() {
        let (status, body) = post_json(
            "/api/indicators/advanced",
            serde_json::json!({
                "symbol": "aapl",
                "indicators": [{ "type": "sma", "period": 5 }, { "type": "rsi" }, { "type": "macd" }]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timeframe"], "1Y");
        let indicators = body["indicators"].as_object().unwrap();
        assert_eq!(indicators.len(), 3);
        assert!(indicators["sma"]["values"][4].is_number());
        assert!(indicators["macd"]["histogram"].is_array());
    }

    #[tokio::test]
    async fn advanced_validates_entries() {
        let (status, _) = post_json(
            "/api/indicators/advanced",
            serde_json::json!({ "symbol": "AAPL", "indicators": [] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_json(
            "/api/indicators/advanced",
            serde_json::json!({ "symbol": "AAPL", "indicators": [{ "type": "sma", "period": 500 }] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");
    }

    #[tokio::test]
    async fn advanced_rejects_incomplete_body_with_error_shape() {
        let (status, body) = post_json("/api/indicators/advanced", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");
        assert!(body["message"].as_str().unwrap().contains("symbol"));
    }

    #[tokio::test]
    async fn advanced_rejects_malformed_json_with_error_shape() {
        let app = router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/api/indicators/advanced")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = read(app.oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");

        let app = router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/api/indicators/advanced")
            .body(Body::from(r#"{"symbol":"AAPL","indicators":[{"type":"sma"}]}"#))
            .unwrap();
        let (status, body) = read(app.oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_parameter");
    }

    #[tokio::test]
    async fn advanced_rsi_defaults_to_fourteen() {
        let (status, body) = post_json(
            "/api/indicators/advanced",
            serde_json::json!({ "symbol": "AAPL", "indicators": [{ "type": "rsi" }] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let values = body["indicators"]["rsi"]["values"].as_array().unwrap();
        assert!(values[13].is_null());
        assert!(values[14].is_number());
    }
}
