// =============================================================================
// Yahoo Finance chart client — HistoricalSource over the public v8 chart API
// =============================================================================
//
// GET {base}/v8/finance/chart/{symbol}?range=..&interval=..
//
// The endpoint is unauthenticated but rejects requests without a browser-like
// User-Agent. Columns come back with `null` holes for halted or partial bars;
// they are passed through untouched and cleaned by the cache.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use tracing::{debug, instrument};

use crate::market_data::{HistoricalSource, RawChart};

pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Clone)]
pub struct YahooChartClient {
    base_url: String,
    client: reqwest::Client,
}

impl YahooChartClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "YahooChartClient initialised");

        Ok(Self { base_url, client })
    }

    /// GET /v8/finance/chart/{symbol}.
    #[instrument(skip(self), name = "yahoo::get_chart")]
    pub async fn get_chart(&self, symbol: &str, range: &str, interval: &str) -> Result<RawChart> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("range", range),
                ("interval", interval),
                ("includePrePost", "false"),
                ("events", "div,split"),
            ])
            .send()
            .await
            .context("GET /v8/finance/chart request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Yahoo GET /v8/finance/chart/{symbol} returned {status}");
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse chart response")?;

        let raw = parse_chart_body(&body)?;
        debug!(symbol, range, interval, rows = raw.timestamps.len(), "chart fetched");
        Ok(raw)
    }
}

#[async_trait]
impl HistoricalSource for YahooChartClient {
    async fn fetch(&self, symbol: &str, range: &str, interval: &str) -> Result<RawChart> {
        self.get_chart(symbol, range, interval).await
    }
}

impl std::fmt::Debug for YahooChartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YahooChartClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Extract the columnar rows from a chart response body.
///
/// Expected shape:
/// ```json
/// { "chart": { "result": [ { "timestamp": [..],
///     "indicators": { "quote": [ { "open": [..], "high": [..], "low": [..],
///                                  "close": [..], "volume": [..] } ] } } ] } }
/// ```
fn parse_chart_body(body: &serde_json::Value) -> Result<RawChart> {
    let result = body["chart"]["result"]
        .as_array()
        .and_then(|arr| arr.first())
        .context("chart response has no result")?;

    let timestamps = result["timestamp"]
        .as_array()
        .context("chart result has no timestamps")?
        .iter()
        .map(|v| v.as_i64().context("non-integer timestamp"))
        .collect::<Result<Vec<i64>>>()?;

    let quote = &result["indicators"]["quote"][0];
    if !quote.is_object() {
        anyhow::bail!("chart result has no quote block");
    }

    Ok(RawChart {
        timestamps,
        open: column(&quote["open"]),
        high: column(&quote["high"]),
        low: column(&quote["low"]),
        close: column(&quote["close"]),
        volume: column(&quote["volume"]),
    })
}

/// A missing column becomes empty; `null` cells become `None`.
fn column(val: &serde_json::Value) -> Vec<Option<f64>> {
    val.as_array()
        .map(|arr| arr.iter().map(serde_json::Value::as_f64).collect())
        .unwrap_or_default()
}
