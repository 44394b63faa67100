// =============================================================================
// Server Configuration — JSON file + environment overrides
// =============================================================================
//
// Resolution order: built-in defaults ← `server_config.json` (optional) ←
// environment variables. Every field carries a serde default so a partial
// file only overrides what it names.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::feed::finnhub::DEFAULT_FINNHUB_WS_URL;
use crate::market_data::yahoo::DEFAULT_YAHOO_BASE_URL;
use crate::market_data::CacheSettings;

pub const CONFIG_FILE: &str = "server_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_finnhub_ws_url() -> String {
    DEFAULT_FINNHUB_WS_URL.to_string()
}

fn default_yahoo_base_url() -> String {
    DEFAULT_YAHOO_BASE_URL.to_string()
}

fn default_historical_ttl_secs() -> u64 {
    86_400
}

fn default_intraday_ttl_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_cache_max_entries() -> usize {
    100
}

fn default_simulated_tick_millis() -> u64 {
    2_000
}

fn default_max_indicator_period() -> usize {
    200
}

fn default_client_buffer() -> usize {
    256
}

// =============================================================================
// ServerConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // --- Network ------------------------------------------------------------
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// CORS origins. A single `"*"` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    // --- Upstream vendors ---------------------------------------------------
    /// Vendor key for the live trade socket. Empty means simulated feed.
    #[serde(default)]
    pub finnhub_api_key: String,

    #[serde(default = "default_finnhub_ws_url")]
    pub finnhub_ws_url: String,

    #[serde(default = "default_yahoo_base_url")]
    pub yahoo_base_url: String,

    // --- Cache & timeouts ---------------------------------------------------
    #[serde(default = "default_historical_ttl_secs")]
    pub historical_ttl_secs: u64,

    /// TTL for the intraday (`1D`) timeframe.
    #[serde(default = "default_intraday_ttl_secs")]
    pub intraday_ttl_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    // --- Live channel -------------------------------------------------------
    /// Force the random-walk feed even when a vendor key is present.
    #[serde(default)]
    pub simulated_feed: bool,

    #[serde(default = "default_simulated_tick_millis")]
    pub simulated_tick_millis: u64,

    /// Outbound frames queued per client before it counts as stalled.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,

    // --- Indicators ---------------------------------------------------------
    #[serde(default = "default_max_indicator_period")]
    pub max_indicator_period: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowed_origins: default_allowed_origins(),
            finnhub_api_key: String::new(),
            finnhub_ws_url: default_finnhub_ws_url(),
            yahoo_base_url: default_yahoo_base_url(),
            historical_ttl_secs: default_historical_ttl_secs(),
            intraday_ttl_secs: default_intraday_ttl_secs(),
            fetch_timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_timeout_secs(),
            cache_max_entries: default_cache_max_entries(),
            simulated_feed: false,
            simulated_tick_millis: default_simulated_tick_millis(),
            client_buffer: default_client_buffer(),
            max_indicator_period: default_max_indicator_period(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing or unreadable file is an error so the caller can fall back
    /// to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read server config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse server config from {}", path.display()))?;

        info!(path = %path.display(), bind_addr = %config.bind_addr, "server config loaded");
        Ok(config)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unset or blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get("CANDLECAST_BIND_ADDR") {
            self.bind_addr = addr.trim().to_string();
        } else if let Some(port) = get("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got {port:?}"))?;
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.bind_addr = format!("{host}:{port}");
        }

        if let Some(key) = get("FINNHUB_API_KEY") {
            self.finnhub_api_key = key.trim().to_string();
        }

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(flag) = get("CANDLECAST_SIMULATED_FEED") {
            self.simulated_feed = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    /// Reject settings that would make the service misbehave.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("historical_ttl_secs", self.historical_ttl_secs),
            ("intraday_ttl_secs", self.intraday_ttl_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("simulated_tick_millis", self.simulated_tick_millis),
            ("cache_max_entries", self.cache_max_entries as u64),
            ("client_buffer", self.client_buffer as u64),
            ("max_indicator_period", self.max_indicator_period as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr must not be empty");
        }
        Ok(())
    }

    /// Whether live ticks come from the random-walk generator.
    pub fn use_simulated_feed(&self) -> bool {
        self.simulated_feed || self.finnhub_api_key.is_empty()
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            historical_ttl: Duration::from_secs(self.historical_ttl_secs),
            intraday_ttl: Duration::from_secs(self.intraday_ttl_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_entries: self.cache_max_entries,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn simulated_tick(&self) -> Duration {
        Duration::from_millis(self.simulated_tick_millis)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert_eq!(cfg.historical_ttl_secs, 86_400);
        assert_eq!(cfg.cache_max_entries, 100);
        assert_eq!(cfg.max_indicator_period, 200);
        assert!(cfg.use_simulated_feed());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "bind_addr": "127.0.0.1:9000", "finnhub_api_key": "k" }"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert!(!cfg.use_simulated_feed());
        assert_eq!(cfg.fetch_timeout_secs, 10);
        assert_eq!(cfg.allowed_origins, vec!["http://localhost:5173"]);
    }

    #[test]
    fn env_overrides() {
        let mut cfg = ServerConfig::default();
        cfg.apply_overrides(env(&[
            ("PORT", "9100"),
            ("FINNHUB_API_KEY", " abc "),
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
            ("CANDLECAST_SIMULATED_FEED", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9100");
        assert_eq!(cfg.finnhub_api_key, "abc");
        assert_eq!(cfg.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert!(cfg.use_simulated_feed());
    }

    #[test]
    fn bind_addr_beats_port() {
        let mut cfg = ServerConfig::default();
        cfg.apply_overrides(env(&[("CANDLECAST_BIND_ADDR", "127.0.0.1:7000"), ("PORT", "1")]))
            .unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:7000");
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.apply_overrides(env(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let cfg = ServerConfig {
            fetch_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ServerConfig {
            client_buffer: 0,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cache_settings_follow_config() {
        let cfg = ServerConfig {
            intraday_ttl_secs: 60,
            ..ServerConfig::default()
        };
        let settings = cfg.cache_settings();
        assert_eq!(settings.intraday_ttl, Duration::from_secs(60));
        assert_eq!(settings.max_entries, 100);
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(ServerConfig::load("/nonexistent/server_config.json").is_err());
    }
}
