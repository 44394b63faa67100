// =============================================================================
// Error taxonomy — shared by the indicator engine, cache, feeds and API
// =============================================================================
//
// Every variant carries a human-readable message that is safe to hand to a
// client. Raw upstream errors are logged where they occur and are never copied
// into these messages.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChartError {
    /// Bad timeframe / indicator / period / symbol supplied by the caller.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Upstream returned nothing usable (or failed / timed out).
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// The feed adapter could not establish a live upstream connection.
    #[error("upstream connect failure: {0}")]
    UpstreamConnectFailure(String),

    /// A send to one client connection failed.
    #[error("delivery failure: {0}")]
    DeliveryFailure(String),
}

pub type ChartResult<T> = Result<T, ChartError>;

impl ChartError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::UpstreamConnectFailure(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::DeliveryFailure(msg.into())
    }

    /// Stable machine-readable kind, used in API and WebSocket error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::DataUnavailable(_) => "data_unavailable",
            Self::UpstreamConnectFailure(_) => "upstream_connect_failure",
            Self::DeliveryFailure(_) => "delivery_failure",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidParameter(m)
            | Self::DataUnavailable(m)
            | Self::UpstreamConnectFailure(m)
            | Self::DeliveryFailure(m) => m,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamConnectFailure(_) => StatusCode::BAD_GATEWAY,
            Self::DeliveryFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChartError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.message(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ChartError::invalid("x").kind(), "invalid_parameter");
        assert_eq!(ChartError::unavailable("x").kind(), "data_unavailable");
        assert_eq!(ChartError::connect("x").kind(), "upstream_connect_failure");
        assert_eq!(ChartError::delivery("x").kind(), "delivery_failure");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ChartError::invalid("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ChartError::unavailable("x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn display_includes_message() {
        let err = ChartError::invalid("period must be positive");
        assert_eq!(err.to_string(), "invalid parameter: period must be positive");
        assert_eq!(err.message(), "period must be positive");
    }
}
