//! Per-request error taxonomy
//!
//! Every federation request failure falls into one of four classes, each
//! with its own HTTP status. `RetryRequested` is the only retriable one:
//! the offending credential is already gone from the cache, so the caller's
//! next attempt forces a fresh login.

use axum::http::StatusCode;
use thiserror::Error;

/// Failure classes for one `/federate` request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Caller input is incomplete or malformed. No downstream call happens.
    #[error("{0}")]
    BadRequest(String),

    /// The login exchange against the cluster's authorization endpoint
    /// failed, including unparseable redirects.
    #[error("authentication against {upstream} failed: {source}")]
    Unauthorized {
        upstream: String,
        source: cluster_auth::Error,
    },

    /// The cluster served its login page instead of metrics: the token was
    /// rejected in-band. The cached credential has been invalidated.
    #[error("credentials for {cluster} stopped working unexpectedly; invalidated, please retry")]
    RetryRequested { cluster: String },

    /// Network-level failure talking to the federation endpoint.
    #[error("federation endpoint unreachable: {0}")]
    UpstreamUnavailable(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ProxyError::RetryRequested { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable label for the JSON error envelope and logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::Unauthorized { .. } => "unauthorized",
            ProxyError::RetryRequested { .. } => "retry_requested",
            ProxyError::UpstreamUnavailable(_) => "upstream_error",
        }
    }
}

/// Result alias for request handling.
pub type Result<T> = std::result::Result<T, ProxyError>;
