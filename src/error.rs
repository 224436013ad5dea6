use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use crate::token::TokenError;

/// Errors surfaced by the relay to the HTTP layer.
///
/// Every variant maps to exactly one response status; nothing here is ever
/// rendered as a `200`.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Unknown origin profile: {0}")]
    UnknownProfile(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Upstream fetch failed: {0}")]
    UpstreamTransport(#[from] reqwest::Error),

    #[error("Upstream did not answer within {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Upstream returned {0}")]
    UpstreamStatus(StatusCode),

    #[error("Manifest could not be rewritten: {0}")]
    ManifestParse(String),

    #[error("Token bootstrap failed: {0}")]
    TokenBootstrap(#[from] TokenError),

    #[error("Extraction failed: {0}")]
    Extraction(String),
}

impl RelayError {
    /// HTTP status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingParameter(_)
            | RelayError::InvalidTarget(_)
            | RelayError::UnknownProfile(_) => StatusCode::BAD_REQUEST,
            RelayError::AccessDenied(_) => StatusCode::FORBIDDEN,
            RelayError::UpstreamTransport(_) | RelayError::UpstreamTimeout(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::UpstreamStatus(status) if status.is_client_error() => *status,
            RelayError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            RelayError::ManifestParse(_) => StatusCode::BAD_GATEWAY,
            RelayError::TokenBootstrap(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Extraction(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            RelayError::AccessDenied(reason) => {
                warn!(target: "relay::security", "Denied relay request: {}", reason);
            }
            _ if status.is_server_error() => error!("Relay error: {}", self),
            _ => warn!("Relay request rejected: {}", self),
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}\n", self),
        )
            .into_response()
    }
}

/// Result type used across the relay.
pub type Result<T> = std::result::Result<T, RelayError>;
