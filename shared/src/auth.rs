//! Shared-secret authentication for inbound requests.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::http::text_response;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";
pub const MISSING_KEY_MESSAGE: &str = "API Key was not provided";
pub const INVALID_KEY_MESSAGE: &str = "Unauthorized client";

/// Outcome of checking a request against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Path is on the allow-list; no header required
    Bypass,
    Accepted,
    MissingKey,
    InvalidKey,
}

/// Request filter that requires the shared secret on every non-public path.
#[derive(Clone)]
pub struct AuthGate {
    api_key: Arc<str>,
}

impl AuthGate {
    pub fn new(api_key: impl Into<Arc<str>>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Paths that never require the shared secret.
    pub fn is_public_path(path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        path == "/"
            || path.starts_with("/health")
            || path.starts_with("/swagger")
            || path.starts_with("/_framework")
            || path.starts_with("/index.html")
            || path == "/favicon.ico"
    }

    /// Decide whether a request may proceed.
    ///
    /// The header value is compared byte-for-byte against the configured key.
    pub fn check(&self, path: &str, provided: Option<&[u8]>) -> AuthDecision {
        if Self::is_public_path(path) {
            return AuthDecision::Bypass;
        }

        match provided {
            None => AuthDecision::MissingKey,
            Some(value) if value == self.api_key.as_bytes() => AuthDecision::Accepted,
            Some(_) => AuthDecision::InvalidKey,
        }
    }
}

/// Axum middleware applying the [`AuthGate`] before any handler runs.
pub async fn require_api_key(State(gate): State<AuthGate>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|value| value.as_bytes());

    match gate.check(&path, provided) {
        AuthDecision::Bypass => next.run(request).await,
        AuthDecision::Accepted => {
            debug!(path = %path, "API Key validated successfully");
            next.run(request).await
        }
        AuthDecision::MissingKey => {
            warn!(path = %path, "API Key was not provided");
            text_response(StatusCode::UNAUTHORIZED, MISSING_KEY_MESSAGE)
        }
        AuthDecision::InvalidKey => {
            warn!(path = %path, "Unauthorized API Key attempted");
            text_response(StatusCode::UNAUTHORIZED, INVALID_KEY_MESSAGE)
        }
    }
}
