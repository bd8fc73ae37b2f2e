use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Machine-readable failure class of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Account identifier is malformed for the requested source
    InvalidAccount,
    /// Source id or source/record-type combination is not implemented
    UnsupportedSource,
    /// Timeout, 5xx or rate limiting
    UpstreamUnavailable,
    /// Missing or rejected credential
    Unauthorized,
    InternalError,
}

impl FetchErrorKind {
    /// Whether the dispatcher may replace this failure with synthetic data
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable)
    }

    /// Whether the failure is the caller's fault and safe to show verbatim
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidAccount | Self::UnsupportedSource)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidAccount => "invalid account",
            Self::UnsupportedSource => "unsupported source",
            Self::UpstreamUnavailable => "upstream unavailable",
            Self::Unauthorized => "unauthorized",
            Self::InternalError => "internal error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    /// Set for local validation failures whose message is safe to show;
    /// anything built from an upstream response stays internal
    pub user_visible: bool,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            user_visible: false,
        }
    }

    /// Mark the message as written by us and safe to return to the caller
    pub fn user_visible(mut self) -> Self {
        self.user_visible = true;
        self
    }

    pub fn invalid_account(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidAccount, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::UnsupportedSource, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::UpstreamUnavailable, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InternalError, message)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::unavailable(format!("request timed out: {}", e))
        } else if e.is_connect() || e.is_request() {
            Self::unavailable(format!("connection failed: {}", e))
        } else if e.is_decode() {
            Self::internal(format!("failed to decode response: {}", e))
        } else {
            Self::unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(format!("failed to parse response: {}", e))
    }
}
