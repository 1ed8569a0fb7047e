//! Error types for intranet API calls.
//!
//! Only the fetch layer raises these; the aggregation and merge code in
//! `campus-engine` never fails on individual records.

use std::fmt;
use std::time::Duration;

use campus_engine::EngineError;
use thiserror::Error;

/// How a network-layer failure should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The host could not be reached at all.
    Offline,
    TimedOut,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "network failure"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// The access token is missing, invalid or expired.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success status. Terminal for the call.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response did not match the expected schema.
    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// A list endpoint was still returning items after the page limit.
    #[error("Pagination of {path} exceeded {pages} pages")]
    PageLimit { path: String, pages: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(#[from] EngineError),
}

impl ApiError {
    /// Text suitable for showing next to a retry affordance.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => "Your session has expired, please log in again.".to_string(),
            Self::RateLimited { .. } => "Too many requests, please try again shortly.".to_string(),
            Self::Http { status, body } => message_from_body(body)
                .unwrap_or_else(|| format!("The server returned an error ({status}).")),
            Self::Decoding(_) => "Invalid server response.".to_string(),
            Self::Transport { kind, .. } => match kind {
                TransportKind::Offline => "You appear to be offline.".to_string(),
                TransportKind::TimedOut => "The request timed out.".to_string(),
                TransportKind::Other => "A network error occurred.".to_string(),
            },
            Self::PageLimit { .. } => "Too many results to load at once.".to_string(),
            Self::InvalidInput(message) | Self::Config(message) => message.clone(),
            Self::Cache(_) => "Local cache is unavailable.".to_string(),
        }
    }
}

/// Pull a readable message out of an error body, if it is JSON that carries one.
fn message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let serde_json::Value::Object(fields) = value else {
        return None;
    };

    ["error_description", "message", "error"]
        .iter()
        .find_map(|name| match fields.get(*name) {
            Some(serde_json::Value::String(text)) if !text.trim().is_empty() => {
                Some(text.trim().to_string())
            }
            Some(serde_json::Value::Array(items)) => {
                let joined: Vec<&str> = items.iter().filter_map(|i| i.as_str()).collect();
                (!joined.is_empty()).then(|| joined.join(", "))
            }
            _ => None,
        })
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decoding(e.to_string());
        }
        let kind = if e.is_timeout() {
            TransportKind::TimedOut
        } else if e.is_connect() {
            TransportKind::Offline
        } else {
            TransportKind::Other
        };
        Self::Transport {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decoding(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
