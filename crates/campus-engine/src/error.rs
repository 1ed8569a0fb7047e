//! Error types for campus-engine operations.
//!
//! Aggregation and slot merging never fail on individual records (they drop
//! or clip); errors here come from configuration inputs and cache storage.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid window: {start} is after {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// The backing blob store could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Parse an IANA timezone name into a `chrono_tz::Tz`.
///
/// # Errors
/// Returns `EngineError::InvalidTimezone` if the name is not a known IANA identifier.
pub fn parse_timezone(name: &str) -> Result<chrono_tz::Tz> {
    name.parse()
        .map_err(|_| EngineError::InvalidTimezone(name.to_string()))
}
