//! Client configuration, loaded from TOML with environment overrides.

use std::path::Path;
use std::time::Duration;

use campus_engine::cache::DEFAULT_SWEEP_INTERVAL;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::{ApiError, Result};

/// Environment variable overriding [`ApiConfig::base_url`].
pub const ENV_API_URL: &str = "CAMPUS_API_URL";
/// Environment variable overriding [`ApiConfig::time_zone`].
pub const ENV_TIME_ZONE: &str = "CAMPUS_TIME_ZONE";

/// Intranet API client configuration.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the API, without a trailing path.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Items requested per page when following pagination.
    pub page_size: u32,
    /// Pages followed before a list request fails as unterminated.
    pub max_pages: u32,
    /// Delay used when a 429 carries an unreadable `Retry-After`.
    pub default_retry_after_secs: u64,
    /// First backoff delay when a 429 carries no `Retry-After`; doubles per attempt.
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Cap on automatic rate-limit retries. `None` retries until the server relents.
    pub max_rate_limit_retries: Option<u32>,
    /// Lifetime of cached API results.
    pub cache_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// IANA zone used for calendar-day boundaries.
    pub time_zone: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.intra.42.fr".to_string(),
            timeout_secs: 30,
            user_agent: concat!("campus-api/", env!("CARGO_PKG_VERSION")).to_string(),
            page_size: 100,
            max_pages: 500,
            default_retry_after_secs: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_rate_limit_retries: None,
            cache_ttl_secs: 300,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            time_zone: "Europe/Paris".to_string(),
        }
    }
}

impl ApiConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the document is malformed or fails [`ApiConfig::validate`].
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ApiError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Apply [`ENV_API_URL`] and [`ENV_TIME_ZONE`] from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, then re-validate.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup(ENV_API_URL) {
            self.base_url = url;
        }
        if let Some(tz) = lookup(ENV_TIME_ZONE) {
            self.time_zone = tz;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the fields that cannot be defaulted into sense.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ApiError::Config("base_url must not be empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(ApiError::Config("page_size must be at least 1".to_string()));
        }
        if self.max_pages == 0 {
            return Err(ApiError::Config("max_pages must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ApiError::Config("timeout_secs must be at least 1".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ApiError::Config(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }

    /// The configured time zone.
    pub fn tz(&self) -> Result<Tz> {
        campus_engine::error::parse_timezone(&self.time_zone)
            .map_err(|e| ApiError::Config(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        // Ten years is as good as forever for a response cache.
        let secs = self.cache_ttl_secs.min(10 * 365 * 86_400);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Delay before rate-limit retry number `attempt` (0-based) when the
    /// server gave no `Retry-After`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}
