//! JSON client for the intranet REST API.
//!
//! Adds the bearer token, retries transient failures for idempotent methods
//! (401 once after a token refresh, 429 after the server's or a backoff
//! delay), and follows page-number pagination until an empty page.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{ApiError, Result};
use crate::token::{TokenRefresher, TokenStore, ACCESS_TOKEN_KEY};

/// Intranet API client.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ApiConfig,
    tokens: Arc<dyn TokenStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl ApiClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        config: ApiConfig,
        tokens: Arc<dyn TokenStore>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            tokens,
            refresher,
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Perform one logical request, retrying transient failures.
    ///
    /// Only idempotent methods are retried. A 401 triggers at most one token
    /// refresh; a second 401 is returned to the caller. A 429 waits for the
    /// server's `Retry-After` (or an exponential backoff) and tries again,
    /// bounded by `max_rate_limit_retries` when configured.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let retryable = is_idempotent(&method);
        let mut refreshed = false;
        let mut rate_limited: u32 = 0;

        loop {
            match self.send_once(&method, path, query, body).await {
                Err(ApiError::Unauthorized) if retryable && !refreshed => {
                    let Some(refresher) = &self.refresher else {
                        return Err(ApiError::Unauthorized);
                    };
                    refreshed = true;
                    let token = refresher.refresh(self.tokens.as_ref()).await?;
                    self.tokens.set(ACCESS_TOKEN_KEY, &token);
                    info!(path, "access token refreshed, retrying");
                }
                Err(ApiError::RateLimited { retry_after })
                    if retryable && self.may_retry_rate_limit(rate_limited) =>
                {
                    let delay = retry_after.unwrap_or_else(|| self.config.backoff(rate_limited));
                    rate_limited += 1;
                    warn!(path, attempt = rate_limited, ?delay, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn may_retry_rate_limit(&self, attempts: u32) -> bool {
        self.config
            .max_rate_limit_retries
            .is_none_or(|max| attempts < max)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.url(path);
        let mut req = self.http.request(method.clone(), &url).query(query);
        if let Some(token) = self.tokens.get(ACCESS_TOKEN_KEY) {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        debug!(%method, %url, "sending request");
        let resp = req.send().await?;
        let status = resp.status();

        match status {
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimited {
                retry_after: self.retry_after(resp.headers()),
            }),
            s if s.is_success() => {
                let bytes = resp.bytes().await?;
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Ok(Value::Null);
                }
                Ok(serde_json::from_slice(&bytes)?)
            }
            s => {
                let body = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read response".to_string());
                Err(ApiError::Http {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }

    /// Server-requested delay. Absent header means "use backoff"; an
    /// unreadable one falls back to the configured default.
    fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        let raw = headers.get(RETRY_AFTER)?;
        let parsed = raw
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            // Never sleep longer than an hour on the server's word.
            .map(|secs| Duration::from_secs_f64(secs.min(3600.0)));
        Some(parsed.unwrap_or(Duration::from_secs(self.config.default_retry_after_secs)))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GET `path` and decode the body as `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(String, String)]) -> Result<T> {
        let value = self.request(Method::GET, path, query, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET every page of a list endpoint and concatenate the items.
    ///
    /// Pages are requested with `page[number]` and `page[size]` until one
    /// comes back empty.
    ///
    /// # Errors
    /// Returns `ApiError::PageLimit` if `max_pages` pages were all non-empty,
    /// rather than a silently truncated list.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();

        let max_pages = self.config.max_pages;
        for number in 1..=max_pages {
            let mut page_query = query.to_vec();
            page_query.push(("page[size]".to_string(), self.config.page_size.to_string()));
            page_query.push(("page[number]".to_string(), number.to_string()));

            let page = match self.request(Method::GET, path, &page_query, None).await? {
                Value::Array(page) => page,
                Value::Null => Vec::new(),
                other => {
                    return Err(ApiError::Decoding(format!(
                        "expected a JSON array page from {path}, got {}",
                        kind_of(&other)
                    )))
                }
            };
            if page.is_empty() {
                debug!(path, pages = number - 1, items = items.len(), "pagination complete");
                return Ok(items);
            }
            for item in page {
                items.push(serde_json::from_value(item)?);
            }
        }

        warn!(path, max = max_pages, items = items.len(), "pagination did not terminate");
        Err(ApiError::PageLimit {
            path: path.to_string(),
            pages: max_pages,
        })
    }

    /// POST a JSON body. Never retried automatically.
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, &[], Some(&body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, path, &[], None).await?;
        Ok(())
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
