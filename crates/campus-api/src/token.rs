//! Secure token storage and refresh seams.
//!
//! The platform keychain and the OAuth dance live outside this crate; the
//! client only needs a bearer token when one is present and a way to obtain
//! a new one after a 401.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// Key under which the bearer access token is stored.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Opaque string storage, typically backed by a platform keychain.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn delete(&self, key: &str);
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `token` under [`ACCESS_TOKEN_KEY`].
    pub fn with_access_token(token: &str) -> Self {
        let store = Self::new();
        store.set(ACCESS_TOKEN_KEY, token);
        store
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.tokens().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.tokens().insert(key.to_string(), value.to_string());
    }

    fn delete(&self, key: &str) {
        self.tokens().remove(key);
    }
}

/// Obtains a fresh access token after the current one was rejected.
///
/// Implementations usually exchange the stored refresh token; they must not
/// call back into the client that triggered the refresh.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, tokens: &dyn TokenStore) -> Result<String>;
}
