//! Expiring key-value cache with write-through blob persistence.
//!
//! All operations go through one async mutex around the whole map, so no two
//! mutations interleave and every persisted blob is a complete snapshot. A
//! mutation whose save fails is rolled back, so memory never holds a change
//! the store rejected.
//! Expired entries are evicted lazily on [`TtlCache::get`] and in batches by
//! [`TtlCache::sweep`], which [`spawn_sweeper`] runs on a fixed period.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;

/// Period between background sweeps unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Opaque persistent storage for one serialized cache snapshot.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the stored blob, `None` if nothing has been saved.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored blob.
    async fn save(&self, bytes: &[u8]) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Blob store backed by a single file. Saves write a sibling temp file and
/// rename it over the target, so readers never observe a partial write.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory blob store. Counts saves so batching can be observed.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    bytes: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing blob, as if a previous session had saved it.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot())
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        *self.slot() = Some(bytes.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// A cached JSON value and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

type EntryMap = BTreeMap<String, CacheEntry>;

/// String-keyed TTL cache persisted wholesale to a [`BlobStore`].
pub struct TtlCache {
    entries: tokio::sync::Mutex<EntryMap>,
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    /// Build a cache from whatever `store` holds.
    ///
    /// A missing blob starts empty. An unreadable or corrupted blob is logged
    /// and also starts empty; the next mutation overwrites it.
    pub async fn load(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        let entries = match store.load().await {
            Ok(Some(bytes)) => serde_json::from_slice::<EntryMap>(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "discarding corrupted cache snapshot");
                EntryMap::new()
            }),
            Ok(None) => EntryMap::new(),
            Err(e) => {
                warn!(error = %e, "could not read cache snapshot");
                EntryMap::new()
            }
        };
        debug!(entries = entries.len(), "cache loaded");

        Self {
            entries: tokio::sync::Mutex::new(entries),
            store,
            clock,
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    ///
    /// # Errors
    /// Fails if `value` cannot be serialized or the snapshot cannot be saved.
    /// On a failed save the previous entry, if any, is restored.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let previous = entries.insert(key.to_string(), CacheEntry { value, expires_at });

        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(entry) => entries.insert(key.to_string(), entry),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Fetch the live value under `key`.
    ///
    /// An expired entry is evicted and reported as a miss. A live entry that
    /// does not decode as `T` is also a miss but stays in place.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        let entry = entries.get(key)?;
        if entry.is_expired(now) {
            entries.remove(key);
            debug!(key, "cache entry expired");
            if let Err(e) = self.persist(&entries).await {
                warn!(key, error = %e, "failed to persist lazy eviction");
            }
            return None;
        }

        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                debug!(key, error = %e, "cache entry has unexpected shape");
                None
            }
        }
    }

    /// Remove `key`. Returns whether an entry was present. Persists only when
    /// something was removed; the entry is kept if that save fails.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(removed) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&entries).await {
            entries.insert(key.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    /// Clear the backing store, then drop every entry. Nothing is dropped if
    /// the store cannot be cleared.
    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        self.store.clear().await?;
        entries.clear();
        Ok(())
    }

    /// Remove all expired entries in one pass, persisting once if any were
    /// removed. If that save fails the entries stay until the next sweep.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep(&self) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();
        let live: EntryMap = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        let removed = entries.len() - live.len();
        if removed > 0 {
            self.persist(&live).await?;
            *entries = live;
        }
        Ok(removed)
    }

    /// Number of stored entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn persist(&self, entries: &EntryMap) -> Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        self.store.save(&bytes).await
    }
}

/// Run [`TtlCache::sweep`] every `period` until `cancel` fires.
///
/// Cancellation is only observed between sweeps, so a sweep in progress
/// always finishes its write.
///
/// # Panics
/// If `period` is zero.
pub fn spawn_sweeper(
    cache: Arc<TtlCache>,
    period: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match cache.sweep().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "cache sweep evicted expired entries"),
                    Err(e) => warn!(error = %e, "cache sweep failed to persist"),
                },
            }
        }
        debug!("cache sweeper stopped");
    })
}
