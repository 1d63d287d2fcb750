//! L2: a bounded-size, LRU, TTL-aware disk cache backend.
//!
//! Backed by `sled`, the same embedded store this workspace already
//! uses for its disk cache tier. `sled` itself is a synchronous,
//! thread-safe key-value store with per-key atomicity; this wrapper
//! offloads every operation to the blocking thread pool via
//! `tokio::task::spawn_blocking` so callers never block the async
//! runtime on disk I/O, and layers TTL and byte-budget LRU eviction on
//! top since `sled` provides neither.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{LexError, Result};

/// Default total byte budget for the disk cache: 10 GiB.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct Envelope {
    bytes: Vec<u8>,
    inserted_at_secs: u64,
    ttl_secs: Option<u64>,
    last_access_secs: u64,
}

impl Envelope {
    fn is_expired(&self, now: u64) -> bool {
        match self.ttl_secs {
            Some(ttl) => now.saturating_sub(self.inserted_at_secs) > ttl,
            None => false,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Thread-pool-wrapped synchronous bounded LRU cache stored in the
/// filesystem.
#[derive(Clone)]
pub struct DiskCacheBackend {
    db: Arc<sled::Db>,
    max_bytes: u64,
}

impl DiskCacheBackend {
    pub fn open(path: impl AsRef<std::path::Path>, max_bytes: u64) -> Result<Self> {
        let db = sled::open(path).map_err(|e| LexError::Backend(format!("sled open failed: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            max_bytes,
        })
    }

    /// `get(key) -> bytes?`. Returns `Ok(None)` for an ordinary miss
    /// (absent or expired — expired entries are lazily reaped here and
    /// not returned). Returns `Err` for a genuine backend failure,
    /// which the spec distinguishes from an ordinary miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::get_blocking(&db, &key))
            .await
            .map_err(|e| LexError::Backend(format!("disk cache task join failed: {e}")))?
    }

    fn get_blocking(db: &sled::Db, key: &str) -> Result<Option<Vec<u8>>> {
        let raw = db
            .get(key.as_bytes())
            .map_err(|e| LexError::Backend(format!("sled get failed: {e}")))?;
        let Some(raw) = raw else { return Ok(None) };
        let mut envelope: Envelope = bincode::deserialize(&raw)
            .map_err(|e| LexError::Backend(format!("disk cache envelope corrupt: {e}")))?;
        let now = now_secs();
        if envelope.is_expired(now) {
            let _ = db.remove(key.as_bytes());
            return Ok(None);
        }
        envelope.last_access_secs = now;
        if let Ok(bytes) = bincode::serialize(&envelope) {
            let _ = db.insert(key.as_bytes(), bytes);
        }
        Ok(Some(envelope.bytes))
    }

    /// `set(key, value, ttl?)`.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        let max_bytes = self.max_bytes;
        tokio::task::spawn_blocking(move || Self::set_blocking(&db, &key, value, ttl, max_bytes))
            .await
            .map_err(|e| LexError::Backend(format!("disk cache task join failed: {e}")))?
    }

    fn set_blocking(
        db: &sled::Db,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        max_bytes: u64,
    ) -> Result<()> {
        let now = now_secs();
        let envelope = Envelope {
            bytes: value,
            inserted_at_secs: now,
            ttl_secs: ttl.map(|d| d.as_secs()),
            last_access_secs: now,
        };
        let encoded = bincode::serialize(&envelope)
            .map_err(|e| LexError::Backend(format!("disk cache encode failed: {e}")))?;
        db.insert(key.as_bytes(), encoded)
            .map_err(|e| LexError::Backend(format!("sled insert failed: {e}")))?;
        Self::evict_to_budget(db, max_bytes)?;
        Ok(())
    }

    /// `delete(key)`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            db.remove(key.as_bytes())
                .map(|_| ())
                .map_err(|e| LexError::Backend(format!("sled remove failed: {e}")))
        })
        .await
        .map_err(|e| LexError::Backend(format!("disk cache task join failed: {e}")))?
    }

    /// `clear_namespace(ns)`: removes every key whose cache key begins
    /// with the namespace prefix this backend's caller constructs keys
    /// with.
    pub async fn clear_prefix(&self, prefix: &str) -> Result<()> {
        let db = self.db.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            for item in db.scan_prefix(prefix.as_bytes()) {
                let (k, _) = item.map_err(|e| LexError::Backend(format!("sled scan failed: {e}")))?;
                db.remove(k).map_err(|e| LexError::Backend(format!("sled remove failed: {e}")))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| LexError::Backend(format!("disk cache task join failed: {e}")))?
    }

    /// `size_bytes()`: approximate on-disk size of the store.
    pub async fn size_bytes(&self) -> Result<u64> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.size_on_disk()
                .map_err(|e| LexError::Backend(format!("sled size query failed: {e}")))
        })
        .await
        .map_err(|e| LexError::Backend(format!("disk cache task join failed: {e}")))?
    }

    /// `count()`: number of entries currently stored (including any not
    /// yet lazily reaped).
    pub async fn count(&self) -> Result<u64> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.len() as u64)
            .await
            .map_err(|e| LexError::Backend(format!("disk cache task join failed: {e}")))
    }

    pub fn is_healthy(&self) -> bool {
        !self.db.was_recovered() || self.db.size_on_disk().is_ok()
    }

    /// Evict least-recently-accessed entries until under `max_bytes`.
    ///
    /// `sled` does not track access order itself, so this scans every
    /// entry's envelope to find the oldest `last_access_secs`. Acceptable
    /// for the document sizes this cache holds (compressed corpus/index
    /// blobs, not a high-churn hot path) — see the disk cache backend's
    /// design note if this ever needs a tracked heap instead of a scan.
    fn evict_to_budget(db: &sled::Db, max_bytes: u64) -> Result<()> {
        loop {
            let total = db
                .size_on_disk()
                .map_err(|e| LexError::Backend(format!("sled size query failed: {e}")))?;
            if total <= max_bytes {
                return Ok(());
            }
            let mut oldest: Option<(sled::IVec, u64)> = None;
            for item in db.iter() {
                let (k, v) = item.map_err(|e| LexError::Backend(format!("sled iter failed: {e}")))?;
                if let Ok(envelope) = bincode::deserialize::<Envelope>(&v) {
                    if oldest
                        .as_ref()
                        .map(|(_, t)| envelope.last_access_secs < *t)
                        .unwrap_or(true)
                    {
                        oldest = Some((k, envelope.last_access_secs));
                    }
                }
            }
            match oldest {
                Some((k, _)) => {
                    db.remove(&k)
                        .map_err(|e| LexError::Backend(format!("sled remove failed: {e}")))?;
                }
                None => return Ok(()),
            }
        }
    }
}
