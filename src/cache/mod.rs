//! The two-tier global cache manager.
//!
//! L1 ([`memory::MemoryTier`]) sits in front of a single shared L2
//! ([`disk::DiskCacheBackend`]). Namespace policy (capacity, TTLs,
//! compression) is immutable configuration data, not branching logic —
//! adding a namespace is adding a table row, per the spec's own framing
//! of policies as data.

pub mod disk;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LexError, Result};
use crate::serialize::{compress, decompress, CompressionAlgorithm};

use disk::DiskCacheBackend;
use memory::{CacheStats, MemoryTier};

/// The closed set of cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Default,
    Corpus,
    Semantic,
    Search,
    Dictionary,
    Literature,
    Language,
    Lexicon,
    Api,
    Scraping,
    Openai,
    Trie,
    Wotd,
}

impl Namespace {
    pub const ALL: [Namespace; 13] = [
        Namespace::Default,
        Namespace::Corpus,
        Namespace::Semantic,
        Namespace::Search,
        Namespace::Dictionary,
        Namespace::Literature,
        Namespace::Language,
        Namespace::Lexicon,
        Namespace::Api,
        Namespace::Scraping,
        Namespace::Openai,
        Namespace::Trie,
        Namespace::Wotd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Default => "default",
            Namespace::Corpus => "corpus",
            Namespace::Semantic => "semantic",
            Namespace::Search => "search",
            Namespace::Dictionary => "dictionary",
            Namespace::Literature => "literature",
            Namespace::Language => "language",
            Namespace::Lexicon => "lexicon",
            Namespace::Api => "api",
            Namespace::Scraping => "scraping",
            Namespace::Openai => "openai",
            Namespace::Trie => "trie",
            Namespace::Wotd => "wotd",
        }
    }

    pub fn parse(s: &str) -> Result<Namespace> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| LexError::InvalidArgument(format!("unknown cache namespace: {s}")))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-namespace cache policy. Data, not code: two namespaces that want
/// identical behavior simply carry identical policy values.
#[derive(Debug, Clone, Copy)]
pub struct NamespacePolicy {
    pub memory_limit: usize,
    pub memory_ttl: Duration,
    pub disk_ttl: Option<Duration>,
    pub compression: Option<CompressionAlgorithm>,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        NamespacePolicy {
            memory_limit: 1_000,
            memory_ttl: Duration::from_secs(300),
            disk_ttl: Some(Duration::from_secs(86_400)),
            compression: None,
        }
    }
}

fn default_policy_for(namespace: Namespace) -> NamespacePolicy {
    match namespace {
        Namespace::Corpus => NamespacePolicy {
            memory_limit: 256,
            memory_ttl: Duration::from_secs(3_600),
            disk_ttl: None, // corpora are long-lived derived artifacts; no disk expiry
            compression: Some(CompressionAlgorithm::Zstd),
        },
        Namespace::Semantic => NamespacePolicy {
            memory_limit: 64,
            memory_ttl: Duration::from_secs(3_600),
            disk_ttl: None,
            compression: Some(CompressionAlgorithm::Zstd),
        },
        Namespace::Trie => NamespacePolicy {
            memory_limit: 128,
            memory_ttl: Duration::from_secs(3_600),
            disk_ttl: None,
            compression: Some(CompressionAlgorithm::Lz4),
        },
        Namespace::Search => NamespacePolicy {
            memory_limit: 256,
            memory_ttl: Duration::from_secs(1_800),
            disk_ttl: None,
            compression: Some(CompressionAlgorithm::Lz4),
        },
        Namespace::Dictionary | Namespace::Literature | Namespace::Language => NamespacePolicy {
            memory_limit: 2_000,
            memory_ttl: Duration::from_secs(86_400),
            disk_ttl: Some(Duration::from_secs(30 * 86_400)),
            compression: Some(CompressionAlgorithm::Gzip),
        },
        Namespace::Openai | Namespace::Scraping => NamespacePolicy {
            memory_limit: 500,
            memory_ttl: Duration::from_secs(3_600),
            disk_ttl: Some(Duration::from_secs(7 * 86_400)),
            compression: Some(CompressionAlgorithm::Gzip),
        },
        Namespace::Api => NamespacePolicy {
            memory_limit: 5_000,
            memory_ttl: Duration::from_secs(60),
            disk_ttl: Some(Duration::from_secs(300)),
            compression: None,
        },
        Namespace::Lexicon | Namespace::Wotd | Namespace::Default => NamespacePolicy::default(),
    }
}

/// Configuration for the global cache manager.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub disk_directory: std::path::PathBuf,
    pub disk_max_bytes: u64,
    pub namespace_overrides: HashMap<Namespace, NamespacePolicy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            disk_directory: std::path::PathBuf::from("./lexistore-cache"),
            disk_max_bytes: disk::DEFAULT_MAX_BYTES,
            namespace_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
}

struct NamespaceState {
    policy: NamespacePolicy,
    memory: MemoryTier,
}

/// The process-wide two-tier cache. Constructed once by the embedding
/// application and shared via `Arc`, per the singleton-replacement
/// design note this subsystem follows (see the crate's top-level
/// configuration documentation for the rationale).
pub struct CacheManager {
    disk: DiskCacheBackend,
    namespaces: HashMap<Namespace, NamespaceState>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.disk_directory)?;
        let disk = DiskCacheBackend::open(&config.disk_directory, config.disk_max_bytes)?;
        let mut namespaces = HashMap::new();
        for ns in Namespace::ALL {
            let policy = config
                .namespace_overrides
                .get(&ns)
                .copied()
                .unwrap_or_else(|| default_policy_for(ns));
            namespaces.insert(
                ns,
                NamespaceState {
                    policy,
                    memory: MemoryTier::new(policy.memory_limit),
                },
            );
        }
        Ok(CacheManager { disk, namespaces })
    }

    fn disk_key(namespace: Namespace, key: &str) -> String {
        format!("{}:{}", namespace.as_str(), key)
    }

    fn state(&self, namespace: Namespace) -> &NamespaceState {
        self.namespaces
            .get(&namespace)
            .expect("every Namespace::ALL variant is populated in CacheManager::new")
    }

    /// `get(namespace, key)`: L1, then L2 with promotion on hit.
    ///
    /// Payloads are encoded with `serde_json`, not `bincode`: the values
    /// this cache actually holds (`Snapshot` pointers, whose `content`/
    /// `metadata`/`typed_fields` are `serde_json::Value`) rely on
    /// `Value`'s `deserialize_any`-based `Deserialize` impl, which
    /// `bincode` — a non-self-describing format — cannot drive. JSON is
    /// self-describing and round-trips them correctly.
    pub async fn get<V: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Result<Option<V>> {
        let state = self.state(namespace);
        if let Some(bytes) = state.memory.get(key) {
            let value: V = serde_json::from_slice(&bytes)
                .map_err(|e| LexError::CorruptedCache(format!("L1 payload undecodable: {e}")))?;
            return Ok(Some(value));
        }

        let disk_key = Self::disk_key(namespace, key);
        let Some(compressed) = self.disk.get(&disk_key).await? else {
            return Ok(None);
        };

        let compression = state.policy.compression.unwrap_or(CompressionAlgorithm::None);
        let bytes = decompress(&compressed, compression, 0)
            .map_err(|e| LexError::CorruptedCache(format!("L2 payload undecompressable: {e}")))?;
        let value: V = serde_json::from_slice(&bytes)
            .map_err(|e| LexError::CorruptedCache(format!("L2 payload undecodable: {e}")))?;

        debug!(namespace = %namespace, key, "promoting L2 hit to L1");
        state.memory.insert(key.to_string(), bytes, Some(state.policy.memory_ttl));
        Ok(Some(value))
    }

    /// `set(namespace, key, value, ttl?)`: compress per policy, write L2,
    /// then populate L1. See [`Self::get`] for why the payload encoding
    /// is `serde_json` rather than `bincode`.
    pub async fn set<V: Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let state = self.state(namespace);
        let bytes = serde_json::to_vec(value)
            .map_err(|e| LexError::Backend(format!("cache payload encode failed: {e}")))?;

        let compression = state.policy.compression.unwrap_or(CompressionAlgorithm::None);
        let compressed = compress(&bytes, compression)?;
        let disk_key = Self::disk_key(namespace, key);
        let disk_ttl = ttl.or(state.policy.disk_ttl);
        self.disk.set(&disk_key, compressed, disk_ttl).await?;

        let memory_ttl = ttl.unwrap_or(state.policy.memory_ttl);
        state.memory.insert(key.to_string(), bytes, Some(memory_ttl));
        Ok(())
    }

    /// `delete(namespace, key)`: removes from both tiers.
    pub async fn delete(&self, namespace: Namespace, key: &str) -> Result<()> {
        let state = self.state(namespace);
        state.memory.remove(key);
        self.disk.delete(&Self::disk_key(namespace, key)).await
    }

    /// `clear_namespace(ns)`: flushes both tiers for that namespace.
    pub async fn clear_namespace(&self, namespace: Namespace) -> Result<()> {
        let state = self.state(namespace);
        state.memory.clear();
        self.disk
            .clear_prefix(&format!("{}:", namespace.as_str()))
            .await
    }

    /// `stats()`: per-namespace hit/miss/eviction counts.
    pub fn stats(&self) -> HashMap<Namespace, CacheStats> {
        self.namespaces
            .iter()
            .map(|(ns, state)| (*ns, state.memory.stats()))
            .collect()
    }

    /// `health()`: healthy iff the disk backend is reachable.
    pub fn health(&self) -> Health {
        if self.disk.is_healthy() {
            Health::Healthy
        } else {
            warn!("disk cache backend reports unhealthy");
            Health::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Blob {
        value: String,
    }

    async fn manager() -> CacheManager {
        let mut dir = std::env::temp_dir();
        dir.push(format!("lexistore-cache-manager-test-{}", uuid::Uuid::new_v4()));
        CacheManager::new(CacheConfig {
            disk_directory: dir,
            ..CacheConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_hits_l1() {
        let cache = manager().await;
        let v = Blob { value: "hi".into() };
        cache.set(Namespace::Corpus, "k", &v, None).await.unwrap();
        let got: Option<Blob> = cache.get(Namespace::Corpus, "k").await.unwrap();
        assert_eq!(got, Some(v));
        assert_eq!(cache.stats()[&Namespace::Corpus].hits, 1);
    }

    #[tokio::test]
    async fn l2_hit_promotes_to_l1() {
        let cache = manager().await;
        let v = Blob { value: "hi".into() };
        cache.set(Namespace::Corpus, "k", &v, None).await.unwrap();
        // Evict from L1 directly to simulate an L1 miss that still hits L2.
        cache.state(Namespace::Corpus).memory.remove("k");
        let got: Option<Blob> = cache.get(Namespace::Corpus, "k").await.unwrap();
        assert_eq!(got, Some(v));
        assert!(cache.state(Namespace::Corpus).memory.get("k").is_some());
    }

    #[tokio::test]
    async fn delete_removes_from_both_tiers() {
        let cache = manager().await;
        let v = Blob { value: "hi".into() };
        cache.set(Namespace::Corpus, "k", &v, None).await.unwrap();
        cache.delete(Namespace::Corpus, "k").await.unwrap();
        let got: Option<Blob> = cache.get(Namespace::Corpus, "k").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn unknown_namespace_is_invalid_argument() {
        assert!(Namespace::parse("not-a-namespace").is_err());
    }

    /// Values embedding `serde_json::Value` must survive two consecutive
    /// cached reads with no intervening `set` — `Value`'s `Deserialize`
    /// impl needs a self-describing format, which `bincode` is not.
    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct JsonBlob {
        content: serde_json::Value,
        metadata: serde_json::Map<String, serde_json::Value>,
    }

    #[tokio::test]
    async fn repeated_cached_reads_of_json_value_payload_succeed() {
        let cache = manager().await;
        let mut metadata = serde_json::Map::new();
        metadata.insert("lang".to_string(), serde_json::json!("en"));
        let v = JsonBlob {
            content: serde_json::json!({"word": "lexicon", "count": 3}),
            metadata,
        };
        cache.set(Namespace::Corpus, "k", &v, None).await.unwrap();

        let first: Option<JsonBlob> = cache.get(Namespace::Corpus, "k").await.unwrap();
        assert_eq!(first, Some(v));

        let second: Option<JsonBlob> = cache.get(Namespace::Corpus, "k").await.unwrap();
        assert!(second.is_some());
    }
}
