//! The versioned data manager: the orchestrator tying together
//! canonical serialization, the per-resource lock, the document store,
//! and the cache manager into `save`/`get_*`/`delete_resource`/
//! `list_versions`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use semver::Version;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheManager, Namespace};
use crate::error::{LexError, Result};
use crate::keys::resource_key;
use crate::lock::ResourceLockRegistry;
use crate::resource::{ContentLocation, ResourceType, Snapshot, StorageType, VersionInfo};
use crate::serialize::{canonicalize, partition_metadata, CompressionAlgorithm};
use crate::store::{DocumentRow, DocumentStore};

/// Content below this size is stored inline in the metadata document;
/// at or above it, content is offloaded to the cache. A single global
/// constant per the spec's adopted resolution of its first open
/// question (a per-namespace threshold was considered and rejected).
pub const INLINE_THRESHOLD_BYTES: usize = 16 * 1024;

/// Options recognized by `save`.
#[derive(Debug, Clone, Default)]
pub struct SaveConfig {
    pub use_cache: bool,
    pub force_new_version: bool,
    pub force_new_major: bool,
    pub ttl: Option<Duration>,
    pub compression: Option<CompressionAlgorithm>,
    /// An explicit version string overriding the computed increment.
    /// Must be strictly greater than the current latest or the save
    /// fails with `InvalidVersion`.
    pub version_override: Option<String>,
}

impl SaveConfig {
    pub fn new() -> Self {
        SaveConfig {
            use_cache: true,
            ..Default::default()
        }
    }
}

fn snapshot_cache_namespace(resource_type: ResourceType) -> Namespace {
    match resource_type {
        ResourceType::Corpus => Namespace::Corpus,
        ResourceType::SearchIndex => Namespace::Search,
        ResourceType::TrieIndex => Namespace::Trie,
        ResourceType::SemanticIndex => Namespace::Semantic,
        ResourceType::DictionaryEntry => Namespace::Dictionary,
        ResourceType::LiteratureEntry => Namespace::Literature,
        ResourceType::LanguageEntry => Namespace::Language,
    }
}

/// Pure function: should `size_bytes` of canonical content be inlined?
pub fn should_inline(size_bytes: usize) -> bool {
    size_bytes < INLINE_THRESHOLD_BYTES
}

/// Compute the next version string per the spec's versioning rules.
pub fn next_version(
    current: Option<&str>,
    force_new_major: bool,
    version_override: Option<&str>,
) -> Result<String> {
    let current_version = match current {
        Some(v) => Some(
            Version::parse(v)
                .map_err(|e| LexError::InvalidVersion(format!("stored version unparsable: {e}")))?,
        ),
        None => None,
    };

    if let Some(v) = version_override {
        let parsed = Version::parse(v)
            .map_err(|e| LexError::InvalidVersion(format!("version override unparsable: {e}")))?;
        if let Some(cur) = &current_version {
            if parsed <= *cur {
                return Err(LexError::InvalidVersion(format!(
                    "version override {v} is not strictly greater than current {cur}"
                )));
            }
        }
        return Ok(parsed.to_string());
    }

    let next = match current_version {
        None => Version::new(1, 0, 0),
        Some(cur) if force_new_major => Version::new(cur.major + 1, 0, 0),
        Some(cur) => Version::new(cur.major, cur.minor, cur.patch + 1),
    };
    Ok(next.to_string())
}

/// The versioned data manager.
pub struct VersionManager {
    store: DocumentStore,
    cache: Arc<CacheManager>,
    locks: ResourceLockRegistry,
}

impl VersionManager {
    pub fn new(store: DocumentStore, cache: Arc<CacheManager>) -> Self {
        VersionManager {
            store,
            cache,
            locks: ResourceLockRegistry::new(),
        }
    }

    /// Hydrate a stored row into a fully-materialized `Snapshot`,
    /// fetching external content from the cache backend and verifying
    /// its checksum (§4.5.4 steps 3–4).
    async fn hydrate(&self, row: DocumentRow) -> Result<Snapshot> {
        let doc = row.document;
        let storage_type_str = doc
            .get("content_location")
            .and_then(|v| v.get("storage_type"))
            .and_then(|v| v.as_str())
            .unwrap_or("none");

        let content = match storage_type_str {
            "inline" => doc.get("content_inline").cloned().unwrap_or(Value::Null),
            "cache" => {
                let cache_namespace = doc["content_location"]["cache_namespace"]
                    .as_str()
                    .ok_or_else(|| LexError::CorruptedCache("missing cache_namespace".into()))?;
                let cache_key = doc["content_location"]["cache_key"]
                    .as_str()
                    .ok_or_else(|| LexError::CorruptedCache("missing cache_key".into()))?;
                let namespace = Namespace::parse(cache_namespace)?;

                let stored: Option<String> = self.cache.get(namespace, cache_key).await?;
                let json_str = stored.ok_or_else(|| {
                    LexError::CorruptedCache(format!(
                        "cache blob missing for {}:{}",
                        row.resource_id, row.version
                    ))
                })?;

                let actual_hash = crate::keys::content_hash(&json_str);
                if actual_hash != row.data_hash {
                    return Err(LexError::CorruptedCache(format!(
                        "checksum mismatch for {}:{}",
                        row.resource_id, row.version
                    )));
                }
                serde_json::from_str(&json_str)?
            }
            _ => Value::Null,
        };

        let content_location: ContentLocation = serde_json::from_value(doc["content_location"].clone())
            .unwrap_or_else(|_| ContentLocation::none());
        let metadata: Map<String, Value> = doc
            .get("metadata")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let tags: Vec<String> = doc
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let mut typed_fields = Map::new();
        if let Some(obj) = doc.as_object() {
            for name in row.resource_type.typed_field_names() {
                if let Some(v) = obj.get(*name) {
                    typed_fields.insert((*name).to_string(), v.clone());
                }
            }
        }

        Ok(Snapshot {
            id: row.id,
            resource_id: row.resource_id,
            resource_type: row.resource_type,
            namespace: row.namespace,
            version_info: VersionInfo {
                version: row.version,
                data_hash: row.data_hash,
                created_at: row.created_at,
                is_latest: row.is_latest,
                supersedes: row.supersedes,
                superseded_by: row.superseded_by,
            },
            content,
            content_location,
            ttl: doc.get("ttl").and_then(|v| v.as_i64()),
            metadata,
            tags,
            typed_fields,
        })
    }

    /// `save(resource_id, resource_type, namespace, content, config, metadata?)`.
    #[instrument(skip(self, content, metadata))]
    pub async fn save(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        namespace: Namespace,
        content: &Value,
        config: SaveConfig,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Snapshot> {
        if resource_id.is_empty() {
            return Err(LexError::InvalidArgument("resource_id must not be empty".into()));
        }

        // Step 1: canonical-serialize once.
        let canonical = canonicalize(content)?;

        // Step 2: partition metadata into typed vs. overflow.
        let (typed, overflow) = partition_metadata(
            metadata.unwrap_or_default(),
            resource_type.typed_field_names(),
        );

        // Step 3: per-resource lock.
        let _guard = self.locks.acquire(resource_type, resource_id, None).await?;

        // Step 4: dedup against current latest.
        let current = self.store.find_latest(resource_id, resource_type).await?;
        if !config.force_new_version {
            if let Some(existing) = &current {
                if existing.data_hash == canonical.data_hash {
                    debug!(resource_id, %resource_type, "dedup: identical content hash, returning existing latest");
                    return self.hydrate(existing.clone()).await;
                }
            }
        }

        // Step 5: storage strategy.
        //
        // `canonical.size_bytes == 0` never happens (canonical JSON of
        // `Value::Null` is `"null"`, 4 bytes; `{}` is 2); "empty content"
        // is defined as `Value::Null` instead, the one content value a
        // caller cannot distinguish from "no content at all".
        let inline = should_inline(canonical.size_bytes);
        let (content_inline, content_location, cache_write) = if content.is_null() {
            (None, ContentLocation::none(), None)
        } else if inline {
            (Some(content.clone()), ContentLocation::inline(), None)
        } else {
            let content_key = resource_key(
                resource_type.as_str(),
                resource_id,
                &["content", &canonical.data_hash[..8]],
            );
            let compression = config
                .compression
                .or_else(|| Some(CompressionAlgorithm::Zstd));
            let location = ContentLocation {
                storage_type: StorageType::Cache,
                cache_namespace: Some(namespace.as_str().to_string()),
                cache_key: Some(content_key.clone()),
                size_bytes: Some(canonical.size_bytes as u64),
                checksum: Some(canonical.data_hash.clone()),
                compression,
            };
            (None, location, Some(content_key))
        };

        // Step 6: next version.
        let version = next_version(
            current.as_ref().map(|c| c.version.as_str()),
            config.force_new_major,
            config.version_override.as_deref(),
        )?;

        // Step 7: construct the new document.
        let new_id = Uuid::new_v4().to_string();
        let mut document = Map::new();
        document.insert("resource_id".into(), Value::String(resource_id.to_string()));
        document.insert(
            "resource_type".into(),
            Value::String(resource_type.as_str().to_string()),
        );
        document.insert("namespace".into(), Value::String(namespace.as_str().to_string()));
        document.insert(
            "content_location".into(),
            serde_json::to_value(&content_location)?,
        );
        if let Some(c) = &content_inline {
            document.insert("content_inline".into(), c.clone());
        }
        if let Some(ttl) = config.ttl {
            document.insert("ttl".into(), Value::from(ttl.as_secs()));
        }
        document.insert("metadata".into(), Value::Object(overflow));
        document.insert("tags".into(), Value::Array(vec![]));
        for (k, v) in typed {
            document.insert(k, v);
        }

        let row = DocumentRow {
            id: new_id,
            resource_id: resource_id.to_string(),
            resource_type,
            namespace: namespace.as_str().to_string(),
            version,
            data_hash: canonical.data_hash.clone(),
            is_latest: true,
            supersedes: current.as_ref().map(|c| c.id.clone()),
            superseded_by: None,
            created_at: Utc::now(),
            document: Value::Object(document),
        };

        // Offload content to the cache before committing the document
        // (a transient window where the document exists before the blob
        // does is a documented possibility on the read side; writing the
        // blob first narrows it).
        if let (Some(content_key), false) = (&cache_write, canonical.json.is_empty()) {
            self.cache
                .set(namespace, content_key, &canonical.json, config.ttl)
                .await?;
        }

        // Steps 7-8: insert + flip prior latest, transactionally.
        self.store
            .insert_version_and_supersede(&row, current.as_ref().map(|c| c.id.as_str()))
            .await?;

        // Step 9: invalidate the cached "latest" pointer for this resource.
        let pointer_key = resource_key(resource_type.as_str(), resource_id, &["latest"]);
        self.cache
            .delete(snapshot_cache_namespace(resource_type), &pointer_key)
            .await
            .ok();

        self.hydrate(row).await
    }

    /// `get_latest(resource_id, resource_type, use_cache?)`.
    #[instrument(skip(self))]
    pub async fn get_latest(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        use_cache: bool,
    ) -> Result<Option<Snapshot>> {
        let pointer_namespace = snapshot_cache_namespace(resource_type);
        let pointer_key = resource_key(resource_type.as_str(), resource_id, &["latest"]);

        if use_cache {
            if let Some(cached) = self.cache.get::<Snapshot>(pointer_namespace, &pointer_key).await? {
                return Ok(Some(cached));
            }
        }

        let Some(row) = self.store.find_latest(resource_id, resource_type).await? else {
            return Ok(None);
        };
        let snapshot = self.hydrate(row).await?;

        if use_cache {
            self.cache
                .set(pointer_namespace, &pointer_key, &snapshot, None)
                .await
                .ok();
        }
        Ok(Some(snapshot))
    }

    /// `get_by_version(resource_id, resource_type, version)`.
    pub async fn get_by_version(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        version: &str,
    ) -> Result<Option<Snapshot>> {
        match self.store.find_by_version(resource_id, resource_type, version).await? {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// `get_by_hash(resource_id, resource_type, data_hash)`.
    pub async fn get_by_hash(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        data_hash: &str,
    ) -> Result<Option<Snapshot>> {
        match self.store.find_by_hash(resource_id, resource_type, data_hash).await? {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// `list_versions(resource_id, resource_type)`.
    pub async fn list_versions(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<Snapshot>> {
        let rows = self.store.list_versions(resource_id, resource_type).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate(row).await?);
        }
        Ok(out)
    }

    /// `delete_resource(resource_id, resource_type) -> count`. Removes
    /// every version in the chain and best-effort deletes the external
    /// cache blobs they reference; an unknown `resource_id` returns 0,
    /// never an error.
    #[instrument(skip(self))]
    pub async fn delete_resource(&self, resource_id: &str, resource_type: ResourceType) -> Result<u64> {
        let _guard = self.locks.acquire(resource_type, resource_id, None).await?;

        let versions = self.store.list_versions(resource_id, resource_type).await?;
        for row in &versions {
            if let Some(cache_key) = row.document["content_location"]["cache_key"].as_str() {
                if let Some(ns) = row.document["content_location"]["cache_namespace"]
                    .as_str()
                    .and_then(|s| Namespace::parse(s).ok())
                {
                    if let Err(e) = self.cache.delete(ns, cache_key).await {
                        warn!(resource_id, cache_key, error = %e, "best-effort cache blob delete failed");
                    }
                }
            }
        }

        let pointer_key = resource_key(resource_type.as_str(), resource_id, &["latest"]);
        self.cache
            .delete(snapshot_cache_namespace(resource_type), &pointer_key)
            .await
            .ok();

        let count = self.store.delete_all_versions(resource_id, resource_type).await?;
        if count > 0 {
            debug!(resource_id, %resource_type, count, "deleted resource chain");
        }
        Ok(count)
    }

    /// Access to the underlying document store, for modules (e.g. the
    /// corpus subsystem) that need typed-field queries the manager's
    /// own API does not expose, such as "all SearchIndex rows for this
    /// corpus_id".
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    async fn manager() -> VersionManager {
        let mut dir = std::env::temp_dir();
        dir.push(format!("lexistore-vm-test-{}", Uuid::new_v4()));
        let cache = Arc::new(
            CacheManager::new(CacheConfig {
                disk_directory: dir,
                ..CacheConfig::default()
            })
            .unwrap(),
        );
        let store = DocumentStore::connect(crate::store::DocumentStoreConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        VersionManager::new(store, cache)
    }

    #[tokio::test]
    async fn save_then_get_latest_round_trips_hash() {
        let vm = manager().await;
        let content = serde_json::json!({"vocabulary": ["apple", "banana"]});
        let snap = vm
            .save("c1", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();
        assert_eq!(snap.version_info.version, "1.0.0");

        let got = vm
            .get_latest("c1", ResourceType::Corpus, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version_info.data_hash, snap.version_info.data_hash);
    }

    #[tokio::test]
    async fn identical_save_dedups() {
        let vm = manager().await;
        let content = serde_json::json!({"vocabulary": ["apple", "banana"]});
        let s1 = vm
            .save("c1", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();
        let s2 = vm
            .save("c1", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();
        assert_eq!(s1.id, s2.id);

        let versions = vm.list_versions("c1", ResourceType::Corpus).await.unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn force_new_major_bumps_major_and_chains() {
        let vm = manager().await;
        let content = serde_json::json!({"vocabulary": ["apple", "banana"]});
        let s1 = vm
            .save("c1", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();

        let mut cfg = SaveConfig::new();
        cfg.force_new_version = true;
        cfg.force_new_major = true;
        let s2 = vm
            .save("c1", ResourceType::Corpus, Namespace::Corpus, &content, cfg, None)
            .await
            .unwrap();

        assert_eq!(s2.version_info.version, "2.0.0");
        assert_eq!(s2.version_info.supersedes.as_deref(), Some(s1.id.as_str()));

        let reloaded_first = vm
            .get_by_version("c1", ResourceType::Corpus, "1.0.0")
            .await
            .unwrap()
            .unwrap();
        assert!(!reloaded_first.version_info.is_latest);
        assert_eq!(reloaded_first.version_info.superseded_by.as_deref(), Some(s2.id.as_str()));
    }

    #[tokio::test]
    async fn large_content_is_stored_externally_and_retrievable() {
        let vm = manager().await;
        let big_vocab: Vec<String> = (0..5000).map(|i| format!("word{i}")).collect();
        let content = serde_json::json!({"vocabulary": big_vocab});
        let snap = vm
            .save("c-big", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();
        assert_eq!(snap.content_location.storage_type, crate::resource::StorageType::Cache);

        let got = vm
            .get_latest("c-big", ResourceType::Corpus, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.content, content);
    }

    #[tokio::test]
    async fn null_content_is_stored_as_none() {
        let vm = manager().await;
        let snap = vm
            .save("c-empty", ResourceType::Corpus, Namespace::Corpus, &serde_json::Value::Null, SaveConfig::new(), None)
            .await
            .unwrap();
        assert_eq!(snap.content_location.storage_type, crate::resource::StorageType::None);
        assert_eq!(snap.content_inline, None);

        let got = vm
            .get_latest("c-empty", ResourceType::Corpus, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.content, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn repeated_cached_get_latest_succeeds_without_intervening_save() {
        let vm = manager().await;
        let content = serde_json::json!({"vocabulary": ["apple", "banana"]});
        vm.save("c1", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();

        let first = vm.get_latest("c1", ResourceType::Corpus, true).await.unwrap().unwrap();
        let second = vm.get_latest("c1", ResourceType::Corpus, true).await.unwrap().unwrap();
        assert_eq!(first.version_info.data_hash, second.version_info.data_hash);
    }

    #[tokio::test]
    async fn delete_unknown_resource_returns_zero() {
        let vm = manager().await;
        let count = vm.delete_resource("missing", ResourceType::Corpus).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn version_override_must_be_strictly_greater() {
        let vm = manager().await;
        let content = serde_json::json!({"vocabulary": ["apple"]});
        vm.save("c1", ResourceType::Corpus, Namespace::Corpus, &content, SaveConfig::new(), None)
            .await
            .unwrap();

        let mut cfg = SaveConfig::new();
        cfg.force_new_version = true;
        cfg.version_override = Some("0.5.0".to_string());
        let other_content = serde_json::json!({"vocabulary": ["apple", "pear"]});
        let result = vm
            .save("c1", ResourceType::Corpus, Namespace::Corpus, &other_content, cfg, None)
            .await;
        assert!(matches!(result, Err(LexError::InvalidVersion(_))));
    }
}
