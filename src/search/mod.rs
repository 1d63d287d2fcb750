//! The search component built on top of a corpus: exact/fuzzy lookups
//! served synchronously from an in-memory trie and bloom filter, plus a
//! non-blocking background-built semantic layer.

pub mod semantic;
pub mod trie;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Map;
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::Namespace;
use crate::corpus::Corpus;
use crate::error::{LexError, Result};
use crate::keys::content_hash;
use crate::resource::ResourceType;
use crate::version_manager::{SaveConfig, VersionManager};

use semantic::{Embedder, SemanticIndexData};
use trie::{BloomFilter, Trie};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SemanticStatusKind {
    Idle = 0,
    Building = 1,
    Ready = 2,
    Failed = 3,
}

impl From<u8> for SemanticStatusKind {
    fn from(v: u8) -> Self {
        match v {
            1 => SemanticStatusKind::Building,
            2 => SemanticStatusKind::Ready,
            3 => SemanticStatusKind::Failed,
            _ => SemanticStatusKind::Idle,
        }
    }
}

/// `Search.semantic_status()` result.
#[derive(Debug, Clone)]
pub struct SemanticStatus {
    pub enabled: bool,
    pub ready: bool,
    pub building: bool,
    pub vocabulary_size: usize,
    pub model_name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub word: String,
    pub score: f32,
}

/// A search component over one corpus's vocabulary. Not thread-safe for
/// mutation — owned by a single task after construction, per the
/// concurrency model's shared-resource policy.
pub struct Search {
    corpus_id: String,
    vocabulary: Vec<String>,
    trie: Trie,
    bloom: BloomFilter,
    semantic_enabled: bool,
    model_name: Option<String>,
    status: Arc<AtomicU8>,
    message: std::sync::Mutex<String>,
    semantic_data: Arc<AsyncRwLock<Option<SemanticIndexData>>>,
    embedder: Option<Arc<dyn Embedder>>,
    cancel: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Search {
    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    pub fn search_exact(&self, query: &str) -> Vec<SearchResult> {
        let normalized = crate::corpus::normalize::normalize(query);
        if self.bloom.maybe_contains(&normalized) && self.trie.contains(&normalized) {
            vec![SearchResult {
                word: normalized,
                score: 1.0,
            }]
        } else {
            Vec::new()
        }
    }

    pub fn search_fuzzy(&self, query: &str, max_results: usize, min_score: f32) -> Vec<SearchResult> {
        let normalized = crate::corpus::normalize::normalize(query);
        let mut scored: Vec<SearchResult> = self
            .vocabulary
            .iter()
            .map(|word| {
                let distance = trie::edit_distance(&normalized, word);
                let max_len = normalized.chars().count().max(word.chars().count()).max(1);
                let score = 1.0 - (distance as f32 / max_len as f32);
                SearchResult {
                    word: word.clone(),
                    score,
                }
            })
            .filter(|r| r.score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored
    }

    /// Returns an empty list while the semantic layer is not ready,
    /// rather than erroring — per the spec's described behavior for a
    /// background build still in flight.
    pub async fn search_semantic(&self, query: &str, max_results: usize, min_score: f32) -> Vec<SearchResult> {
        if SemanticStatusKind::from(self.status.load(Ordering::Acquire)) != SemanticStatusKind::Ready {
            return Vec::new();
        }
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        let guard = self.semantic_data.read().await;
        let Some(index) = guard.as_ref() else {
            return Vec::new();
        };
        let query_embedding = embedder.embed(&crate::corpus::normalize::normalize(query)).await;
        semantic::search(index, &query_embedding, max_results, min_score)
            .into_iter()
            .map(|(idx, score)| SearchResult {
                word: self.vocabulary[idx].clone(),
                score,
            })
            .collect()
    }

    pub fn semantic_status(&self) -> SemanticStatus {
        let kind = SemanticStatusKind::from(self.status.load(Ordering::Acquire));
        SemanticStatus {
            enabled: self.semantic_enabled,
            ready: kind == SemanticStatusKind::Ready,
            building: kind == SemanticStatusKind::Building,
            vocabulary_size: self.vocabulary.len(),
            model_name: self.model_name.clone(),
            message: self.message.lock().unwrap().clone(),
        }
    }

    /// Test/debug only: block until the semantic layer reaches a
    /// terminal state (ready or failed).
    pub async fn await_semantic_ready(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        // Cooperative cancellation: flip the flag, let the task notice
        // it at its next batch boundary. We do not abort the handle —
        // a detached task that finishes its current batch and exits
        // cleanly is preferable to a hard-killed one that might be
        // mid-write to shared state.
        self.cancel.store(true, Ordering::Relaxed);
    }
}

pub struct SearchManager {
    versions: Arc<VersionManager>,
}

impl SearchManager {
    pub fn new(versions: Arc<VersionManager>) -> Self {
        SearchManager { versions }
    }

    /// `Search.from_corpus(corpus, semantic?)`. Builds trie/bloom and
    /// persists the SearchIndex + TrieIndex metadata synchronously
    /// (~100 ms for realistic vocabularies); if `semantic_enabled`,
    /// launches the embedding build as a background task and returns
    /// immediately — the returned `Search` answers exact/fuzzy queries
    /// right away and reports `semantic_status().building == true`
    /// until the task completes.
    pub async fn from_corpus(
        &self,
        corpus: &Corpus,
        semantic_enabled: bool,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Arc<Search>> {
        let (trie, bloom) = trie::build(&corpus.vocabulary);

        let trie_index_id = self.persist_trie_index(corpus, &trie, &bloom).await?;

        let search_index_id = Uuid::new_v4().to_string();
        let mut search_metadata = Map::new();
        search_metadata.insert("corpus_id".into(), serde_json::Value::String(corpus.corpus_id.clone()));
        search_metadata.insert(
            "corpus_name".into(),
            serde_json::Value::String(corpus.corpus_name.clone()),
        );
        search_metadata.insert(
            "vocabulary_hash".into(),
            serde_json::Value::String(corpus.vocabulary_hash.clone()),
        );
        search_metadata.insert("semantic_enabled".into(), serde_json::Value::Bool(semantic_enabled));
        search_metadata.insert(
            "semantic_model".into(),
            embedder
                .as_ref()
                .map(|e| serde_json::Value::String(e.model_name().to_string()))
                .unwrap_or(serde_json::Value::Null),
        );
        search_metadata.insert(
            "trie_index_id".into(),
            serde_json::Value::String(trie_index_id.clone()),
        );
        search_metadata.insert("semantic_index_id".into(), serde_json::Value::Null);

        self.versions
            .save(
                &search_index_id,
                ResourceType::SearchIndex,
                Namespace::Search,
                &serde_json::json!({"corpus_id": corpus.corpus_id}),
                SaveConfig::new(),
                Some(search_metadata),
            )
            .await?;

        let status = Arc::new(AtomicU8::new(if semantic_enabled {
            SemanticStatusKind::Building as u8
        } else {
            SemanticStatusKind::Idle as u8
        }));
        let cancel = Arc::new(AtomicBool::new(false));
        let semantic_data = Arc::new(AsyncRwLock::new(None));
        let model_name = embedder.as_ref().map(|e| e.model_name().to_string());

        let handle = if semantic_enabled {
            let embedder = embedder.clone().expect("semantic_enabled requires an embedder");
            let vocabulary = corpus.vocabulary.clone();
            let status = status.clone();
            let cancel = cancel.clone();
            let semantic_data = semantic_data.clone();
            let versions = self.versions.clone();
            let corpus_id = corpus.corpus_id.clone();
            let vocabulary_hash = corpus.vocabulary_hash.clone();
            let search_index_id = search_index_id.clone();

            Some(tokio::spawn(async move {
                match semantic::build_semantic_index(&vocabulary, embedder.as_ref(), &cancel).await {
                    Some(index) if index.num_embeddings() > 0 => {
                        match persist_semantic_index(&versions, &corpus_id, &vocabulary_hash, &index).await {
                            Ok(semantic_index_id) => {
                                if let Err(e) =
                                    attach_semantic_index(&versions, &search_index_id, &semantic_index_id).await
                                {
                                    warn!(error = %e, "failed to attach semantic_index_id to search index");
                                }
                                *semantic_data.write().await = Some(index);
                                status.store(SemanticStatusKind::Ready as u8, Ordering::Release);
                            }
                            Err(e) => {
                                error!(error = %e, "semantic index persistence failed");
                                status.store(SemanticStatusKind::Failed as u8, Ordering::Release);
                            }
                        }
                    }
                    Some(_) => {
                        debug!("semantic build produced zero embeddings, not persisting");
                        status.store(SemanticStatusKind::Failed as u8, Ordering::Release);
                    }
                    None => {
                        debug!("semantic build cancelled");
                        status.store(SemanticStatusKind::Idle as u8, Ordering::Release);
                    }
                }
            }))
        } else {
            None
        };

        Ok(Arc::new(Search {
            corpus_id: corpus.corpus_id.clone(),
            vocabulary: corpus.vocabulary.clone(),
            trie,
            bloom,
            semantic_enabled,
            model_name,
            status,
            message: std::sync::Mutex::new(String::new()),
            semantic_data,
            embedder,
            cancel,
            handle: std::sync::Mutex::new(handle),
        }))
    }

    async fn persist_trie_index(&self, corpus: &Corpus, trie: &Trie, bloom: &BloomFilter) -> Result<String> {
        let trie_bytes = bincode::serialize(trie)
            .map_err(|e| LexError::Backend(format!("trie serialize failed: {e}")))?;
        let bloom_bytes = bincode::serialize(bloom)
            .map_err(|e| LexError::Backend(format!("bloom filter serialize failed: {e}")))?;
        let trie_b64 = BASE64.encode(&trie_bytes);
        let bloom_b64 = BASE64.encode(&bloom_bytes);
        let checksum = content_hash(&format!("{trie_b64}:{bloom_b64}"));

        let content = serde_json::json!({
            "trie_blob": trie_b64,
            "bloom_blob": bloom_b64,
            "checksum": checksum,
        });

        let trie_index_id = Uuid::new_v4().to_string();
        let mut metadata = Map::new();
        metadata.insert("corpus_id".into(), serde_json::Value::String(corpus.corpus_id.clone()));
        metadata.insert(
            "vocabulary_hash".into(),
            serde_json::Value::String(corpus.vocabulary_hash.clone()),
        );
        metadata.insert("num_entries".into(), serde_json::Value::from(corpus.vocabulary.len()));

        self.versions
            .save(
                &trie_index_id,
                ResourceType::TrieIndex,
                Namespace::Trie,
                &content,
                SaveConfig::new(),
                Some(metadata),
            )
            .await?;
        Ok(trie_index_id)
    }

    /// Load a persisted trie index and verify its checksum (§4.6.6).
    pub async fn load_trie_index(&self, trie_index_id: &str) -> Result<Option<(Trie, BloomFilter)>> {
        let Some(snapshot) = self.versions.get_latest(trie_index_id, ResourceType::TrieIndex, true).await? else {
            return Ok(None);
        };
        let trie_b64 = snapshot.content["trie_blob"]
            .as_str()
            .ok_or_else(|| LexError::CorruptedCache("trie index missing trie_blob".into()))?;
        let bloom_b64 = snapshot.content["bloom_blob"]
            .as_str()
            .ok_or_else(|| LexError::CorruptedCache("trie index missing bloom_blob".into()))?;
        let expected_checksum = snapshot.content["checksum"]
            .as_str()
            .ok_or_else(|| LexError::CorruptedCache("trie index missing checksum".into()))?;

        let actual_checksum = content_hash(&format!("{trie_b64}:{bloom_b64}"));
        if actual_checksum != expected_checksum {
            return Err(LexError::CorruptedCache(format!(
                "trie index {trie_index_id} failed checksum verification"
            )));
        }

        let trie_bytes = BASE64
            .decode(trie_b64)
            .map_err(|e| LexError::CorruptedCache(format!("trie_blob undecodable base64: {e}")))?;
        let bloom_bytes = BASE64
            .decode(bloom_b64)
            .map_err(|e| LexError::CorruptedCache(format!("bloom_blob undecodable base64: {e}")))?;
        let trie: Trie = bincode::deserialize(&trie_bytes)
            .map_err(|e| LexError::CorruptedCache(format!("trie undecodable: {e}")))?;
        let bloom: BloomFilter = bincode::deserialize(&bloom_bytes)
            .map_err(|e| LexError::CorruptedCache(format!("bloom filter undecodable: {e}")))?;
        Ok(Some((trie, bloom)))
    }

    /// `SearchIndex.delete()`: cascades to the referenced trie and
    /// semantic indices, best-effort, then deletes the search index
    /// itself. Returns the total number of documents removed.
    pub async fn delete(&self, search_index_id: &str) -> Result<u64> {
        let mut total = 0u64;
        if let Some(snapshot) = self
            .versions
            .get_latest(search_index_id, ResourceType::SearchIndex, false)
            .await?
        {
            if let Some(trie_id) = snapshot.typed_fields.get("trie_index_id").and_then(|v| v.as_str()) {
                match self.versions.delete_resource(trie_id, ResourceType::TrieIndex).await {
                    Ok(n) => total += n,
                    Err(e) => warn!(trie_id, error = %e, "best-effort trie index delete failed"),
                }
            }
            if let Some(semantic_id) = snapshot
                .typed_fields
                .get("semantic_index_id")
                .and_then(|v| v.as_str())
            {
                match self
                    .versions
                    .delete_resource(semantic_id, ResourceType::SemanticIndex)
                    .await
                {
                    Ok(n) => total += n,
                    Err(e) => warn!(semantic_id, error = %e, "best-effort semantic index delete failed"),
                }
            }
        }
        total += self
            .versions
            .delete_resource(search_index_id, ResourceType::SearchIndex)
            .await?;
        Ok(total)
    }
}

async fn persist_semantic_index(
    versions: &VersionManager,
    corpus_id: &str,
    vocabulary_hash: &str,
    index: &SemanticIndexData,
) -> Result<String> {
    let matrix_bytes =
        bincode::serialize(&index.embeddings).map_err(|e| LexError::Backend(format!("embedding matrix serialize failed: {e}")))?;
    // No ANN library is part of this subsystem's stack (see module doc);
    // the "ANN blob" is the same matrix, so a load can brute-force
    // search it without a second round trip.
    let matrix_b64 = BASE64.encode(&matrix_bytes);
    let checksum = content_hash(&matrix_b64);

    let content = serde_json::json!({
        "matrix_blob": matrix_b64,
        "ann_blob": matrix_b64,
        "checksum": checksum,
    });

    let semantic_index_id = Uuid::new_v4().to_string();
    let mut metadata = Map::new();
    metadata.insert("corpus_id".into(), serde_json::Value::String(corpus_id.to_string()));
    metadata.insert("model_name".into(), serde_json::Value::String(index.model_name.clone()));
    metadata.insert(
        "vocabulary_hash".into(),
        serde_json::Value::String(vocabulary_hash.to_string()),
    );
    metadata.insert(
        "embedding_dimension".into(),
        serde_json::Value::from(index.embedding_dimension),
    );
    metadata.insert("index_type".into(), serde_json::Value::String("brute_force_cosine".into()));
    metadata.insert("num_embeddings".into(), serde_json::Value::from(index.num_embeddings()));

    versions
        .save(
            &semantic_index_id,
            ResourceType::SemanticIndex,
            Namespace::Semantic,
            &content,
            SaveConfig::new(),
            Some(metadata),
        )
        .await?;
    Ok(semantic_index_id)
}

async fn attach_semantic_index(versions: &VersionManager, search_index_id: &str, semantic_index_id: &str) -> Result<()> {
    let Some(snapshot) = versions
        .get_latest(search_index_id, ResourceType::SearchIndex, false)
        .await?
    else {
        return Ok(());
    };
    let mut metadata = snapshot.typed_fields.clone();
    metadata.insert(
        "semantic_index_id".into(),
        serde_json::Value::String(semantic_index_id.to_string()),
    );
    versions
        .save(
            search_index_id,
            ResourceType::SearchIndex,
            Namespace::parse(&snapshot.namespace)?,
            &snapshot.content,
            SaveConfig {
                force_new_version: true,
                ..SaveConfig::new()
            },
            Some(metadata),
        )
        .await?;
    Ok(())
}

/// Load a persisted semantic index and verify its checksum, rejecting a
/// zero-embedding row as an invalid cached build (§4.6.5).
pub async fn load_semantic_index(versions: &VersionManager, semantic_index_id: &str) -> Result<Option<SemanticIndexData>> {
    let Some(snapshot) = versions
        .get_latest(semantic_index_id, ResourceType::SemanticIndex, true)
        .await?
    else {
        return Ok(None);
    };

    let num_embeddings = snapshot
        .typed_fields
        .get("num_embeddings")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if num_embeddings == 0 {
        warn!(semantic_index_id, "zero-embedding semantic index metadata is not a valid cached build");
        return Ok(None);
    }

    let matrix_b64 = snapshot.content["matrix_blob"]
        .as_str()
        .ok_or_else(|| LexError::CorruptedCache("semantic index missing matrix_blob".into()))?;
    let expected_checksum = snapshot.content["checksum"]
        .as_str()
        .ok_or_else(|| LexError::CorruptedCache("semantic index missing checksum".into()))?;
    if content_hash(matrix_b64) != expected_checksum {
        return Err(LexError::CorruptedCache(format!(
            "semantic index {semantic_index_id} failed checksum verification"
        )));
    }

    let matrix_bytes = BASE64
        .decode(matrix_b64)
        .map_err(|e| LexError::CorruptedCache(format!("matrix_blob undecodable base64: {e}")))?;
    let embeddings: Vec<Vec<f32>> = bincode::deserialize(&matrix_bytes)
        .map_err(|e| LexError::CorruptedCache(format!("embedding matrix undecodable: {e}")))?;

    let model_name = snapshot
        .typed_fields
        .get("model_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let embedding_dimension = snapshot
        .typed_fields
        .get("embedding_dimension")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    Ok(Some(SemanticIndexData {
        model_name,
        embedding_dimension,
        embeddings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheManager};
    use crate::corpus::{CorpusManager, CreateCorpusInput};
    use crate::resource::CorpusType;
    use crate::store::{DocumentStore, DocumentStoreConfig};

    async fn managers() -> (CorpusManager, SearchManager) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("lexistore-search-test-{}", Uuid::new_v4()));
        let cache = Arc::new(
            CacheManager::new(CacheConfig {
                disk_directory: dir,
                ..CacheConfig::default()
            })
            .unwrap(),
        );
        let store = DocumentStore::connect(DocumentStoreConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        let versions = Arc::new(VersionManager::new(store, cache));
        (CorpusManager::new(versions.clone()), SearchManager::new(versions))
    }

    #[tokio::test]
    async fn exact_and_fuzzy_work_immediately_without_semantic() {
        let (corpus_mgr, search_mgr) = managers().await;
        let corpus = corpus_mgr
            .create(CreateCorpusInput {
                words: vec![("apple".into(), "en".into()), ("application".into(), "en".into())],
                corpus_name: "c".into(),
                corpus_type: CorpusType::Lexicon,
                language: "en".into(),
                is_master: false,
                parent_corpus_id: None,
            })
            .await
            .unwrap();

        let search = search_mgr.from_corpus(&corpus, false, None).await.unwrap();
        assert_eq!(search.search_exact("apple").len(), 1);
        assert!(search.search_exact("missing").is_empty());

        let fuzzy = search.search_fuzzy("appel", 5, 0.5);
        assert!(fuzzy.iter().any(|r| r.word == "apple"));

        let status = search.semantic_status();
        assert!(!status.enabled);
        assert!(!status.building);
        assert!(!status.ready);
    }

    #[tokio::test]
    async fn non_blocking_semantic_build_becomes_ready() {
        let (corpus_mgr, search_mgr) = managers().await;
        let words: Vec<(String, String)> = (0..50).map(|i| (format!("word{i}"), "en".to_string())).collect();
        let corpus = corpus_mgr
            .create(CreateCorpusInput {
                words,
                corpus_name: "c".into(),
                corpus_type: CorpusType::Lexicon,
                language: "en".into(),
                is_master: false,
                parent_corpus_id: None,
            })
            .await
            .unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(semantic::HashEmbedder::new(8));
        let search = search_mgr.from_corpus(&corpus, true, Some(embedder)).await.unwrap();

        assert!(!search.search_exact("word0").is_empty());
        let initial_status = search.semantic_status();
        assert!(initial_status.building || initial_status.ready);

        search.await_semantic_ready().await;
        let status = search.semantic_status();
        assert!(status.ready);

        let semantic_results = search.search_semantic("word0", 5, -1.0).await;
        assert!(!semantic_results.is_empty());
    }
}
