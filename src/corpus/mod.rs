//! The hierarchical corpus subsystem: corpus construction, master/child
//! vocabulary aggregation, and cascade deletion across the
//! Corpus → SearchIndex → {TrieIndex, SemanticIndex} reference graph.

pub mod lemmatize;
pub mod normalize;
pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::Namespace;
use crate::error::{LexError, Result};
use crate::keys::content_hash;
use crate::resource::{CorpusType, ResourceType, Snapshot};
use crate::version_manager::{SaveConfig, VersionManager};

/// The in-memory corpus entity: the Corpus metadata document's typed
/// fields plus the derived indices computed from its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub corpus_id: String,
    pub corpus_name: String,
    pub corpus_type: CorpusType,
    pub language: String,
    pub is_master: bool,
    pub parent_corpus_id: Option<String>,
    pub child_corpus_ids: Vec<String>,

    pub vocabulary: Vec<String>,
    pub original_vocabulary: HashMap<String, String>,
    pub lemmatized_vocabulary: Vec<String>,
    pub word_to_lemma_indices: HashMap<usize, usize>,
    pub lemma_to_word_indices: HashMap<usize, Vec<usize>>,
    pub signature_buckets: HashMap<String, Vec<usize>>,
    pub length_buckets: HashMap<usize, Vec<usize>>,
    pub vocabulary_hash: String,
}

/// `SHA-256(join("\n", sorted-unique-normalized-vocabulary))`.
///
/// Two vocabularies equal as sets hash identically regardless of
/// insertion order, since the join sorts first (invariant 6 / testable
/// property 7).
pub fn vocabulary_hash(vocabulary: &[String]) -> String {
    let mut sorted: Vec<&str> = vocabulary.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    content_hash(&sorted.join("\n"))
}

fn derive_indices(
    vocabulary: &[String],
    language: &str,
) -> (
    Vec<String>,
    HashMap<usize, usize>,
    HashMap<usize, Vec<usize>>,
    HashMap<String, Vec<usize>>,
    HashMap<usize, Vec<usize>>,
) {
    let lemmatizer = lemmatize::Lemmatizer::new(language);
    let (lemmatized_vocabulary, word_to_lemma_indices, lemma_to_word_indices) =
        lemmatizer.lemmatize_vocabulary(vocabulary);
    let (signature_buckets, length_buckets) = signature::build_indices(vocabulary);
    (
        lemmatized_vocabulary,
        word_to_lemma_indices,
        lemma_to_word_indices,
        signature_buckets,
        length_buckets,
    )
}

impl Corpus {
    fn typed_metadata(&self) -> Map<String, serde_json::Value> {
        let mut m = Map::new();
        m.insert("corpus_name".into(), serde_json::Value::String(self.corpus_name.clone()));
        m.insert("corpus_type".into(), serde_json::to_value(self.corpus_type).unwrap());
        m.insert("language".into(), serde_json::Value::String(self.language.clone()));
        m.insert("vocabulary_hash".into(), serde_json::Value::String(self.vocabulary_hash.clone()));
        m.insert("vocabulary_size".into(), serde_json::Value::from(self.vocabulary.len()));
        m.insert("is_master".into(), serde_json::Value::Bool(self.is_master));
        m.insert(
            "parent_corpus_id".into(),
            self.parent_corpus_id
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
        m.insert(
            "child_corpus_ids".into(),
            serde_json::Value::Array(
                self.child_corpus_ids
                    .iter()
                    .map(|c| serde_json::Value::String(c.clone()))
                    .collect(),
            ),
        );
        m
    }

    fn from_snapshot(snapshot: &Snapshot) -> Result<Corpus> {
        serde_json::from_value(snapshot.content.clone())
            .map_err(|e| LexError::CorruptedCache(format!("corpus content undecodable: {e}")))
    }
}

/// Input to [`CorpusManager::create`].
pub struct CreateCorpusInput {
    pub words: Vec<(String, String)>,
    pub corpus_name: String,
    pub corpus_type: CorpusType,
    pub language: String,
    pub is_master: bool,
    pub parent_corpus_id: Option<String>,
}

pub struct CorpusManager {
    versions: Arc<VersionManager>,
}

impl CorpusManager {
    pub fn new(versions: Arc<VersionManager>) -> Self {
        CorpusManager { versions }
    }

    /// `Corpus.create(vocabulary, corpus_name, language, is_master?, parent?) → Corpus`.
    pub async fn create(&self, input: CreateCorpusInput) -> Result<Corpus> {
        let corpus_id = Uuid::new_v4().to_string();

        // Master-corpus rule: a master's vocabulary is never directly
        // populated; it starts empty and is filled only by aggregation.
        let (vocabulary, original_vocabulary) = if input.is_master {
            (Vec::new(), HashMap::new())
        } else {
            normalize::build_vocabulary(&input.words)
        };

        let (lemmatized_vocabulary, word_to_lemma_indices, lemma_to_word_indices, signature_buckets, length_buckets) =
            derive_indices(&vocabulary, &input.language);
        let hash = vocabulary_hash(&vocabulary);

        let corpus = Corpus {
            corpus_id: corpus_id.clone(),
            corpus_name: input.corpus_name,
            corpus_type: input.corpus_type,
            language: input.language,
            is_master: input.is_master,
            parent_corpus_id: input.parent_corpus_id.clone(),
            child_corpus_ids: Vec::new(),
            vocabulary,
            original_vocabulary,
            lemmatized_vocabulary,
            word_to_lemma_indices,
            lemma_to_word_indices,
            signature_buckets,
            length_buckets,
            vocabulary_hash: hash,
        };

        self.persist(&corpus).await?;

        if let Some(parent_id) = &input.parent_corpus_id {
            self.append_child(parent_id, &corpus_id).await?;
        }

        Ok(corpus)
    }

    async fn persist(&self, corpus: &Corpus) -> Result<Snapshot> {
        let content = serde_json::to_value(corpus)?;
        self.versions
            .save(
                &corpus.corpus_id,
                ResourceType::Corpus,
                Namespace::Corpus,
                &content,
                SaveConfig::new(),
                Some(corpus.typed_metadata()),
            )
            .await
    }

    async fn append_child(&self, parent_id: &str, child_id: &str) -> Result<()> {
        let Some(snapshot) = self.versions.get_latest(parent_id, ResourceType::Corpus, true).await? else {
            warn!(parent_id, child_id, "parent corpus not found while linking child");
            return Ok(());
        };
        let mut parent = Corpus::from_snapshot(&snapshot)?;
        if !parent.child_corpus_ids.iter().any(|c| c == child_id) {
            parent.child_corpus_ids.push(child_id.to_string());
            self.persist(&parent).await?;
        }
        Ok(())
    }

    /// Clear `child_id`'s `parent_corpus_id`, preserving its vocabulary
    /// and every other field — the inverse of [`Self::append_child`],
    /// invoked when the parent is deleted (§9 Open Question resolution
    /// on cascade-deletion scope: children are detached, not removed).
    async fn detach_child(&self, child_id: &str) -> Result<()> {
        let Some(snapshot) = self.versions.get_latest(child_id, ResourceType::Corpus, true).await? else {
            return Ok(());
        };
        let mut child = Corpus::from_snapshot(&snapshot)?;
        if child.parent_corpus_id.is_some() {
            child.parent_corpus_id = None;
            self.persist(&child).await?;
        }
        Ok(())
    }

    /// `Corpus.get(corpus_id? | corpus_name?, config?) → Corpus?`.
    ///
    /// Prefers the opaque identifier when present; falls back to name.
    pub async fn get(&self, corpus_id: Option<&str>, corpus_name: Option<&str>) -> Result<Option<Corpus>> {
        if let Some(id) = corpus_id {
            if let Some(snapshot) = self.versions.get_latest(id, ResourceType::Corpus, true).await? {
                return Ok(Some(Corpus::from_snapshot(&snapshot)?));
            }
        }
        if let Some(name) = corpus_name {
            let rows = self
                .versions
                .store()
                .find_latest_by_field(ResourceType::Corpus, "corpus_name", name)
                .await?;
            if let Some(row) = rows.into_iter().next() {
                if let Some(snapshot) = self
                    .versions
                    .get_latest(&row.resource_id, ResourceType::Corpus, true)
                    .await?
                {
                    return Ok(Some(Corpus::from_snapshot(&snapshot)?));
                }
            }
        }
        debug!(?corpus_id, ?corpus_name, "corpus not found by id or name");
        Ok(None)
    }

    /// `Corpus.save() → Corpus`: persist the corpus's current in-memory
    /// state as a new version (or return the existing one unchanged, if
    /// nothing about its content actually changed).
    pub async fn save(&self, corpus: &Corpus) -> Result<Corpus> {
        self.persist(corpus).await?;
        Ok(corpus.clone())
    }

    /// `Corpus.add_words(words) → void`.
    pub async fn add_words(&self, corpus: &mut Corpus, words: &[String]) -> Result<()> {
        if corpus.is_master {
            return Err(LexError::InvalidArgument(
                "a master corpus's vocabulary is populated only by aggregation".into(),
            ));
        }
        for word in words {
            let normalized = normalize::normalize(word);
            if normalized.is_empty() {
                continue;
            }
            corpus
                .original_vocabulary
                .entry(normalized.clone())
                .or_insert_with(|| word.clone());
            if !corpus.vocabulary.contains(&normalized) {
                corpus.vocabulary.push(normalized);
            }
        }
        self.recompute_derived(corpus);
        self.persist(corpus).await?;
        Ok(())
    }

    /// `Corpus.remove_words(words) → void`.
    pub async fn remove_words(&self, corpus: &mut Corpus, words: &[String]) -> Result<()> {
        if corpus.is_master {
            return Err(LexError::InvalidArgument(
                "a master corpus's vocabulary is populated only by aggregation".into(),
            ));
        }
        let normalized_to_remove: std::collections::HashSet<String> =
            words.iter().map(|w| normalize::normalize(w)).collect();
        corpus.vocabulary.retain(|w| !normalized_to_remove.contains(w));
        corpus
            .original_vocabulary
            .retain(|k, _| !normalized_to_remove.contains(k));
        self.recompute_derived(corpus);
        self.persist(corpus).await?;
        Ok(())
    }

    fn recompute_derived(&self, corpus: &mut Corpus) {
        let (lemmatized_vocabulary, word_to_lemma_indices, lemma_to_word_indices, signature_buckets, length_buckets) =
            derive_indices(&corpus.vocabulary, &corpus.language);
        corpus.lemmatized_vocabulary = lemmatized_vocabulary;
        corpus.word_to_lemma_indices = word_to_lemma_indices;
        corpus.lemma_to_word_indices = lemma_to_word_indices;
        corpus.signature_buckets = signature_buckets;
        corpus.length_buckets = length_buckets;
        corpus.vocabulary_hash = vocabulary_hash(&corpus.vocabulary);
    }

    /// `CorpusManager.aggregate_vocabularies(corpus_id, update_parent?) → sequence<string>`.
    ///
    /// Resolves all children in one batched pass (never recursively
    /// aggregating through a child), unions and sorts their
    /// vocabularies, rebuilds the master's derived indices, and — when
    /// `update_parent` — saves the master. Saving is naturally a no-op
    /// version-wise when the aggregated vocabulary hash is unchanged
    /// (ordinary save-path deduplication), so callers may aggregate
    /// idempotently.
    pub async fn aggregate_vocabularies(&self, corpus_id: &str, update_parent: bool) -> Result<Vec<String>> {
        let Some(snapshot) = self.versions.get_latest(corpus_id, ResourceType::Corpus, true).await? else {
            return Err(LexError::NotFound(format!("corpus {corpus_id} not found")));
        };
        let mut master = Corpus::from_snapshot(&snapshot)?;

        // Children are resolved as one concurrent batch, not sequentially:
        // the whole point of aggregating "in one batched pass" (rather than
        // folding per-source) is that the children's reads don't serialize
        // behind each other.
        let fetches = master.child_corpus_ids.iter().map(|child_id| {
            let versions = self.versions.clone();
            let child_id = child_id.clone();
            async move {
                let result = versions.get_latest(&child_id, ResourceType::Corpus, true).await;
                (child_id, result)
            }
        });

        let mut union: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (child_id, result) in join_all(fetches).await {
            match result? {
                Some(child_snapshot) => {
                    let child = Corpus::from_snapshot(&child_snapshot)?;
                    union.extend(child.vocabulary);
                }
                None => {
                    warn!(corpus_id, child_id, "dangling child_corpus_id reference, skipping");
                }
            }
        }

        let mut aggregated: Vec<String> = union.into_iter().collect();
        aggregated.sort_unstable();
        aggregated.dedup();

        self.recompute_derived_for_vocabulary(&mut master, aggregated.clone());

        if update_parent {
            self.persist(&master).await?;
        }

        Ok(aggregated)
    }

    fn recompute_derived_for_vocabulary(&self, corpus: &mut Corpus, vocabulary: Vec<String>) {
        corpus.vocabulary = vocabulary;
        self.recompute_derived(corpus);
    }

    /// `Corpus.delete() → int`. Cascades Corpus → SearchIndex →
    /// {TrieIndex, SemanticIndex}; best-effort (a failed child deletion
    /// is logged and does not abort the parent deletion); an unknown
    /// `corpus_id` deletes nothing and returns 0.
    ///
    /// Child *corpora* are never cascaded (Open Question resolution #4):
    /// they are independently-owned resources, so each is detached —
    /// its `parent_corpus_id` is cleared — rather than deleted.
    pub async fn delete(&self, corpus_id: &str) -> Result<u64> {
        if corpus_id.is_empty() {
            return Err(LexError::InvalidArgument("corpus_id must be set to delete a corpus".into()));
        }

        if let Ok(Some(snapshot)) = self.versions.get_latest(corpus_id, ResourceType::Corpus, true).await {
            if let Ok(corpus) = Corpus::from_snapshot(&snapshot) {
                for child_id in &corpus.child_corpus_ids {
                    if let Err(e) = self.detach_child(child_id).await {
                        warn!(corpus_id, child_id, error = %e, "best-effort child corpus detach failed");
                    }
                }
            }
        }

        let mut total = 0u64;

        let search_indices = self
            .versions
            .store()
            .find_latest_by_field(ResourceType::SearchIndex, "corpus_id", corpus_id)
            .await
            .unwrap_or_default();

        for search_index in search_indices {
            let search_doc = &search_index.document;
            if let Some(trie_id) = search_doc.get("trie_index_id").and_then(|v| v.as_str()) {
                match self.versions.delete_resource(trie_id, ResourceType::TrieIndex).await {
                    Ok(n) => total += n,
                    Err(e) => warn!(corpus_id, trie_id, error = %e, "best-effort trie index delete failed"),
                }
            }
            if let Some(semantic_id) = search_doc.get("semantic_index_id").and_then(|v| v.as_str()) {
                match self
                    .versions
                    .delete_resource(semantic_id, ResourceType::SemanticIndex)
                    .await
                {
                    Ok(n) => total += n,
                    Err(e) => warn!(corpus_id, semantic_id, error = %e, "best-effort semantic index delete failed"),
                }
            }
            match self
                .versions
                .delete_resource(&search_index.resource_id, ResourceType::SearchIndex)
                .await
            {
                Ok(n) => total += n,
                Err(e) => warn!(corpus_id, search_index = %search_index.resource_id, error = %e, "best-effort search index delete failed"),
            }
        }

        total += self.versions.delete_resource(corpus_id, ResourceType::Corpus).await?;
        Ok(total)
    }
}
