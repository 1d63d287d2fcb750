//! Resource types, the version envelope, and the typed-field schema
//! registry.
//!
//! The source this subsystem is modeled on used runtime reflection over
//! a nested-class-per-resource-type hierarchy to decide which caller
//! metadata keys are "typed" (first-class document fields) versus
//! "overflow" (the generic metadata bag). Here that becomes a sum type:
//! [`ResourceType`] is the discriminator, [`TypedFields`] is the
//! variant-specific record, and [`ResourceType::typed_field_names`] is
//! the compile-time schema a new field is added to — the orchestrator
//! (`version_manager`) never hard-codes a field list.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::serialize::CompressionAlgorithm;

/// The seven resource kinds this subsystem versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Corpus,
    SearchIndex,
    TrieIndex,
    SemanticIndex,
    DictionaryEntry,
    LiteratureEntry,
    LanguageEntry,
}

impl ResourceType {
    /// The string value persisted for this variant. Equal across saves
    /// and reloads; never the in-memory discriminant's numeric value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Corpus => "corpus",
            ResourceType::SearchIndex => "search_index",
            ResourceType::TrieIndex => "trie_index",
            ResourceType::SemanticIndex => "semantic_index",
            ResourceType::DictionaryEntry => "dictionary_entry",
            ResourceType::LiteratureEntry => "literature_entry",
            ResourceType::LanguageEntry => "language_entry",
        }
    }

    /// The typed field names recognized at the top level of this
    /// resource type's document. Adding a field here is the entire cost
    /// of introducing a new typed field — no other module needs to
    /// change.
    pub fn typed_field_names(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Corpus => &[
                "corpus_name",
                "corpus_type",
                "language",
                "vocabulary_hash",
                "vocabulary_size",
                "is_master",
                "parent_corpus_id",
                "child_corpus_ids",
            ],
            ResourceType::SearchIndex => &[
                "corpus_id",
                "corpus_name",
                "vocabulary_hash",
                "semantic_enabled",
                "semantic_model",
                "trie_index_id",
                "semantic_index_id",
            ],
            ResourceType::TrieIndex => &["corpus_id", "vocabulary_hash", "num_entries"],
            ResourceType::SemanticIndex => &[
                "corpus_id",
                "model_name",
                "vocabulary_hash",
                "embedding_dimension",
                "index_type",
                "num_embeddings",
            ],
            ResourceType::DictionaryEntry => &["provider", "word", "language"],
            ResourceType::LiteratureEntry => &["provider", "work_id"],
            ResourceType::LanguageEntry => &["provider", "source_name", "language"],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `corpus_type` values for the Corpus resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusType {
    Lexicon,
    Language,
    Literature,
}

/// Embedded per-version metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
    pub is_latest: bool,
    pub supersedes: Option<String>,
    pub superseded_by: Option<String>,
}

/// Where a document's content actually lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Inline,
    Cache,
    None,
}

/// Pointer to externally-stored content, present when
/// `storage_type = cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentLocation {
    pub storage_type: StorageType,
    pub cache_namespace: Option<String>,
    pub cache_key: Option<String>,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub compression: Option<CompressionAlgorithm>,
}

impl ContentLocation {
    pub fn none() -> Self {
        ContentLocation {
            storage_type: StorageType::None,
            cache_namespace: None,
            cache_key: None,
            size_bytes: None,
            checksum: None,
            compression: None,
        }
    }

    pub fn inline() -> Self {
        ContentLocation {
            storage_type: StorageType::Inline,
            ..ContentLocation::none()
        }
    }
}

/// One fully-hydrated immutable version of a resource.
///
/// The unit returned by `save`/`get_*`; see the glossary entry this name
/// is taken from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub namespace: String,
    pub version_info: VersionInfo,
    pub content: Value,
    pub content_location: ContentLocation,
    pub ttl: Option<i64>,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
    pub typed_fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_round_trips_through_serde() {
        for rt in [
            ResourceType::Corpus,
            ResourceType::SearchIndex,
            ResourceType::TrieIndex,
            ResourceType::SemanticIndex,
            ResourceType::DictionaryEntry,
            ResourceType::LiteratureEntry,
            ResourceType::LanguageEntry,
        ] {
            let s = serde_json::to_string(&rt).unwrap();
            let back: ResourceType = serde_json::from_str(&s).unwrap();
            assert_eq!(rt, back);
            assert_eq!(s.trim_matches('"'), rt.as_str());
        }
    }

    #[test]
    fn typed_field_names_cover_documented_schema() {
        assert!(ResourceType::Corpus.typed_field_names().contains(&"vocabulary_hash"));
        assert!(ResourceType::SearchIndex
            .typed_field_names()
            .contains(&"semantic_index_id"));
    }
}
