//! Optional lemmatization over a normalized vocabulary.
//!
//! Below the sequential/parallel threshold the vocabulary is walked in
//! order on the calling thread; at or above it, `rayon` partitions the
//! work across the global thread pool. Per-language dictionaries are
//! expensive enough to build that they are lazy-initialized on first
//! use rather than at construction — each [`Lemmatizer`] owns its own
//! `OnceCell`, so this is per-instance laziness, not ambient global
//! state.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use rayon::prelude::*;

/// Vocabularies at or above this size are lemmatized in parallel.
pub const PARALLEL_THRESHOLD: usize = 2_000;

/// Language-dependent lemmatizer. Combines a small irregular-forms
/// dictionary with deterministic suffix stripping for the regular case.
pub struct Lemmatizer {
    language: String,
    dictionary: OnceCell<HashMap<&'static str, &'static str>>,
}

impl Lemmatizer {
    pub fn new(language: impl Into<String>) -> Self {
        Lemmatizer {
            language: language.into(),
            dictionary: OnceCell::new(),
        }
    }

    fn dictionary(&self) -> &HashMap<&'static str, &'static str> {
        self.dictionary.get_or_init(|| load_irregular_forms(&self.language))
    }

    /// Lemmatize a single already-normalized word.
    pub fn lemma_of(&self, word: &str) -> String {
        if let Some(irregular) = self.dictionary().get(word) {
            return (*irregular).to_string();
        }
        strip_regular_suffix(word)
    }

    /// Lemmatize a whole vocabulary, producing the unique
    /// insertion-ordered `lemmatized_vocabulary` and the bidirectional
    /// index maps the spec requires.
    pub fn lemmatize_vocabulary(
        &self,
        vocabulary: &[String],
    ) -> (Vec<String>, HashMap<usize, usize>, HashMap<usize, Vec<usize>>) {
        let lemmas: Vec<String> = if vocabulary.len() >= PARALLEL_THRESHOLD {
            vocabulary.par_iter().map(|w| self.lemma_of(w)).collect()
        } else {
            vocabulary.iter().map(|w| self.lemma_of(w)).collect()
        };

        let mut lemmatized_vocabulary = Vec::new();
        let mut lemma_index: HashMap<String, usize> = HashMap::new();
        let mut word_to_lemma_indices = HashMap::new();
        let mut lemma_to_word_indices: HashMap<usize, Vec<usize>> = HashMap::new();

        for (word_idx, lemma) in lemmas.into_iter().enumerate() {
            let lemma_idx = *lemma_index.entry(lemma.clone()).or_insert_with(|| {
                lemmatized_vocabulary.push(lemma);
                lemmatized_vocabulary.len() - 1
            });
            word_to_lemma_indices.insert(word_idx, lemma_idx);
            lemma_to_word_indices.entry(lemma_idx).or_default().push(word_idx);
        }

        (lemmatized_vocabulary, word_to_lemma_indices, lemma_to_word_indices)
    }
}

fn load_irregular_forms(language: &str) -> HashMap<&'static str, &'static str> {
    match language {
        "en" | "english" => HashMap::from([
            ("went", "go"),
            ("gone", "go"),
            ("better", "good"),
            ("best", "good"),
            ("worse", "bad"),
            ("children", "child"),
            ("mice", "mouse"),
            ("geese", "goose"),
        ]),
        _ => HashMap::new(),
    }
}

fn strip_regular_suffix(word: &str) -> String {
    for suffix in ["ies", "es", "ing", "ed", "s"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if !stem.is_empty() {
                if suffix == "ies" {
                    return format!("{stem}y");
                }
                return stem.to_string();
            }
        }
    }
    word.to_string()
}
