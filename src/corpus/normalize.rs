//! Word normalization: Unicode NFKD decomposition, combining-mark
//! stripping, case-folding, and whitespace collapse.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a single word. Idempotent: `normalize(normalize(w)) == normalize(w)`
/// for any `w`, since the output is already fully decomposed, mark-free,
/// lowercase, and single-spaced.
pub fn normalize(word: &str) -> String {
    let decomposed: String = word.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let folded = decomposed.to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deduplicate a sequence of `(original_word, language)` pairs into the
/// insertion-ordered unique normalized vocabulary, plus a map from each
/// normalized form back to the first original form seen for it
/// (preserving diacritics for display).
pub fn build_vocabulary(words: &[(String, String)]) -> (Vec<String>, std::collections::HashMap<String, String>) {
    let mut vocabulary = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut original_forms = std::collections::HashMap::new();

    for (original, _language) in words {
        let normalized = normalize(original);
        if normalized.is_empty() {
            continue;
        }
        original_forms.entry(normalized.clone()).or_insert_with(|| original.clone());
        if seen.insert(normalized.clone()) {
            vocabulary.push(normalized);
        }
    }
    (vocabulary, original_forms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for w in ["café", "cafe\u{0301}", "  Hello   World  ", "ÜBER"] {
            let once = normalize(w);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {w:?}");
        }
    }

    #[test]
    fn nfc_and_decomposed_forms_normalize_identically() {
        assert_eq!(normalize("café"), normalize("cafe\u{0301}"));
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(normalize("  Hello   World  "), "hello world");
    }

    #[test]
    fn build_vocabulary_dedupes_and_preserves_first_original_form() {
        let words = vec![
            ("café".to_string(), "en".to_string()),
            ("cafe\u{0301}".to_string(), "en".to_string()),
            ("tea".to_string(), "en".to_string()),
        ];
        let (vocab, originals) = build_vocabulary(&words);
        assert_eq!(vocab, vec!["cafe".to_string(), "tea".to_string()]);
        assert_eq!(originals.get("cafe").unwrap(), "café");
    }
}
