//! Signature and length bucket indices over a normalized vocabulary.
//!
//! A word's signature is the sorted multiset of its characters — cheap
//! to compute, deterministic, and groups anagram-like words together
//! for fast approximate lookups upstream of this subsystem. Vocabularies
//! at or above the parallel threshold are chunked and built
//! independently before merging, rather than built under one lock, to
//! keep the build off the critical path for large corpora.

use std::collections::HashMap;

use rayon::prelude::*;

/// Vocabularies at or above this size build the signature index in
/// parallel, chunked across the thread pool.
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// The sorted-character signature of a normalized word.
pub fn signature_of(word: &str) -> String {
    let mut chars: Vec<char> = word.chars().collect();
    chars.sort_unstable();
    chars.into_iter().collect()
}

/// Build `signature_buckets` (signature -> vocabulary indices) and
/// `length_buckets` (char count -> vocabulary indices) for a normalized
/// vocabulary.
pub fn build_indices(
    vocabulary: &[String],
) -> (HashMap<String, Vec<usize>>, HashMap<usize, Vec<usize>>) {
    if vocabulary.len() >= PARALLEL_THRESHOLD {
        build_indices_parallel(vocabulary)
    } else {
        build_indices_sequential(vocabulary)
    }
}

fn build_indices_sequential(
    vocabulary: &[String],
) -> (HashMap<String, Vec<usize>>, HashMap<usize, Vec<usize>>) {
    let mut signature_buckets: HashMap<String, Vec<usize>> = HashMap::new();
    let mut length_buckets: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, word) in vocabulary.iter().enumerate() {
        signature_buckets.entry(signature_of(word)).or_default().push(idx);
        length_buckets.entry(word.chars().count()).or_default().push(idx);
    }
    (signature_buckets, length_buckets)
}

fn build_indices_parallel(
    vocabulary: &[String],
) -> (HashMap<String, Vec<usize>>, HashMap<usize, Vec<usize>>) {
    const CHUNK_SIZE: usize = 2_000;

    let partials: Vec<(HashMap<String, Vec<usize>>, HashMap<usize, Vec<usize>>)> = vocabulary
        .par_chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(chunk_idx, chunk)| {
            let base = chunk_idx * CHUNK_SIZE;
            let mut sig: HashMap<String, Vec<usize>> = HashMap::new();
            let mut len: HashMap<usize, Vec<usize>> = HashMap::new();
            for (offset, word) in chunk.iter().enumerate() {
                let idx = base + offset;
                sig.entry(signature_of(word)).or_default().push(idx);
                len.entry(word.chars().count()).or_default().push(idx);
            }
            (sig, len)
        })
        .collect();

    let mut signature_buckets: HashMap<String, Vec<usize>> = HashMap::new();
    let mut length_buckets: HashMap<usize, Vec<usize>> = HashMap::new();
    for (sig, len) in partials {
        for (k, mut v) in sig {
            signature_buckets.entry(k).or_default().append(&mut v);
        }
        for (k, mut v) in len {
            length_buckets.entry(k).or_default().append(&mut v);
        }
    }
    for v in signature_buckets.values_mut() {
        v.sort_unstable();
    }
    for v in length_buckets.values_mut() {
        v.sort_unstable();
    }

    (signature_buckets, length_buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anagrams_share_a_signature_bucket() {
        let vocab = vec!["listen".to_string(), "silent".to_string(), "banana".to_string()];
        let (sig, _) = build_indices(&vocab);
        assert_eq!(sig[&signature_of("listen")], vec![0, 1]);
    }

    #[test]
    fn length_buckets_group_by_character_count() {
        let vocab = vec!["cat".to_string(), "dog".to_string(), "mice".to_string()];
        let (_, len) = build_indices(&vocab);
        assert_eq!(len[&3], vec![0, 1]);
        assert_eq!(len[&4], vec![2]);
    }

    #[test]
    fn parallel_path_matches_sequential_path() {
        let vocab: Vec<String> = (0..PARALLEL_THRESHOLD + 50).map(|i| format!("word{i}")).collect();
        let (seq_sig, seq_len) = build_indices_sequential(&vocab);
        let (par_sig, par_len) = build_indices_parallel(&vocab);
        let mut seq_sig_sorted = seq_sig.clone();
        for v in seq_sig_sorted.values_mut() {
            v.sort_unstable();
        }
        assert_eq!(seq_sig_sorted, par_sig);
        assert_eq!(seq_len, par_len);
    }
}
