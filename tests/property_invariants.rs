//! Property-based tests for the subsystem's universally-quantified
//! invariants over pure functions: normalization, vocabulary hashing,
//! canonical serialization, and metadata partitioning.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::{Map, Value};

use lexistore::corpus::normalize::normalize;
use lexistore::corpus::vocabulary_hash;
use lexistore::serialize::{canonicalize, partition_metadata};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// `normalize` is idempotent for any input string.
    #[test]
    fn normalize_is_idempotent(word in ".{0,64}") {
        let once = normalize(&word);
        let twice = normalize(&once);
        prop_assert_eq!(once, twice);
    }

    /// Two vocabularies equal as sets hash identically regardless of
    /// insertion order or duplicate repetition (invariant 6, testable
    /// property 7).
    #[test]
    fn vocabulary_hash_depends_only_on_the_set(
        words in prop::collection::vec("[a-z]{1,8}", 0..20),
        seed in 0u64..1000,
    ) {
        let set: BTreeSet<String> = words.iter().cloned().collect();
        let v1: Vec<String> = set.iter().cloned().collect();

        let mut v2 = v1.clone();
        // Deterministic pseudo-shuffle keyed on `seed`, and duplicate
        // every element once — the hash must not move either way.
        v2.rotate_left((seed as usize) % v2.len().max(1));
        let mut v2_with_dupes = v2.clone();
        v2_with_dupes.extend(v2.clone());

        prop_assert_eq!(vocabulary_hash(&v1), vocabulary_hash(&v2));
        prop_assert_eq!(vocabulary_hash(&v1), vocabulary_hash(&v2_with_dupes));
    }

    /// Canonical serialization round-trips: parsing the canonical string
    /// back into a `Value` reproduces the original value exactly.
    #[test]
    fn canonical_serialize_round_trips(
        keys in prop::collection::vec("[a-z]{1,6}", 1..6),
        values in prop::collection::vec(-1000i64..1000, 1..6),
    ) {
        let mut map = Map::new();
        for (k, v) in keys.iter().zip(values.iter()) {
            map.insert(k.clone(), Value::from(*v));
        }
        let original = Value::Object(map);
        let canonical = canonicalize(&original).unwrap();
        let parsed: Value = serde_json::from_str(&canonical.json).unwrap();
        prop_assert_eq!(parsed, original);
    }

    /// `partition_metadata` never lets an envelope field name leak into
    /// the generic overflow bag, regardless of what the caller passes.
    #[test]
    fn partition_never_leaks_envelope_fields(
        extra_keys in prop::collection::vec("[a-z_]{1,12}", 0..10),
    ) {
        let mut metadata = Map::new();
        for k in &extra_keys {
            metadata.insert(k.clone(), Value::Bool(true));
        }
        metadata.insert("resource_id".into(), Value::String("leaky".into()));
        metadata.insert("version_info".into(), Value::String("leaky".into()));

        let (_typed, overflow) = partition_metadata(metadata, &["corpus_name"]);
        prop_assert!(!overflow.contains_key("resource_id"));
        prop_assert!(!overflow.contains_key("version_info"));
    }
}
