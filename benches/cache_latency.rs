//! Micro-benchmarks for the two latency budgets the spec states
//! explicitly (§4.4 performance expectations, §8 scenario 6): an L1 hit
//! should cost sub-microsecond to ~100 µs, an L2 hit under 10 ms, and
//! hydrating a corpus from cache should beat rebuilding its derived
//! indices from raw vocabulary by at least two orders of magnitude.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use lexistore::cache::{CacheConfig, CacheManager, Namespace};
use lexistore::corpus::signature::build_indices;
use lexistore::corpus::{vocabulary_hash, Corpus};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Blob {
    payload: Vec<u8>,
}

fn cache_manager(rt: &Runtime) -> Arc<CacheManager> {
    rt.block_on(async {
        let mut dir = std::env::temp_dir();
        dir.push(format!("lexistore-bench-cache-{}", uuid::Uuid::new_v4()));
        Arc::new(CacheManager::new(CacheConfig {
            disk_directory: dir,
            ..CacheConfig::default()
        }).expect("cache manager construction"))
    })
}

/// L1 vs. L2 hit latency for a 100 KiB blob, per §8 scenario 6.
fn bench_cache_tiers(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache = cache_manager(&rt);
    let blob = Blob {
        payload: vec![0x5au8; 100 * 1024],
    };

    rt.block_on(async {
        cache.set(Namespace::Corpus, "bench-key", &blob, None).await.unwrap();
    });

    let mut group = c.benchmark_group("cache_tier_latency");

    group.bench_function("l1_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _: Option<Blob> = cache.get(Namespace::Corpus, "bench-key").await.unwrap();
            })
        })
    });

    group.bench_function("l2_hit_after_l1_eviction", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    cache.delete(Namespace::Corpus, "l2-only-key").await.ok();
                    cache.set(Namespace::Corpus, "l2-only-key", &blob, None).await.unwrap();
                });
            },
            |_| {
                rt.block_on(async {
                    let _: Option<Blob> = cache.get(Namespace::Corpus, "l2-only-key").await.unwrap();
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Hydrating a corpus's derived indices from a cached, already-computed
/// state vs. recomputing them from raw vocabulary — the speedup the
/// two-tier cache exists to deliver (§4.4, §8 scenario 6).
fn bench_corpus_rebuild_vs_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache = cache_manager(&rt);

    let vocabulary: Vec<String> = (0..20_000).map(|i| format!("word{i}")).collect();
    let hash = vocabulary_hash(&vocabulary);

    let corpus = Corpus {
        corpus_id: "bench-corpus".into(),
        corpus_name: "bench".into(),
        corpus_type: lexistore::resource::CorpusType::Lexicon,
        language: "en".into(),
        is_master: false,
        parent_corpus_id: None,
        child_corpus_ids: Vec::new(),
        vocabulary: vocabulary.clone(),
        original_vocabulary: Default::default(),
        lemmatized_vocabulary: Vec::new(),
        word_to_lemma_indices: Default::default(),
        lemma_to_word_indices: Default::default(),
        signature_buckets: Default::default(),
        length_buckets: Default::default(),
        vocabulary_hash: hash,
    };

    rt.block_on(async {
        cache.set(Namespace::Corpus, "bench-corpus-cached", &corpus, None).await.unwrap();
    });

    let mut group = c.benchmark_group("corpus_rebuild_vs_cache_hydrate");

    group.bench_with_input(BenchmarkId::new("recompute_from_raw_vocabulary", vocabulary.len()), &vocabulary, |b, vocabulary| {
        b.iter(|| build_indices(vocabulary))
    });

    group.bench_with_input(BenchmarkId::new("hydrate_from_cache", vocabulary.len()), &(), |b, _| {
        b.iter(|| {
            rt.block_on(async {
                let _: Option<Corpus> = cache.get(Namespace::Corpus, "bench-corpus-cached").await.unwrap();
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_cache_tiers, bench_corpus_rebuild_vs_cache);
criterion_main!(benches);
