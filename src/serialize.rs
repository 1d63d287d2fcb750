//! Canonical serialization and compression.
//!
//! The central rule: a value is serialized to its canonical JSON form
//! exactly once, and that single string is reused for hashing, the
//! size-based storage-strategy decision, and the external cache payload.
//! Nothing downstream of [`canonicalize`] re-serializes.
//!
//! Canonical form relies on `serde_json`'s default `Map` representation
//! being a `BTreeMap` (this crate does not enable the `preserve_order`
//! feature), which already yields sorted object keys; enums, ids, and
//! timestamps are canonical as long as callers derive `Serialize` the
//! ordinary way (enums as their declared string value via
//! `#[serde(rename_all = "...")]` or a manual impl, ids as strings,
//! timestamps as RFC 3339 via `chrono`'s serde feature).

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{LexError, Result};
use crate::keys::content_hash;

/// A value serialized once, with its size and content hash computed from
/// that same string.
pub struct Canonical {
    pub json: String,
    pub size_bytes: usize,
    pub data_hash: String,
}

/// Serialize `value` to its canonical JSON form and compute its hash.
///
/// Goes through [`serde_json::Value`] rather than `to_string` directly:
/// a derived `Serialize` impl on a struct writes fields in declaration
/// order, not sorted order, so hashing that string directly would make
/// the content hash depend on field declaration order. Converting to
/// `Value` first collects object fields into this crate's `Map`
/// (a `BTreeMap`, since the `preserve_order` feature is not enabled),
/// which sorts them regardless of the input type's field order.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Canonical> {
    let as_value = serde_json::to_value(value)?;
    let json = serde_json::to_string(&as_value)?;
    let size_bytes = json.len();
    let data_hash = content_hash(&json);
    Ok(Canonical {
        json,
        size_bytes,
        data_hash,
    })
}

/// Partition a caller-supplied metadata bag into the subset recognized
/// as a resource type's typed fields and the generic overflow.
///
/// `typed_field_names` is the resource type's compile-time schema (see
/// [`crate::resource::ResourceType::typed_field_names`]); base-envelope field names are
/// stripped from the overflow so they cannot collide with the version
/// envelope regardless of what a caller passes in.
pub fn partition_metadata(
    mut metadata: Map<String, Value>,
    typed_field_names: &[&str],
) -> (Map<String, Value>, Map<String, Value>) {
    const ENVELOPE_FIELDS: &[&str] = &[
        "resource_id",
        "resource_type",
        "namespace",
        "version_info",
        "content_inline",
        "content_location",
        "ttl",
        "metadata",
        "tags",
    ];

    let mut typed = Map::new();
    for name in typed_field_names {
        if let Some(v) = metadata.remove(*name) {
            typed.insert((*name).to_string(), v);
        }
    }
    for field in ENVELOPE_FIELDS {
        metadata.remove(*field);
    }
    (typed, metadata)
}

/// Compression algorithms available for per-namespace cache policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    None,
    Gzip,
    Lz4,
    Zstd,
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::None
    }
}

/// Compress `data` with the given algorithm.
pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Gzip => {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder
                .finish()
                .map_err(|e| LexError::Backend(format!("gzip compression failed: {e}")))
        }
        CompressionAlgorithm::Lz4 => lz4::block::compress(data, None, true)
            .map_err(|e| LexError::Backend(format!("lz4 compression failed: {e}"))),
        CompressionAlgorithm::Zstd => zstd::encode_all(data, 0)
            .map_err(|e| LexError::Backend(format!("zstd compression failed: {e}"))),
    }
}

/// Decompress `data` with the given algorithm. `original_size` is
/// required for LZ4, whose block format does not embed it unless the
/// `true` prepend-size flag was used at compress time (it is, above).
pub fn decompress(
    data: &[u8],
    algorithm: CompressionAlgorithm,
    _original_size: usize,
) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Gzip => {
            use flate2::read::GzDecoder;
            use std::io::Read;
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        CompressionAlgorithm::Lz4 => lz4::block::decompress(data, None)
            .map_err(|e| LexError::Backend(format!("lz4 decompression failed: {e}"))),
        CompressionAlgorithm::Zstd => zstd::decode_all(data)
            .map_err(|e| LexError::Backend(format!("zstd decompression failed: {e}"))),
    }
}
