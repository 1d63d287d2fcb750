//! Key and hash utilities.
//!
//! Pure, deterministic functions producing cache keys and content
//! digests. None of these allocate state or touch I/O.

use sha2::{Digest, Sha256};

/// SHA-256 of `resource_type_value ":" resource_id (":" qualifier)*`.
///
/// Qualifiers let callers derive per-version or per-field sub-keys from
/// the same resource identity without inventing a new naming scheme per
/// call site.
pub fn resource_key(resource_type: &str, resource_id: &str, qualifiers: &[&str]) -> String {
    let mut buf = String::with_capacity(resource_type.len() + resource_id.len() + 16);
    buf.push_str(resource_type);
    buf.push(':');
    buf.push_str(resource_id);
    for q in qualifiers {
        buf.push(':');
        buf.push_str(q);
    }
    hex_sha256(buf.as_bytes())
}

/// SHA-256 over `"api:" method ":" path (":" sorted(params))?`.
pub fn http_key(method: &str, path: &str, params: Option<&[(&str, &str)]>) -> String {
    let mut buf = String::new();
    buf.push_str("api:");
    buf.push_str(method);
    buf.push(':');
    buf.push_str(path);
    if let Some(params) = params {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(b.1)));
        buf.push(':');
        for (i, (k, v)) in sorted.iter().enumerate() {
            if i > 0 {
                buf.push('&');
            }
            buf.push_str(k);
            buf.push('=');
            buf.push_str(v);
        }
    }
    hex_sha256(buf.as_bytes())
}

/// SHA-256 of the UTF-8 bytes of an already-canonicalized JSON string.
///
/// Callers must pass the canonical form (sorted keys, documented
/// coercions applied) — this function does not canonicalize, it only
/// hashes, so the same content always produces the same hash regardless
/// of caller-side key ordering mistakes upstream of this call.
pub fn content_hash(serialized_json: &str) -> String {
    hex_sha256(serialized_json.as_bytes())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_is_deterministic() {
        let a = resource_key("corpus", "c1", &[]);
        let b = resource_key("corpus", "c1", &[]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn resource_key_distinguishes_qualifiers() {
        let a = resource_key("corpus", "c1", &["content", "abcd1234"]);
        let b = resource_key("corpus", "c1", &["content", "deadbeef"]);
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_matches_manual_sha256() {
        let json = r#"{"a":1}"#;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let expected = format!("{:x}", hasher.finalize());
        assert_eq!(content_hash(json), expected);
    }

    #[test]
    fn http_key_sorts_params() {
        let a = http_key("GET", "/v1/words", Some(&[("b", "2"), ("a", "1")]));
        let b = http_key("GET", "/v1/words", Some(&[("a", "1"), ("b", "2")]));
        assert_eq!(a, b);
    }
}
