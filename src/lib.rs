//! Content-addressed, versioned storage and caching core for a
//! lexicographic platform.
//!
//! Layering, bottom to top:
//! - [`keys`] / [`serialize`] — pure hashing and canonicalization.
//! - [`resource`] — the resource/version/snapshot type vocabulary.
//! - [`error`] — the shared error taxonomy.
//! - [`cache`] — the two-tier (memory + disk) cache manager.
//! - [`store`] — the versioned metadata document store.
//! - [`lock`] — the per-resource lock registry.
//! - [`version_manager`] — the orchestrator tying the above together.
//! - [`corpus`] — the hierarchical corpus domain layer.
//! - [`search`] — exact/fuzzy/semantic search built on a corpus.
//!
//! There is no process-wide singleton inside this crate: the embedding
//! application constructs one [`cache::CacheManager`] and one
//! [`version_manager::VersionManager`], wraps each in an `Arc`, and
//! threads them into the domain managers it needs.

pub mod cache;
pub mod corpus;
pub mod error;
pub mod keys;
pub mod lock;
pub mod resource;
pub mod search;
pub mod serialize;
pub mod store;
pub mod version_manager;

pub use error::{LexError, Result};
