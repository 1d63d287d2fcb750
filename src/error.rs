//! Error taxonomy for the storage and versioning core.
//!
//! One variant per kind named in the error handling design, not one per
//! call site — callers match on kind, not on which function produced it.

use thiserror::Error;

/// Errors produced by the cache, version manager, and corpus subsystems.
#[derive(Error, Debug)]
pub enum LexError {
    /// Missing or malformed caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested resource, version, or hash absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Version override not strictly increasing over the current latest.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Content-address checksum mismatch, or missing cache blob behind an
    /// extant metadata row.
    #[error("corrupted cache entry: {0}")]
    CorruptedCache(String),

    /// Document-store or cache-backend I/O failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Another task advanced the version chain between this task's read
    /// of `latest` and its attempted write.
    #[error("concurrency conflict on resource {0}")]
    ConcurrencyConflict(String),

    /// A background task (semantic build) was cancelled cooperatively.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Result alias used throughout this subsystem.
pub type Result<T> = std::result::Result<T, LexError>;
