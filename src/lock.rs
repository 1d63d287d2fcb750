//! Per-resource lock registry.
//!
//! Grounded in the distributed-mutex pattern used elsewhere in this
//! workspace (a concurrent map from key to lock state), stripped down
//! to the part this subsystem actually needs: intra-process
//! linearizability of `save`/`delete` per `(resource_type, resource_id)`.
//! There is no fencing token and no deadlock detector here — the spec
//! this registry implements is explicit that cross-process consensus is
//! out of scope.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{LexError, Result};
use crate::resource::ResourceType;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns one `tokio::sync::Mutex` per distinct `(resource_type, resource_id)`
/// ever locked. Entries are never evicted: the mutex is zero-sized once
/// locked, so retaining them for the life of the process is cheap, and a
/// resource recreated under the same id after deletion safely reuses its
/// original lock.
#[derive(Default)]
pub struct ResourceLockRegistry {
    locks: DashMap<(ResourceType, String), Arc<Mutex<()>>>,
}

/// Held while the lock is acquired; releases on drop. Owns its own
/// `Arc<Mutex<()>>` clone, so it carries no borrow back into the
/// registry.
pub struct ResourceLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ResourceLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `(resource_type, resource_id)`, waiting up to
    /// `timeout` (or the default if `None`).
    pub async fn acquire(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ResourceLockGuard> {
        let key = (resource_type, resource_id.to_string());
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let timeout = timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(ResourceLockGuard { _guard: guard }),
            Err(_) => Err(LexError::Backend(format!(
                "lock acquisition timed out for {resource_type}:{resource_id}"
            ))),
        }
    }
}
