//! Write locks shared by on-demand requests and schedulers.
//!
//! Two kinds of exclusion:
//! - a per-user async mutex held around every read-then-write of mappings,
//!   ignore entries and operation status
//! - a per-(user, project) batch guard; a second batch for the same scope is
//!   refused while the first is in flight

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{BridgeError, Result};
use crate::types::Scope;

#[derive(Debug, Default)]
pub struct Locks {
    users: DashMap<String, Arc<Mutex<()>>>,
    batches: Arc<DashMap<Scope, ()>>,
}

impl Locks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for `user`.
    pub async fn lock_user(&self, user: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.users
                .entry(user.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Claim the batch slot for `scope`, failing if one is already running.
    pub fn begin_batch(&self, scope: &Scope) -> Result<BatchGuard> {
        match self.batches.entry(scope.clone()) {
            Entry::Occupied(_) => Err(BridgeError::BatchInFlight {
                user: scope.user.clone(),
                project: scope.project.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(BatchGuard {
                    batches: Arc::clone(&self.batches),
                    scope: scope.clone(),
                })
            }
        }
    }

    pub fn batch_in_flight(&self, scope: &Scope) -> bool {
        self.batches.contains_key(scope)
    }
}

/// Releases the batch slot when dropped.
#[derive(Debug)]
pub struct BatchGuard {
    batches: Arc<DashMap<Scope, ()>>,
    scope: Scope,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.batches.remove(&self.scope);
    }
}
