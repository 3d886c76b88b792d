//! Optimistic mutations with snapshot rollback.
//!
//! A mutation patches the cached values of its targets before the server
//! call, remembering what each value was. Success keeps the patch, failure
//! puts the remembered values back, and both paths finish by invalidating
//! the targets so the next read reconciles with the server.
//!
//! Snapshots belong to one mutation. Two overlapping mutations on the same
//! key are not serialized against each other; rolling one back restores
//! the value that mutation saw, and the final invalidation refetches the
//! authoritative value either way.

use super::query_cache::{QueryCache, Snapshot};
use crate::api_client::ApiClientError;
use cadence_core::{KeyPattern, QueryKey};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

pub type Patch = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Description of one optimistic write.
#[derive(Clone)]
pub struct Mutation {
    name: String,
    targets: Vec<QueryKey>,
    patch: Patch,
    also_invalidate: Vec<KeyPattern>,
}

impl Mutation {
    pub fn new<F>(name: impl Into<String>, patch: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            targets: Vec::new(),
            patch: Arc::new(patch),
            also_invalidate: Vec::new(),
        }
    }

    /// Key whose cached value receives the patch.
    pub fn target(mut self, key: QueryKey) -> Self {
        self.targets.push(key);
        self
    }

    /// Extra pattern invalidated once the mutation settles, without being
    /// patched.
    pub fn also_invalidate(mut self, pattern: KeyPattern) -> Self {
        self.also_invalidate.push(pattern);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> &[QueryKey] {
        &self.targets
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.name)
            .field("targets", &self.targets)
            .field("also_invalidate", &self.also_invalidate)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Applied,
    Committed,
    RolledBack,
    Reconciled,
}

/// What happened to a settled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReport {
    /// Every state the mutation passed through, in order.
    pub history: Vec<MutationState>,
    pub patched: usize,
    pub invalidated: usize,
}

impl MutationReport {
    pub fn final_state(&self) -> MutationState {
        self.history
            .last()
            .copied()
            .unwrap_or(MutationState::Idle)
    }

    pub fn rolled_back(&self) -> bool {
        self.history.contains(&MutationState::RolledBack)
    }
}

/// An applied, not yet settled mutation.
///
/// Dropping it unsettled (for example when the awaiting future is
/// cancelled) rolls it back.
pub struct OptimisticUpdate {
    cache: QueryCache,
    name: String,
    snapshots: Vec<Snapshot>,
    reconcile: Vec<KeyPattern>,
    history: Vec<MutationState>,
}

impl OptimisticUpdate {
    pub fn apply(cache: &QueryCache, mutation: &Mutation) -> Self {
        let snapshots: Vec<Snapshot> = mutation
            .targets
            .iter()
            .filter_map(|key| cache.apply_patch(key, |value| (mutation.patch)(value)))
            .collect();

        let reconcile = mutation
            .targets
            .iter()
            .map(KeyPattern::key)
            .chain(mutation.also_invalidate.iter().cloned())
            .collect();

        debug!(
            mutation = %mutation.name,
            patched = snapshots.len(),
            "Optimistic update applied"
        );
        Self {
            cache: cache.clone(),
            name: mutation.name.clone(),
            snapshots,
            reconcile,
            history: vec![MutationState::Idle, MutationState::Applied],
        }
    }

    pub fn state(&self) -> MutationState {
        self.history
            .last()
            .copied()
            .unwrap_or(MutationState::Idle)
    }

    /// Keys that were patched.
    pub fn patched_keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.snapshots.iter().map(|snapshot| &snapshot.key)
    }

    /// Keep the patch and reconcile with the server.
    pub fn commit(mut self) -> MutationReport {
        self.history.push(MutationState::Committed);
        debug!(mutation = %self.name, "Mutation committed");
        self.settle()
    }

    /// Restore every snapshot and reconcile with the server.
    pub fn rollback(mut self) -> MutationReport {
        self.undo();
        self.settle()
    }

    fn undo(&mut self) {
        self.cache.restore(&self.snapshots);
        self.history.push(MutationState::RolledBack);
        warn!(
            mutation = %self.name,
            restored = self.snapshots.len(),
            "Mutation rolled back"
        );
    }

    fn reconcile(&mut self) -> usize {
        let invalidated = self
            .reconcile
            .iter()
            .map(|pattern| self.cache.invalidate(pattern))
            .sum();
        self.history.push(MutationState::Reconciled);
        invalidated
    }

    fn settle(mut self) -> MutationReport {
        let invalidated = self.reconcile();
        MutationReport {
            history: std::mem::take(&mut self.history),
            patched: self.snapshots.len(),
            invalidated,
        }
    }
}

impl Drop for OptimisticUpdate {
    fn drop(&mut self) {
        if self.state() == MutationState::Applied {
            self.undo();
            self.reconcile();
        }
    }
}

impl QueryCache {
    /// Run `server_call` under an optimistic update of `mutation`'s targets.
    ///
    /// The call is bounded by the cache's mutation timeout; on expiry the
    /// mutation rolls back and fails with [`ApiClientError::Timeout`].
    /// Errors are returned unchanged after rollback.
    pub async fn mutate<T, F, Fut>(
        &self,
        mutation: &Mutation,
        server_call: F,
    ) -> Result<T, ApiClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiClientError>>,
    {
        let update = OptimisticUpdate::apply(self, mutation);
        match tokio::time::timeout(self.mutation_timeout(), server_call()).await {
            Ok(Ok(value)) => {
                update.commit();
                Ok(value)
            }
            Ok(Err(err)) => {
                update.rollback();
                Err(err)
            }
            Err(_) => {
                warn!(mutation = %mutation.name, "Mutation timed out");
                update.rollback();
                Err(ApiClientError::Timeout)
            }
        }
    }
}
