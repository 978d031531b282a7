//! Persistent cluster storage seam.
//!
//! The clustering engine only talks to [`ClusterStore`]. New clusters are
//! inserted through a [`ClusterTransaction`], which holds an exclusive lock
//! shared by every process using the same store. Dropping a transaction
//! without [`ClusterTransaction::commit`] rolls it back and releases the lock.

pub mod error;
pub mod file;
pub mod memory;

use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::model::{ClusterId, TextCluster};

pub use error::{StoreError, StoreResult};
pub use file::FileClusterStore;
pub use memory::MemoryClusterStore;

pub trait ClusterStore: Send + Sync {
    /// Every stored cluster, in id order.
    fn load_all(&self) -> StoreResult<Vec<TextCluster>>;

    /// Clusters of `component` with an id greater than `after` (all if `None`).
    fn load_clusters(&self, component: &str, after: Option<ClusterId>)
        -> StoreResult<Vec<TextCluster>>;

    /// Largest id across all components.
    fn max_cluster_id(&self) -> StoreResult<Option<ClusterId>>;

    /// Record that cluster `id` was observed on `day`.
    fn touch_cluster(&self, id: ClusterId, day: NaiveDate) -> StoreResult<()>;

    /// Acquire the store-wide exclusive lock, waiting at most `timeout`.
    fn begin_exclusive(&self, timeout: Duration) -> StoreResult<Box<dyn ClusterTransaction + '_>>;
}

/// Work done while holding the exclusive lock.
pub trait ClusterTransaction {
    fn max_cluster_id(&mut self) -> StoreResult<Option<ClusterId>>;

    fn load_clusters(&mut self, component: &str, after: Option<ClusterId>)
        -> StoreResult<Vec<TextCluster>>;

    /// Insert a cluster and return its store-assigned id.
    fn insert_cluster(&mut self, component: &str, text: &str, day: NaiveDate)
        -> StoreResult<ClusterId>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Poll `attempt` with exponential backoff until it yields a lock or
/// `timeout` elapses.
pub(crate) fn acquire_with_backoff<T>(
    timeout: Duration,
    mut attempt: impl FnMut() -> StoreResult<Option<T>>,
) -> StoreResult<T> {
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if let Some(lock) = attempt()? {
            return Ok(lock);
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(StoreError::LockTimeout {
                waited_ms: waited.as_millis() as u64,
            });
        }
        std::thread::sleep(backoff.min(timeout - waited));
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Next id after `max`, the id assignment rule shared by all stores.
pub(crate) fn next_id(max: Option<ClusterId>) -> ClusterId {
    max.map_or(0, |m| m + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_returns_first_success() {
        let mut calls = 0;
        let got = acquire_with_backoff(Duration::from_secs(1), || {
            calls += 1;
            Ok(if calls == 3 { Some(calls) } else { None })
        })
        .unwrap();
        assert_eq!(got, 3);
    }

    #[test]
    fn backoff_times_out() {
        let err = acquire_with_backoff::<()>(Duration::from_millis(20), || Ok(None)).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }

    #[test]
    fn backoff_propagates_errors() {
        let err = acquire_with_backoff::<()>(Duration::from_secs(1), || Err(StoreError::Poisoned))
            .unwrap_err();
        assert!(matches!(err, StoreError::Poisoned));
    }
}
