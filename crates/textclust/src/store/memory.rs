use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use chrono::NaiveDate;

use super::{acquire_with_backoff, next_id, ClusterStore, ClusterTransaction, StoreError, StoreResult};
use crate::model::{ClusterId, TextCluster};

/// Process-local store. The mutex plays the role of the table lock, so
/// several clusterers sharing one `Arc<MemoryClusterStore>` behave like
/// separate processes sharing a database.
#[derive(Debug, Default)]
pub struct MemoryClusterStore {
    clusters: Mutex<Vec<TextCluster>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all committed clusters.
    pub fn snapshot(&self) -> StoreResult<Vec<TextCluster>> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Vec<TextCluster>>> {
        self.clusters.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn select(clusters: &[TextCluster], component: &str, after: Option<ClusterId>) -> Vec<TextCluster> {
    clusters
        .iter()
        .filter(|c| c.component == component && after.map_or(true, |a| c.id > a))
        .cloned()
        .collect()
}

impl ClusterStore for MemoryClusterStore {
    fn load_all(&self) -> StoreResult<Vec<TextCluster>> {
        self.snapshot()
    }

    fn load_clusters(&self, component: &str, after: Option<ClusterId>) -> StoreResult<Vec<TextCluster>> {
        Ok(select(&self.lock()?, component, after))
    }

    fn max_cluster_id(&self) -> StoreResult<Option<ClusterId>> {
        Ok(self.lock()?.iter().map(|c| c.id).max())
    }

    fn touch_cluster(&self, id: ClusterId, day: NaiveDate) -> StoreResult<()> {
        let mut clusters = self.lock()?;
        let cluster = clusters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::UnknownCluster(id))?;
        cluster.last_observed = cluster.last_observed.max(day);
        Ok(())
    }

    fn begin_exclusive(&self, timeout: Duration) -> StoreResult<Box<dyn ClusterTransaction + '_>> {
        let guard = acquire_with_backoff(timeout, || match self.clusters.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(StoreError::Poisoned),
        })?;
        Ok(Box::new(MemoryTransaction {
            guard,
            staged: Vec::new(),
        }))
    }
}

/// Inserts are staged and only applied on commit.
struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, Vec<TextCluster>>,
    staged: Vec<TextCluster>,
}

impl ClusterTransaction for MemoryTransaction<'_> {
    fn max_cluster_id(&mut self) -> StoreResult<Option<ClusterId>> {
        Ok(self.guard.iter().chain(&self.staged).map(|c| c.id).max())
    }

    fn load_clusters(&mut self, component: &str, after: Option<ClusterId>) -> StoreResult<Vec<TextCluster>> {
        let mut found = select(&self.guard, component, after);
        found.extend(select(&self.staged, component, after));
        Ok(found)
    }

    fn insert_cluster(&mut self, component: &str, text: &str, day: NaiveDate) -> StoreResult<ClusterId> {
        let id = next_id(self.max_cluster_id()?);
        self.staged.push(TextCluster::new(id, component, text, day));
        Ok(id)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let staged = std::mem::take(&mut self.staged);
        self.guard.extend(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn commit_applies_inserts() {
        let store = MemoryClusterStore::new();
        let mut txn = store.begin_exclusive(Duration::from_secs(1)).unwrap();
        assert_eq!(txn.insert_cluster("cron", "job started", day(1)).unwrap(), 0);
        assert_eq!(txn.insert_cluster("sshd", "login ok", day(1)).unwrap(), 1);
        assert_eq!(txn.max_cluster_id().unwrap(), Some(1));
        txn.commit().unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.load_clusters("cron", None).unwrap().len(), 1);
        assert_eq!(store.load_clusters("sshd", Some(0)).unwrap()[0].id, 1);
        assert!(store.load_clusters("sshd", Some(1)).unwrap().is_empty());
    }

    #[test]
    fn drop_rolls_back_and_unlocks() {
        let store = MemoryClusterStore::new();
        {
            let mut txn = store.begin_exclusive(Duration::from_secs(1)).unwrap();
            txn.insert_cluster("cron", "job started", day(1)).unwrap();
        }
        assert!(store.is_empty().unwrap());
        // Lock was released by the drop.
        let txn = store.begin_exclusive(Duration::from_millis(50)).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn held_lock_times_out_other_writers() {
        let store = MemoryClusterStore::new();
        let _held = store.begin_exclusive(Duration::from_secs(1)).unwrap();
        std::thread::scope(|s| {
            let handle = s.spawn(|| store.begin_exclusive(Duration::from_millis(30)).map(|_| ()));
            let result = handle.join().unwrap();
            assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
        });
    }

    #[test]
    fn touch_keeps_latest_day() {
        let store = MemoryClusterStore::new();
        let mut txn = store.begin_exclusive(Duration::from_secs(1)).unwrap();
        let id = txn.insert_cluster("cron", "job started", day(5)).unwrap();
        txn.commit().unwrap();

        store.touch_cluster(id, day(3)).unwrap();
        assert_eq!(store.snapshot().unwrap()[0].last_observed, day(5));
        store.touch_cluster(id, day(9)).unwrap();
        assert_eq!(store.snapshot().unwrap()[0].last_observed, day(9));
        assert!(matches!(store.touch_cluster(42, day(9)), Err(StoreError::UnknownCluster(42))));
    }
}
