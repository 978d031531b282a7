use std::fs::{File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{acquire_with_backoff, next_id, ClusterStore, ClusterTransaction, StoreError, StoreResult};
use crate::model::{ClusterId, TextCluster};

const DOCUMENT_FILE: &str = "clusters.json";
const LOCK_FILE: &str = "clusters.lock";

/// Timeout used by operations that lock internally (`touch_cluster`).
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    clusters: Vec<TextCluster>,
}

impl StoreDocument {
    fn max_id(&self) -> Option<ClusterId> {
        self.clusters.iter().map(|c| c.id).max()
    }

    fn select(&self, component: &str, after: Option<ClusterId>) -> Vec<TextCluster> {
        self.clusters
            .iter()
            .filter(|c| c.component == component && after.map_or(true, |a| c.id > a))
            .cloned()
            .collect()
    }
}

/// Filesystem-backed cluster store shared between processes.
///
/// ```text
/// <dir>/
///   clusters.json   ← all clusters, rewritten atomically (temp file + rename)
///   clusters.lock   ← carries the OS advisory lock of the current writer
/// ```
///
/// Readers never take the lock. Writers hold an exclusive advisory lock on
/// `clusters.lock`; the file itself is never removed, and the OS releases the
/// lock when its holder exits, so a crashed writer cannot wedge the store.
#[derive(Debug, Clone)]
pub struct FileClusterStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileClusterStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self) -> PathBuf {
        self.dir.join(DOCUMENT_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn read_document(&self) -> StoreResult<StoreDocument> {
        match std::fs::read_to_string(self.document_path()) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, doc: &StoreDocument) -> StoreResult<()> {
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", DOCUMENT_FILE, std::process::id()));
        let json = serde_json::to_string_pretty(doc)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.document_path())?;
        Ok(())
    }

    fn try_lock(&self) -> StoreResult<Option<LockFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;
        match file.try_lock() {
            Ok(()) => {
                let lock = LockFile { file };
                lock.record_owner()?;
                Ok(Some(lock))
            }
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }

    fn lock(&self, timeout: Duration) -> StoreResult<LockFile> {
        acquire_with_backoff(timeout, || self.try_lock())
    }
}

/// Exclusive advisory lock on the store's lock file, released on drop.
#[derive(Debug)]
struct LockFile {
    file: File,
}

impl LockFile {
    /// Overwrite the file with the holder's pid, for operators only.
    fn record_owner(&self) -> StoreResult<()> {
        self.file.set_len(0)?;
        writeln!(&self.file, "{}", std::process::id())?;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(error = %e, "failed to release cluster lock");
        }
    }
}

impl ClusterStore for FileClusterStore {
    fn load_all(&self) -> StoreResult<Vec<TextCluster>> {
        let mut clusters = self.read_document()?.clusters;
        clusters.sort_by_key(|c| c.id);
        Ok(clusters)
    }

    fn load_clusters(&self, component: &str, after: Option<ClusterId>) -> StoreResult<Vec<TextCluster>> {
        Ok(self.read_document()?.select(component, after))
    }

    fn max_cluster_id(&self) -> StoreResult<Option<ClusterId>> {
        Ok(self.read_document()?.max_id())
    }

    fn touch_cluster(&self, id: ClusterId, day: NaiveDate) -> StoreResult<()> {
        let _lock = self.lock(self.lock_timeout)?;
        let mut doc = self.read_document()?;
        let cluster = doc
            .clusters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::UnknownCluster(id))?;
        if day > cluster.last_observed {
            cluster.last_observed = day;
            self.write_document(&doc)?;
        }
        Ok(())
    }

    fn begin_exclusive(&self, timeout: Duration) -> StoreResult<Box<dyn ClusterTransaction + '_>> {
        let lock = self.lock(timeout)?;
        // Read only after locking so the transaction sees every committed write.
        let doc = self.read_document()?;
        debug!(dir = %self.dir.display(), clusters = doc.clusters.len(), "cluster lock acquired");
        Ok(Box::new(FileTransaction {
            store: self,
            _lock: lock,
            doc,
            dirty: false,
        }))
    }
}

struct FileTransaction<'a> {
    store: &'a FileClusterStore,
    _lock: LockFile,
    doc: StoreDocument,
    dirty: bool,
}

impl ClusterTransaction for FileTransaction<'_> {
    fn max_cluster_id(&mut self) -> StoreResult<Option<ClusterId>> {
        Ok(self.doc.max_id())
    }

    fn load_clusters(&mut self, component: &str, after: Option<ClusterId>) -> StoreResult<Vec<TextCluster>> {
        Ok(self.doc.select(component, after))
    }

    fn insert_cluster(&mut self, component: &str, text: &str, day: NaiveDate) -> StoreResult<ClusterId> {
        let id = next_id(self.doc.max_id());
        self.doc
            .clusters
            .push(TextCluster::new(id, component, text, day));
        self.dirty = true;
        Ok(id)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.dirty {
            self.store.write_document(&self.doc)?;
        }
        Ok(())
    }
}
