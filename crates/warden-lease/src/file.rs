//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Lease records and conditional-write stores."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::task::spawn_blocking;
use tracing::warn;

use crate::record::{LeaseKey, LeaseRecord, VersionedLease};
use crate::store::{LeaseStore, LeaseStoreError};

/// Guard files older than this are assumed to be leftovers of a crashed
/// writer and are reclaimed. Writers hold the guard for microseconds.
const GUARD_STALE_AFTER: Duration = Duration::from_secs(5);

/// File-backed lease store.
///
/// One record per key at `{root}/{namespace}/{name}.json`, stored as a
/// versioned JSON document. Read-modify-write cycles run inside a short
/// critical section taken via exclusive guard-file creation, and the
/// record itself is replaced with a temp-file write plus atomic rename so
/// a concurrent reader never observes a torn document. All filesystem
/// work is offloaded to the blocking pool so the async workers stay free.
#[derive(Debug)]
pub struct FileLeaseStore {
    root: PathBuf,
}

impl FileLeaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &LeaseKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(format!("{}.json", key.name))
    }

    fn guard_path(&self, key: &LeaseKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(format!("{}.json.guard", key.name))
    }

    fn read_record(path: &Path) -> Result<Option<VersionedLease>, LeaseStoreError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_record(path: &Path, lease: &VersionedLease) -> Result<(), LeaseStoreError> {
        let parent = path.parent().ok_or_else(|| {
            LeaseStoreError::Unavailable(format!("record path {} has no parent", path.display()))
        })?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&serde_json::to_vec_pretty(lease)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|err| LeaseStoreError::Io(err.error))?;
        Ok(())
    }
}

/// Run `op` on the blocking pool, flattening a cancelled or panicked
/// worker into a transient store error.
async fn offload<T>(
    op: impl FnOnce() -> Result<T, LeaseStoreError> + Send + 'static,
) -> Result<T, LeaseStoreError>
where
    T: Send + 'static,
{
    spawn_blocking(op)
        .await
        .map_err(|err| LeaseStoreError::Unavailable(format!("lease store worker failed: {err}")))?
}

/// Take the guard for a record, run `op`, release the guard.
///
/// A guard that cannot be created because another writer holds it maps
/// to [`LeaseStoreError::Unavailable`]; challengers simply retry at
/// their poll cadence. Stale guards are reclaimed once.
fn with_guard<T>(
    guard_path: &Path,
    record_path: &Path,
    op: impl FnOnce(&Path) -> Result<T, LeaseStoreError>,
) -> Result<T, LeaseStoreError> {
    if let Some(parent) = guard_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut reclaimed = false;
    let _guard = loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(guard_path)
        {
            Ok(file) => {
                break GuardFile {
                    path: guard_path,
                    _file: file,
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if !reclaimed && guard_is_stale(guard_path) {
                    warn!(guard = %guard_path.display(), "reclaiming stale lease guard file");
                    let _ = fs::remove_file(guard_path);
                    reclaimed = true;
                    continue;
                }
                return Err(LeaseStoreError::Unavailable(format!(
                    "lease guard {} held by another writer",
                    guard_path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        }
    };

    op(record_path)
}

struct GuardFile<'a> {
    path: &'a Path,
    _file: fs::File,
}

impl Drop for GuardFile<'_> {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.path);
    }
}

fn guard_is_stale(path: &Path) -> bool {
    match path.metadata().and_then(|meta| meta.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > GUARD_STALE_AFTER)
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[async_trait]
impl LeaseStore for FileLeaseStore {
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, LeaseStoreError> {
        let record_path = self.record_path(key);
        offload(move || Self::read_record(&record_path)).await
    }

    async fn create(
        &self,
        key: &LeaseKey,
        record: LeaseRecord,
    ) -> Result<VersionedLease, LeaseStoreError> {
        let record_path = self.record_path(key);
        let guard_path = self.guard_path(key);
        offload(move || {
            with_guard(&guard_path, &record_path, |record_path| {
                if Self::read_record(record_path)?.is_some() {
                    return Err(LeaseStoreError::Conflict);
                }
                let stored = VersionedLease { version: 1, record };
                Self::write_record(record_path, &stored)?;
                Ok(stored)
            })
        })
        .await
    }

    async fn update(
        &self,
        key: &LeaseKey,
        record: LeaseRecord,
        expected_version: u64,
    ) -> Result<VersionedLease, LeaseStoreError> {
        let record_path = self.record_path(key);
        let guard_path = self.guard_path(key);
        offload(move || {
            with_guard(&guard_path, &record_path, |record_path| {
                let current =
                    Self::read_record(record_path)?.ok_or(LeaseStoreError::Conflict)?;
                if current.version != expected_version {
                    return Err(LeaseStoreError::Conflict);
                }
                let stored = VersionedLease {
                    version: expected_version + 1,
                    record,
                };
                Self::write_record(record_path, &stored)?;
                Ok(stored)
            })
        })
        .await
    }
}
