//! Persistent state under one cache root.
//!
//! ```text
//! <root>/
//!   artifacts/<namespace>/<fingerprint>.json.gz
//!   requests/pending/<kind>/<fingerprint>.json.gz
//!   requests/dead/<kind>/<fingerprint>.json.gz
//!   requests/subscribers/<kind>/<fingerprint>.json.gz
//!   tmp/            staging area for atomic publication
//!   .write.lock     store-wide write lock
//!   worker.lock     tick single-flight lock
//! ```
//!
//! The three stores never share in-memory state; a worker in another
//! process sees everything through these files.

pub mod artifacts;
pub(crate) mod blob;
pub mod lock;
pub mod queue;
pub mod subscribers;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::kind::{Namespace, RequestKind};

pub use artifacts::{ArtifactInfo, ArtifactStore, PutOutcome};
pub use lock::{TickGuard, TickLock, WriteGuard, WriteLock};
pub use queue::{EnqueueOutcome, FailureDisposition, JobQueue, JobRecord};
pub use subscribers::{validate_address, SubscriberRegistry};

/// Staged files older than this are considered abandoned.
const PARTIAL_MAX_AGE: Duration = Duration::from_secs(3600);

/// Handle to a cache root shared by all stores (cheap to clone).
#[derive(Debug, Clone)]
pub struct StoreRoot {
    inner: Arc<RootInner>,
}

#[derive(Debug)]
struct RootInner {
    root: PathBuf,
    lock: WriteLock,
}

impl StoreRoot {
    /// Open (or create) the directory layout under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [
            root.join("artifacts"),
            root.join("requests").join("pending"),
            root.join("requests").join("dead"),
            root.join("requests").join("subscribers"),
            root.join("tmp"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        blob::sweep_partials(&root.join("tmp"), PARTIAL_MAX_AGE)?;

        let lock = WriteLock::new(root.join(".write.lock"));
        Ok(Self {
            inner: Arc::new(RootInner { root, lock }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    pub fn write_lock(&self) -> &WriteLock {
        &self.inner.lock
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.inner.root.join("tmp")
    }

    pub(crate) fn worker_lock_path(&self) -> PathBuf {
        self.inner.root.join("worker.lock")
    }

    pub(crate) fn artifact_dir(&self, ns: Namespace) -> PathBuf {
        self.inner.root.join("artifacts").join(ns.as_str())
    }

    pub(crate) fn pending_dir(&self, kind: RequestKind) -> PathBuf {
        self.requests_dir("pending", kind)
    }

    pub(crate) fn dead_dir(&self, kind: RequestKind) -> PathBuf {
        self.requests_dir("dead", kind)
    }

    pub(crate) fn subscribers_dir(&self, kind: RequestKind) -> PathBuf {
        self.requests_dir("subscribers", kind)
    }

    fn requests_dir(&self, area: &str, kind: RequestKind) -> PathBuf {
        self.inner.root.join("requests").join(area).join(kind.as_str())
    }

    /// Encode and publish a blob. Callers must hold the write lock; the
    /// guard parameter makes that explicit.
    pub(crate) fn publish<T: Serialize + ?Sized>(
        &self,
        guard: &WriteGuard<'_>,
        dest: &Path,
        value: &T,
    ) -> Result<()> {
        let bytes = blob::encode(value)?;
        self.publish_bytes(guard, dest, &bytes)
    }

    pub(crate) fn publish_bytes(&self, _guard: &WriteGuard<'_>, dest: &Path, bytes: &[u8]) -> Result<()> {
        blob::write_atomic(&self.tmp_dir(), dest, bytes)
    }
}

pub(crate) fn blob_path(dir: &Path, key: &Fingerprint) -> PathBuf {
    dir.join(format!("{}{}", key.as_str(), blob::BLOB_SUFFIX))
}

/// Fingerprints of every well-formed blob in `dir`.
pub(crate) fn list_keys(dir: &Path) -> Result<Vec<Fingerprint>> {
    Ok(blob::list_stems(dir)?
        .into_iter()
        .filter_map(|stem| Fingerprint::parse(&stem).ok())
        .collect())
}
