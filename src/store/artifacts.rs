//! Content-addressed artifact cache with tiered namespaces.
//!
//! Each artifact is keyed by `(namespace, fingerprint)` and stored as a
//! compressed JSON envelope. Published artifacts are immutable: a second
//! `put` for the same key leaves the first one in place.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{blob, blob_path, list_keys, StoreRoot};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::kind::Namespace;

/// Bumped when the envelope or any payload layout changes incompatibly.
/// Artifacts written with another format are treated as absent.
pub const ARTIFACT_FORMAT: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T: ?Sized> {
    format: u32,
    created_at: DateTime<Utc>,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    format: u32,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    payload: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    AlreadyPresent,
}

/// Info record for a cached artifact (returned by [`ArtifactStore::info`]).
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub namespace: String,
    pub key: String,
    pub bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: StoreRoot,
}

impl ArtifactStore {
    pub fn new(root: StoreRoot) -> Self {
        Self { root }
    }

    fn path(&self, ns: Namespace, key: &Fingerprint) -> PathBuf {
        blob_path(&self.root.artifact_dir(ns), key)
    }

    /// Whether a published artifact exists. Never observes partial writes.
    pub fn exists(&self, ns: Namespace, key: &Fingerprint) -> bool {
        self.path(ns, key).is_file()
    }

    /// Load an artifact. `Ok(None)` on a miss.
    ///
    /// A blob that fails to decode is logged, quarantined and reported as a
    /// miss so the caller recomputes it.
    pub fn get<T: DeserializeOwned>(&self, ns: Namespace, key: &Fingerprint) -> Result<Option<T>> {
        let path = self.path(ns, key);
        match blob::read::<Envelope<T>>(&path) {
            Ok(None) => Ok(None),
            Ok(Some(env)) if env.format != ARTIFACT_FORMAT => {
                warn!(
                    namespace = %ns,
                    key = key.short(),
                    format = env.format,
                    expected = ARTIFACT_FORMAT,
                    "ignoring artifact written in another format"
                );
                Ok(None)
            }
            Ok(Some(env)) => {
                debug!(namespace = %ns, key = key.short(), "artifact hit");
                Ok(Some(env.payload))
            }
            Err(Error::Corruption { path, reason }) => {
                error!(
                    namespace = %ns,
                    key = key.short(),
                    path = %path.display(),
                    %reason,
                    "corrupt artifact, treating as missing"
                );
                let _guard = self.root.write_lock().acquire()?;
                blob::quarantine(&path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Publish an artifact. Serialization happens before the write lock is
    /// taken; an existing artifact is never replaced.
    pub fn put<T: Serialize + ?Sized>(
        &self,
        ns: Namespace,
        key: &Fingerprint,
        artifact: &T,
    ) -> Result<PutOutcome> {
        if self.exists(ns, key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        let bytes = blob::encode(&EnvelopeRef {
            format: ARTIFACT_FORMAT,
            created_at: Utc::now(),
            payload: artifact,
        })?;

        let path = self.path(ns, key);
        let guard = self.root.write_lock().acquire()?;
        if path.is_file() {
            return Ok(PutOutcome::AlreadyPresent);
        }
        self.root.publish_bytes(&guard, &path, &bytes)?;
        debug!(namespace = %ns, key = key.short(), bytes = bytes.len(), "artifact stored");
        Ok(PutOutcome::Stored)
    }

    /// Return the cached artifact, or compute, publish and return it.
    pub fn get_or_insert_with<T, E, F>(&self, ns: Namespace, key: &Fingerprint, compute: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<Error>,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(hit) = self.get::<T>(ns, key)? {
            return Ok(hit);
        }
        let value = compute()?;
        self.put(ns, key, &value)?;
        Ok(value)
    }

    /// Manually evict one artifact.
    pub fn evict(&self, ns: Namespace, key: &Fingerprint) -> Result<bool> {
        let _guard = self.root.write_lock().acquire()?;
        blob::remove(&self.path(ns, key))
    }

    /// Evict every artifact of one namespace, or of all namespaces.
    pub fn invalidate(&self, ns: Option<Namespace>) -> Result<usize> {
        let targets: Vec<Namespace> = match ns {
            Some(ns) => vec![ns],
            None => Namespace::ALL.to_vec(),
        };
        let _guard = self.root.write_lock().acquire()?;
        let mut removed = 0;
        for ns in targets {
            let dir = self.root.artifact_dir(ns);
            for key in list_keys(&dir)? {
                if blob::remove(&blob_path(&dir, &key))? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn keys(&self, ns: Namespace) -> Result<Vec<Fingerprint>> {
        list_keys(&self.root.artifact_dir(ns))
    }

    /// Metadata about every cached artifact, newest first.
    pub fn info(&self) -> Result<Vec<ArtifactInfo>> {
        let mut result = Vec::new();
        for ns in Namespace::ALL {
            for key in self.keys(ns)? {
                let path = self.path(ns, &key);
                let Ok(meta) = fs::metadata(&path) else {
                    continue;
                };
                result.push(ArtifactInfo {
                    namespace: ns.as_str().to_string(),
                    key: key.to_string(),
                    bytes: meta.len(),
                    modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }
        result.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(result)
    }
}
