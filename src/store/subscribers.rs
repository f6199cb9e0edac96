//! Notification addresses waiting on pending requests.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::{blob, blob_path, StoreRoot, WriteGuard};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::kind::RequestKind;

/// Check and normalize an address: trimmed, one `@`, a non-empty local
/// part and a dotted domain. The domain is lowercased.
pub fn validate_address(address: &str) -> Result<String> {
    let address = address.trim();
    let invalid = || Error::Validation(format!("'{address}' is not a valid email address"));

    if address.is_empty() || address.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = address.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(format!("{local}@{}", domain.to_lowercase()))
}

#[derive(Debug, Clone)]
pub struct SubscriberRegistry {
    root: StoreRoot,
}

impl SubscriberRegistry {
    pub fn new(root: StoreRoot) -> Self {
        Self { root }
    }

    fn path(&self, kind: RequestKind, fp: &Fingerprint) -> PathBuf {
        blob_path(&self.root.subscribers_dir(kind), fp)
    }

    /// Add `address` to the request's set. Returns whether it was new.
    pub fn subscribe(&self, kind: RequestKind, fp: &Fingerprint, address: &str) -> Result<bool> {
        let address = validate_address(address)?;
        let guard = self.root.write_lock().acquire()?;
        self.subscribe_locked(&guard, kind, fp, &address)
    }

    /// Callers must have validated `address`.
    pub fn subscribe_locked(
        &self,
        guard: &WriteGuard<'_>,
        kind: RequestKind,
        fp: &Fingerprint,
        address: &str,
    ) -> Result<bool> {
        let path = self.path(kind, fp);
        let mut set = self.load(&path)?;
        if !set.insert(address.to_string()) {
            return Ok(false);
        }
        self.root.publish(guard, &path, &set)?;
        debug!(%kind, request = fp.short(), subscribers = set.len(), "subscriber added");
        Ok(true)
    }

    /// Current set without removing it.
    pub fn peek(&self, kind: RequestKind, fp: &Fingerprint) -> Result<BTreeSet<String>> {
        self.load(&self.path(kind, fp))
    }

    /// Take the set and delete it. Empty when nobody subscribed.
    pub fn drain(&self, kind: RequestKind, fp: &Fingerprint) -> Result<BTreeSet<String>> {
        let guard = self.root.write_lock().acquire()?;
        self.drain_locked(&guard, kind, fp)
    }

    pub fn drain_locked(
        &self,
        _guard: &WriteGuard<'_>,
        kind: RequestKind,
        fp: &Fingerprint,
    ) -> Result<BTreeSet<String>> {
        let path = self.path(kind, fp);
        let set = self.load(&path)?;
        blob::remove(&path)?;
        Ok(set)
    }

    fn load(&self, path: &std::path::Path) -> Result<BTreeSet<String>> {
        match blob::read::<BTreeSet<String>>(path) {
            Ok(set) => Ok(set.unwrap_or_default()),
            Err(Error::Corruption { reason, .. }) => {
                warn!(path = %path.display(), %reason, "unreadable subscriber set, starting empty");
                Ok(BTreeSet::new())
            }
            Err(e) => Err(e),
        }
    }
}
