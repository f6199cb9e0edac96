//! Durable queue of pending compute requests.
//!
//! One file per `(kind, fingerprint)` under `requests/pending/<kind>/`.
//! Records that exhaust their retry budget move to `requests/dead/<kind>/`
//! and stay there until requeued by hand.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{blob, blob_path, list_keys, StoreRoot, WriteGuard};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::kind::RequestKind;

/// A persisted compute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub kind: RequestKind,
    pub fingerprint: Fingerprint,
    /// Normalized parameters, exactly as hashed.
    pub parameters: Value,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(kind: RequestKind, fingerprint: Fingerprint, parameters: Value) -> Self {
        Self {
            kind,
            fingerprint,
            parameters,
            attempts: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    AlreadyPending,
    /// A record for this request sits in the dead-letter area; nothing was
    /// written.
    DeadLettered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { attempts: u32 },
    DeadLettered { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    root: StoreRoot,
}

impl JobQueue {
    pub fn new(root: StoreRoot) -> Self {
        Self { root }
    }

    fn pending_path(&self, kind: RequestKind, fp: &Fingerprint) -> PathBuf {
        blob_path(&self.root.pending_dir(kind), fp)
    }

    fn dead_path(&self, kind: RequestKind, fp: &Fingerprint) -> PathBuf {
        blob_path(&self.root.dead_dir(kind), fp)
    }

    /// Idempotent insert.
    pub fn enqueue(&self, kind: RequestKind, fp: &Fingerprint, parameters: &Value) -> Result<EnqueueOutcome> {
        let guard = self.root.write_lock().acquire()?;
        self.enqueue_locked(&guard, kind, fp, parameters)
    }

    /// [`enqueue`](Self::enqueue) for callers already holding the write lock.
    pub fn enqueue_locked(
        &self,
        guard: &WriteGuard<'_>,
        kind: RequestKind,
        fp: &Fingerprint,
        parameters: &Value,
    ) -> Result<EnqueueOutcome> {
        if self.get_locked(guard, kind, fp)?.is_some() {
            return Ok(EnqueueOutcome::AlreadyPending);
        }
        if self.get_dead_locked(guard, kind, fp)?.is_some() {
            return Ok(EnqueueOutcome::DeadLettered);
        }
        let record = JobRecord::new(kind, fp.clone(), parameters.clone());
        self.root.publish(guard, &self.pending_path(kind, fp), &record)?;
        info!(%kind, request = fp.short(), "enqueued");
        Ok(EnqueueOutcome::Enqueued)
    }

    pub fn is_pending(&self, kind: RequestKind, fp: &Fingerprint) -> bool {
        self.pending_path(kind, fp).is_file()
    }

    pub fn is_dead(&self, kind: RequestKind, fp: &Fingerprint) -> bool {
        self.dead_path(kind, fp).is_file()
    }

    /// Read one pending record. An unreadable record is quarantined and
    /// reads as absent.
    pub fn get(&self, kind: RequestKind, fp: &Fingerprint) -> Result<Option<JobRecord>> {
        self.load(&self.pending_path(kind, fp))
    }

    /// Read one dead-lettered record.
    pub fn get_dead(&self, kind: RequestKind, fp: &Fingerprint) -> Result<Option<JobRecord>> {
        self.load(&self.dead_path(kind, fp))
    }

    pub fn get_locked(&self, guard: &WriteGuard<'_>, kind: RequestKind, fp: &Fingerprint) -> Result<Option<JobRecord>> {
        self.load_locked(guard, &self.pending_path(kind, fp))
    }

    pub fn get_dead_locked(
        &self,
        guard: &WriteGuard<'_>,
        kind: RequestKind,
        fp: &Fingerprint,
    ) -> Result<Option<JobRecord>> {
        self.load_locked(guard, &self.dead_path(kind, fp))
    }

    fn load(&self, path: &Path) -> Result<Option<JobRecord>> {
        match blob::read::<JobRecord>(path) {
            Err(Error::Corruption { .. }) => {
                let guard = self.root.write_lock().acquire()?;
                self.load_locked(&guard, path)
            }
            other => other,
        }
    }

    /// Decode under the write lock so a record republished since the first
    /// read is never the one moved aside.
    fn load_locked(&self, _guard: &WriteGuard<'_>, path: &Path) -> Result<Option<JobRecord>> {
        match blob::read::<JobRecord>(path) {
            Err(Error::Corruption { reason, .. }) => {
                warn!(path = %path.display(), %reason, "unreadable job record, treating as missing");
                blob::quarantine(path);
                Ok(None)
            }
            other => other,
        }
    }

    /// Pending records of one kind, oldest first. Unreadable records are
    /// quarantined and skipped; the next request re-creates them.
    pub fn list_pending(&self, kind: RequestKind) -> Result<Vec<JobRecord>> {
        self.list_area(&self.root.pending_dir(kind))
    }

    pub fn list_dead(&self, kind: RequestKind) -> Result<Vec<JobRecord>> {
        self.list_area(&self.root.dead_dir(kind))
    }

    fn list_area(&self, dir: &Path) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();
        for fp in list_keys(dir)? {
            if let Some(record) = self.load(&blob_path(dir, &fp))? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(records)
    }

    /// Remove a processed record. Missing records are fine.
    pub fn complete(&self, kind: RequestKind, fp: &Fingerprint) -> Result<bool> {
        let guard = self.root.write_lock().acquire()?;
        self.complete_locked(&guard, kind, fp)
    }

    pub fn complete_locked(&self, _guard: &WriteGuard<'_>, kind: RequestKind, fp: &Fingerprint) -> Result<bool> {
        let removed = blob::remove(&self.pending_path(kind, fp))?;
        if removed {
            debug!(%kind, request = fp.short(), "job record removed");
        }
        Ok(removed)
    }

    /// Count a failed run. Once `attempts` reaches `max_attempts` the record
    /// moves to the dead-letter area.
    pub fn record_failure(
        &self,
        kind: RequestKind,
        fp: &Fingerprint,
        error: &str,
        max_attempts: u32,
    ) -> Result<FailureDisposition> {
        let guard = self.root.write_lock().acquire()?;
        let pending = self.pending_path(kind, fp);
        let mut record = match blob::read::<JobRecord>(&pending) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(Error::Validation(format!(
                    "no pending {kind} request {}",
                    fp.short()
                )))
            }
            Err(Error::Corruption { reason, .. }) => {
                warn!(path = %pending.display(), %reason, "rebuilding unreadable job record");
                JobRecord::new(kind, fp.clone(), Value::Null)
            }
            Err(e) => return Err(e),
        };
        record.attempts = record.attempts.saturating_add(1);
        record.last_error = Some(error.to_string());
        let attempts = record.attempts;

        if attempts >= max_attempts.max(1) {
            self.root.publish(&guard, &self.dead_path(kind, fp), &record)?;
            blob::remove(&pending)?;
            warn!(%kind, request = fp.short(), attempts, "job dead-lettered");
            Ok(FailureDisposition::DeadLettered { attempts })
        } else {
            self.root.publish(&guard, &pending, &record)?;
            Ok(FailureDisposition::Retry { attempts })
        }
    }

    /// Move a dead-lettered record back to pending with a fresh budget.
    /// `Ok(false)` when there was nothing to requeue.
    pub fn requeue_dead(&self, kind: RequestKind, fp: &Fingerprint) -> Result<bool> {
        let guard = self.root.write_lock().acquire()?;
        let dead = self.dead_path(kind, fp);
        let Some(mut record) = self.load_locked(&guard, &dead)? else {
            return Ok(false);
        };
        record.attempts = 0;
        record.enqueued_at = Utc::now();
        self.root.publish(&guard, &self.pending_path(kind, fp), &record)?;
        blob::remove(&dead)?;
        info!(%kind, request = fp.short(), "dead-lettered job requeued");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use serde_json::json;
    use std::fs;

    fn test_queue() -> (tempfile::TempDir, JobQueue) {
        let dir = tempfile::tempdir().unwrap();
        let root = StoreRoot::open(dir.path()).unwrap();
        (dir, JobQueue::new(root))
    }

    fn fp(n: u32) -> Fingerprint {
        fingerprint(&json!({ "job": n }))
    }

    const KIND: RequestKind = RequestKind::WordFrequency;

    #[test]
    fn enqueue_is_idempotent() {
        let (_dir, queue) = test_queue();
        let params = json!({"terms": ["mask"]});
        assert_eq!(queue.enqueue(KIND, &fp(1), &params).unwrap(), EnqueueOutcome::Enqueued);
        assert_eq!(queue.enqueue(KIND, &fp(1), &params).unwrap(), EnqueueOutcome::AlreadyPending);
        let pending = queue.list_pending(KIND).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].parameters, params);
        assert_eq!(pending[0].attempts, 0);
    }

    #[test]
    fn kinds_do_not_share_records() {
        let (_dir, queue) = test_queue();
        queue.enqueue(KIND, &fp(1), &json!({})).unwrap();
        assert!(queue.list_pending(RequestKind::WordCloud).unwrap().is_empty());
        assert!(!queue.is_pending(RequestKind::WordCloud, &fp(1)));
    }

    #[test]
    fn complete_removes_record() {
        let (_dir, queue) = test_queue();
        queue.enqueue(KIND, &fp(1), &json!({})).unwrap();
        assert!(queue.complete(KIND, &fp(1)).unwrap());
        assert!(!queue.is_pending(KIND, &fp(1)));
        assert!(!queue.complete(KIND, &fp(1)).unwrap());
        assert_eq!(queue.enqueue(KIND, &fp(1), &json!({})).unwrap(), EnqueueOutcome::Enqueued);
    }

    #[test]
    fn listing_is_ordered_by_enqueue_time() {
        let (_dir, queue) = test_queue();
        for n in [3, 1, 2] {
            queue.enqueue(KIND, &fp(n), &json!(n)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let order: Vec<Value> = queue
            .list_pending(KIND)
            .unwrap()
            .into_iter()
            .map(|r| r.parameters)
            .collect();
        assert_eq!(order, vec![json!(3), json!(1), json!(2)]);
    }

    #[test]
    fn unreadable_records_are_skipped() {
        let (_dir, queue) = test_queue();
        queue.enqueue(KIND, &fp(1), &json!({})).unwrap();
        queue.enqueue(KIND, &fp(2), &json!({})).unwrap();
        let path = queue.pending_path(KIND, &fp(1));
        fs::write(&path, b"junk").unwrap();
        let pending = queue.list_pending(KIND).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fingerprint, fp(2));
        assert!(!path.exists());
        assert!(path.with_extension("corrupt").exists());
    }

    #[test]
    fn unreadable_record_is_recreated_on_enqueue() {
        let (_dir, queue) = test_queue();
        let params = json!({"terms": ["mask"]});
        queue.enqueue(KIND, &fp(1), &params).unwrap();
        fs::write(queue.pending_path(KIND, &fp(1)), b"torn").unwrap();

        assert!(queue.get(KIND, &fp(1)).unwrap().is_none());
        fs::write(queue.pending_path(KIND, &fp(1)), b"torn").unwrap();
        assert_eq!(queue.enqueue(KIND, &fp(1), &params).unwrap(), EnqueueOutcome::Enqueued);
        let record = queue.get(KIND, &fp(1)).unwrap().unwrap();
        assert_eq!(record.parameters, params);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn unreadable_dead_record_does_not_block_enqueue() {
        let (_dir, queue) = test_queue();
        queue.enqueue(KIND, &fp(1), &json!({})).unwrap();
        queue.record_failure(KIND, &fp(1), "boom", 1).unwrap();
        fs::write(queue.dead_path(KIND, &fp(1)), b"torn").unwrap();

        assert!(queue.list_dead(KIND).unwrap().is_empty());
        assert!(!queue.requeue_dead(KIND, &fp(1)).unwrap());
        assert_eq!(queue.enqueue(KIND, &fp(1), &json!({})).unwrap(), EnqueueOutcome::Enqueued);
    }

    #[test]
    fn failures_retry_then_dead_letter() {
        let (_dir, queue) = test_queue();
        queue.enqueue(KIND, &fp(1), &json!({})).unwrap();

        assert_eq!(
            queue.record_failure(KIND, &fp(1), "boom", 3).unwrap(),
            FailureDisposition::Retry { attempts: 1 }
        );
        assert_eq!(
            queue.record_failure(KIND, &fp(1), "boom", 3).unwrap(),
            FailureDisposition::Retry { attempts: 2 }
        );
        let record = queue.get(KIND, &fp(1)).unwrap().unwrap();
        assert_eq!(record.last_error.as_deref(), Some("boom"));

        assert_eq!(
            queue.record_failure(KIND, &fp(1), "boom", 3).unwrap(),
            FailureDisposition::DeadLettered { attempts: 3 }
        );
        assert!(!queue.is_pending(KIND, &fp(1)));
        assert!(queue.is_dead(KIND, &fp(1)));
        assert_eq!(queue.list_dead(KIND).unwrap().len(), 1);

        // re-submission does not resurrect it
        assert_eq!(queue.enqueue(KIND, &fp(1), &json!({})).unwrap(), EnqueueOutcome::DeadLettered);
    }

    #[test]
    fn requeue_dead_resets_attempts() {
        let (_dir, queue) = test_queue();
        queue.enqueue(KIND, &fp(1), &json!({"x": 1})).unwrap();
        queue.record_failure(KIND, &fp(1), "boom", 1).unwrap();
        assert!(queue.requeue_dead(KIND, &fp(1)).unwrap());
        let record = queue.get(KIND, &fp(1)).unwrap().unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(record.parameters, json!({"x": 1}));
        assert!(!queue.is_dead(KIND, &fp(1)));
        assert!(!queue.requeue_dead(KIND, &fp(1)).unwrap());
    }

    #[test]
    fn record_failure_without_record_is_rejected() {
        let (_dir, queue) = test_queue();
        assert!(queue.record_failure(KIND, &fp(7), "boom", 5).is_err());
    }
}
