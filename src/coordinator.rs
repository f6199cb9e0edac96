//! Synchronous front door: answers from the cache or records the request
//! for the worker. Never runs an analysis itself.

use std::sync::Arc;

use serde::de::IgnoredAny;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::kind::RequestKind;
use crate::params::{self, RevisionSource};
use crate::store::{
    validate_address, ArtifactStore, EnqueueOutcome, JobQueue, StoreRoot, SubscriberRegistry,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Ready(Value),
    /// Queued (or already queued); the fingerprint is the request id.
    Pending(Fingerprint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SubscribeOutcome {
    Subscribed { new: bool },
    /// The result exists already; nothing will be sent.
    AlreadyReady,
    /// No such request is waiting.
    NotPending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RequestStatus {
    Ready,
    Pending { attempts: u32, last_error: Option<String> },
    DeadLettered { attempts: u32, last_error: Option<String> },
    Unknown,
}

#[derive(Clone)]
pub struct Coordinator {
    root: StoreRoot,
    artifacts: ArtifactStore,
    queue: JobQueue,
    subscribers: SubscriberRegistry,
    revision: Option<Arc<dyn RevisionSource>>,
}

impl Coordinator {
    pub fn new(root: StoreRoot) -> Self {
        Self {
            artifacts: ArtifactStore::new(root.clone()),
            queue: JobQueue::new(root.clone()),
            subscribers: SubscriberRegistry::new(root.clone()),
            root,
            revision: None,
        }
    }

    /// Fold the revision of upstream inputs into every fingerprint.
    pub fn with_revision_source(mut self, source: Arc<dyn RevisionSource>) -> Self {
        self.revision = Some(source);
        self
    }

    /// Normalized parameters and fingerprint of a request.
    pub fn identify(&self, kind: RequestKind, raw: &Value) -> Result<(Fingerprint, Value)> {
        let revision = self.revision.as_ref().map(|s| s.revision()).transpose()?;
        params::identify(kind, raw, revision.as_deref())
    }

    pub fn request(&self, kind: RequestKind, raw: &Value) -> Result<RequestOutcome> {
        let (fp, normalized) = self.identify(kind, raw)?;
        let ns = kind.final_namespace();

        if let Some(artifact) = self.artifacts.get::<Value>(ns, &fp)? {
            debug!(%kind, request = fp.short(), "cache hit");
            return Ok(RequestOutcome::Ready(artifact));
        }

        let published_meanwhile = {
            let guard = self.root.write_lock().acquire()?;
            if self.artifacts.exists(ns, &fp) {
                true
            } else {
                let outcome = self.queue.enqueue_locked(&guard, kind, &fp, &normalized)?;
                if outcome == EnqueueOutcome::DeadLettered {
                    info!(%kind, request = fp.short(), "request is dead-lettered; requeue it to retry");
                }
                false
            }
        };
        if published_meanwhile {
            if let Some(artifact) = self.artifacts.get::<Value>(ns, &fp)? {
                return Ok(RequestOutcome::Ready(artifact));
            }
            self.queue.enqueue(kind, &fp, &normalized)?;
        }
        Ok(RequestOutcome::Pending(fp))
    }

    /// Register `address` for a pending (or dead-lettered) request.
    pub fn subscribe(&self, kind: RequestKind, fp: &Fingerprint, address: &str) -> Result<SubscribeOutcome> {
        let address = validate_address(address)?;
        if self.is_ready(kind, fp)? {
            return Ok(SubscribeOutcome::AlreadyReady);
        }
        let guard = self.root.write_lock().acquire()?;
        let waiting = self.queue.get_locked(&guard, kind, fp)?.is_some()
            || self.queue.get_dead_locked(&guard, kind, fp)?.is_some();
        if !waiting {
            // the worker publishes before it drops the record
            if self.artifacts.exists(kind.final_namespace(), fp) {
                return Ok(SubscribeOutcome::AlreadyReady);
            }
            return Ok(SubscribeOutcome::NotPending);
        }
        let new = self.subscribers.subscribe_locked(&guard, kind, fp, &address)?;
        Ok(SubscribeOutcome::Subscribed { new })
    }

    /// `request` followed by `subscribe` when the result is not ready. The
    /// address is checked before anything is written.
    pub fn request_and_subscribe(&self, kind: RequestKind, raw: &Value, address: &str) -> Result<RequestOutcome> {
        validate_address(address)?;
        let outcome = self.request(kind, raw)?;
        if let RequestOutcome::Pending(fp) = &outcome {
            self.subscribe(kind, fp, address)?;
        }
        Ok(outcome)
    }

    pub fn status(&self, kind: RequestKind, fp: &Fingerprint) -> Result<RequestStatus> {
        if self.is_ready(kind, fp)? {
            return Ok(RequestStatus::Ready);
        }
        if let Some(record) = self.queue.get(kind, fp)? {
            return Ok(RequestStatus::Pending {
                attempts: record.attempts,
                last_error: record.last_error,
            });
        }
        if let Some(record) = self.queue.get_dead(kind, fp)? {
            return Ok(RequestStatus::DeadLettered {
                attempts: record.attempts,
                last_error: record.last_error,
            });
        }
        Ok(RequestStatus::Unknown)
    }

    /// Whether a readable result exists. A corrupt one is quarantined and
    /// does not count.
    fn is_ready(&self, kind: RequestKind, fp: &Fingerprint) -> Result<bool> {
        Ok(self
            .artifacts
            .get::<IgnoredAny>(kind.final_namespace(), fp)?
            .is_some())
    }

    /// The finished result of a request, if any.
    pub fn result(&self, kind: RequestKind, fp: &Fingerprint) -> Result<Option<Value>> {
        self.artifacts.get(kind.final_namespace(), fp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedRevision(&'static str);

    impl RevisionSource for FixedRevision {
        fn revision(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn setup() -> (tempfile::TempDir, Coordinator, StoreRoot) {
        let dir = tempfile::tempdir().unwrap();
        let root = StoreRoot::open(dir.path()).unwrap();
        (dir, Coordinator::new(root.clone()), root)
    }

    fn params() -> Value {
        json!({
            "institutions": ["local health department"],
            "start": "2020-01-01",
            "end": "2020-02-01",
            "step_days": 7,
            "terms": ["mask"],
        })
    }

    const KIND: RequestKind = RequestKind::WordFrequency;

    #[test]
    fn miss_enqueues_once() {
        let (_dir, coord, root) = setup();
        let first = coord.request(KIND, &params()).unwrap();
        let second = coord.request(KIND, &params()).unwrap();
        let RequestOutcome::Pending(fp) = first else {
            panic!("expected pending");
        };
        assert_eq!(second, RequestOutcome::Pending(fp.clone()));
        let queue = JobQueue::new(root);
        assert_eq!(queue.list_pending(KIND).unwrap().len(), 1);
        assert_eq!(coord.status(KIND, &fp).unwrap(), RequestStatus::Pending { attempts: 0, last_error: None });
    }

    #[test]
    fn hit_returns_artifact() {
        let (_dir, coord, root) = setup();
        let (fp, _) = coord.identify(KIND, &params()).unwrap();
        ArtifactStore::new(root.clone())
            .put(KIND.final_namespace(), &fp, &json!({"points": []}))
            .unwrap();
        assert_eq!(
            coord.request(KIND, &params()).unwrap(),
            RequestOutcome::Ready(json!({"points": []}))
        );
        assert!(JobQueue::new(root).list_pending(KIND).unwrap().is_empty());
        assert_eq!(coord.status(KIND, &fp).unwrap(), RequestStatus::Ready);
    }

    #[test]
    fn invalid_request_writes_nothing() {
        let (_dir, coord, root) = setup();
        let err = coord.request(KIND, &json!({"terms": []})).unwrap_err();
        assert!(err.is_validation());
        assert!(JobQueue::new(root).list_pending(KIND).unwrap().is_empty());
    }

    #[test]
    fn subscribe_only_for_pending_requests() {
        let (_dir, coord, _root) = setup();
        let (fp, _) = coord.identify(KIND, &params()).unwrap();
        assert_eq!(coord.subscribe(KIND, &fp, "a@example.com").unwrap(), SubscribeOutcome::NotPending);

        coord.request(KIND, &params()).unwrap();
        assert_eq!(
            coord.subscribe(KIND, &fp, "a@example.com").unwrap(),
            SubscribeOutcome::Subscribed { new: true }
        );
        assert_eq!(
            coord.subscribe(KIND, &fp, "a@example.com").unwrap(),
            SubscribeOutcome::Subscribed { new: false }
        );
        assert!(coord.subscribe(KIND, &fp, "not-an-address").unwrap_err().is_validation());
    }

    #[test]
    fn request_and_subscribe_validates_first() {
        let (_dir, coord, root) = setup();
        assert!(coord.request_and_subscribe(KIND, &params(), "bad").is_err());
        assert!(JobQueue::new(root.clone()).list_pending(KIND).unwrap().is_empty());

        let RequestOutcome::Pending(fp) = coord.request_and_subscribe(KIND, &params(), "a@example.com").unwrap() else {
            panic!("expected pending");
        };
        let subs = SubscriberRegistry::new(root).peek(KIND, &fp).unwrap();
        assert!(subs.contains("a@example.com"));
    }

    #[test]
    fn revision_changes_identity() {
        let (_dir, coord, _root) = setup();
        let (plain, _) = coord.identify(KIND, &params()).unwrap();
        let coord = coord.with_revision_source(Arc::new(FixedRevision("r1")));
        let (revised, _) = coord.identify(KIND, &params()).unwrap();
        assert_ne!(plain, revised);
    }

    #[test]
    fn dead_lettered_request_is_reported() {
        let (_dir, coord, root) = setup();
        let RequestOutcome::Pending(fp) = coord.request(KIND, &params()).unwrap() else {
            panic!("expected pending");
        };
        JobQueue::new(root).record_failure(KIND, &fp, "no corpus", 1).unwrap();
        assert_eq!(
            coord.status(KIND, &fp).unwrap(),
            RequestStatus::DeadLettered { attempts: 1, last_error: Some("no corpus".into()) }
        );
        // still pending from the caller's view, nothing re-enqueued
        assert_eq!(coord.request(KIND, &params()).unwrap(), RequestOutcome::Pending(fp));
    }
}
