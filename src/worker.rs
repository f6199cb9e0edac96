//! Background worker: drains the job queue on a fixed interval.
//!
//! A tick lists the pending records of each configured kind and processes
//! them one at a time: compute, publish the final artifact, take the
//! subscriber set and remove the record under one write-lock guard, then
//! notify. Ticks never overlap, within a process or across processes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::AnalysisEngine;
use crate::error::{EngineError, Result};
use crate::fingerprint::Fingerprint;
use crate::kind::RequestKind;
use crate::notify::Notifier;
use crate::store::{
    ArtifactStore, FailureDisposition, JobQueue, JobRecord, StoreRoot, SubscriberRegistry, TickLock,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What happened to one job during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum JobOutcome {
    Completed {
        notified: usize,
        notify_error: Option<String>,
    },
    Retrying {
        attempts: u32,
        error: String,
    },
    DeadLettered {
        attempts: u32,
        error: String,
    },
    /// The store could not be updated; the record stays pending.
    StoreFailed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub kind: RequestKind,
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Summary of a single tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Another tick held the lock; nothing was done.
    pub skipped: bool,
    pub jobs: Vec<JobReport>,
    /// Kinds whose queue could not be listed.
    pub errors: Vec<String>,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn completed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.completed()
    }
}

pub struct Worker {
    root: StoreRoot,
    artifacts: ArtifactStore,
    queue: JobQueue,
    subscribers: SubscriberRegistry,
    engine: Arc<dyn AnalysisEngine>,
    notifier: Notifier,
    kinds: Vec<RequestKind>,
    max_attempts: u32,
    tick_lock: TickLock,
}

impl Worker {
    pub fn new(root: StoreRoot, engine: Arc<dyn AnalysisEngine>, notifier: Notifier) -> Self {
        Self {
            artifacts: ArtifactStore::new(root.clone()),
            queue: JobQueue::new(root.clone()),
            subscribers: SubscriberRegistry::new(root.clone()),
            tick_lock: TickLock::new(root.worker_lock_path()),
            root,
            engine,
            notifier,
            kinds: RequestKind::ALL.to_vec(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_kinds(mut self, kinds: impl Into<Vec<RequestKind>>) -> Self {
        self.kinds = kinds.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn kinds(&self) -> &[RequestKind] {
        &self.kinds
    }

    /// One pass over the queue. Returns a skipped report when another tick
    /// is already running.
    pub fn tick(&self) -> Result<TickReport> {
        let Some(_held) = self.tick_lock.try_acquire()? else {
            debug!("tick already running, skipping");
            return Ok(TickReport::skipped());
        };

        let mut report = TickReport::default();
        for &kind in &self.kinds {
            let pending = match self.queue.list_pending(kind) {
                Ok(pending) => pending,
                Err(e) => {
                    error!(%kind, error = %e, "failed to list pending jobs");
                    report.errors.push(format!("{kind}: {e}"));
                    continue;
                }
            };
            if pending.is_empty() {
                continue;
            }
            info!(%kind, pending = pending.len(), "processing queue");
            for record in pending {
                let outcome = self.process(&record);
                report.jobs.push(JobReport {
                    kind,
                    fingerprint: record.fingerprint,
                    outcome,
                });
            }
        }
        Ok(report)
    }

    fn process(&self, record: &JobRecord) -> JobOutcome {
        let kind = record.kind;
        let fp = &record.fingerprint;
        let ns = kind.final_namespace();

        let result = match self.artifacts.get::<Value>(ns, fp) {
            Ok(Some(existing)) => {
                debug!(%kind, request = fp.short(), "result already published");
                Ok(existing)
            }
            Ok(None) => self.compute(kind, &record.parameters),
            Err(e) => Err(EngineError::from(e)),
        };

        let value = match result {
            Ok(value) => value,
            Err(e) => return self.fail(record, &e),
        };

        if let Err(e) = self.artifacts.put(ns, fp, &value) {
            error!(%kind, request = fp.short(), error = %e, "failed to publish result");
            return JobOutcome::StoreFailed { error: e.to_string() };
        }

        let subscribers = match self.finish(kind, fp) {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!(%kind, request = fp.short(), error = %e, "failed to clean up job");
                return JobOutcome::StoreFailed { error: e.to_string() };
            }
        };
        info!(%kind, request = fp.short(), subscribers = subscribers.len(), "job complete");

        if subscribers.is_empty() {
            return JobOutcome::Completed {
                notified: 0,
                notify_error: None,
            };
        }
        let notified = subscribers.len();
        match self.notifier.notify_ready(kind, fp, &record.parameters, subscribers) {
            Ok(()) => JobOutcome::Completed {
                notified,
                notify_error: None,
            },
            Err(e) => {
                warn!(%kind, request = fp.short(), error = %e, "notification failed");
                JobOutcome::Completed {
                    notified: 0,
                    notify_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run the engine; a panic counts as a failed attempt.
    fn compute(&self, kind: RequestKind, params: &Value) -> std::result::Result<Value, EngineError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.engine.compute(kind, params))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Err(EngineError::Panicked(msg))
            }
        }
    }

    /// Take the subscriber set and drop the record in one critical section.
    fn finish(&self, kind: RequestKind, fp: &Fingerprint) -> Result<Vec<String>> {
        let guard = self.root.write_lock().acquire()?;
        let subscribers = self.subscribers.drain_locked(&guard, kind, fp)?;
        self.queue.complete_locked(&guard, kind, fp)?;
        Ok(subscribers.into_iter().collect())
    }

    fn fail(&self, record: &JobRecord, err: &EngineError) -> JobOutcome {
        let kind = record.kind;
        let fp = &record.fingerprint;
        let error = err.to_string();
        warn!(%kind, request = fp.short(), %error, "job failed");
        match self.queue.record_failure(kind, fp, &error, self.max_attempts) {
            Ok(FailureDisposition::Retry { attempts }) => JobOutcome::Retrying { attempts, error },
            Ok(FailureDisposition::DeadLettered { attempts }) => JobOutcome::DeadLettered { attempts, error },
            Err(e) => JobOutcome::StoreFailed { error: e.to_string() },
        }
    }

    /// Tick every `interval` until `shutdown` flips to `true`. Missed ticks
    /// are skipped, not queued.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs_f64(), kinds = ?self.kinds, "worker started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let worker = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || worker.tick()).await {
                Ok(Ok(report)) if report.skipped => debug!("tick skipped"),
                Ok(Ok(report)) if !report.jobs.is_empty() => info!(
                    completed = report.completed(),
                    failed = report.failed(),
                    "tick finished"
                ),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "tick failed"),
                Err(e) => error!(error = %e, "tick task panicked"),
            }
        }
        info!("worker stopped");
    }
}
