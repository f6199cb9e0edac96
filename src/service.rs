//! Explicitly constructed service object: one per cache root.

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, TransportKind};
use crate::coordinator::Coordinator;
use crate::corpus::Corpus;
use crate::engine::{AnalysisEngine, CorpusEngine};
use crate::error::{Error, Result};
use crate::notify::{LogTransport, NotificationTransport, Notifier, OutboxTransport};
use crate::store::{ArtifactStore, JobQueue, StoreRoot, SubscriberRegistry};
use crate::worker::Worker;

/// Stores, coordinator and worker wired to one cache root.
pub struct Service {
    pub root: StoreRoot,
    pub artifacts: ArtifactStore,
    pub queue: JobQueue,
    pub subscribers: SubscriberRegistry,
    pub coordinator: Coordinator,
    pub worker: Arc<Worker>,
}

impl Service {
    /// Build everything from configuration, with the corpus engine and the
    /// configured transport.
    pub fn open(config: &Config) -> Result<Self> {
        let root = StoreRoot::open(&config.cache_root)?;
        let corpus = Arc::new(Corpus::new(&config.corpus.posts_root, &config.corpus.accounts_path));
        let engine = Arc::new(CorpusEngine::new(
            corpus.as_ref().clone(),
            ArtifactStore::new(root.clone()),
        ));
        let transport: Arc<dyn NotificationTransport> = match config.notify.transport {
            TransportKind::Log => Arc::new(LogTransport),
            TransportKind::Outbox => {
                let dir = config
                    .notify
                    .outbox_dir
                    .clone()
                    .ok_or_else(|| Error::Config("notify.outbox_dir is not set".into()))?;
                Arc::new(OutboxTransport::new(dir))
            }
        };
        let notifier = Notifier::new(transport)
            .with_sender(&config.notify.sender)
            .with_subject(&config.notify.subject);

        let worker = Worker::new(root.clone(), engine, notifier)
            .with_kinds(config.worker.kinds.clone())
            .with_max_attempts(config.worker.max_attempts);
        let coordinator = Coordinator::new(root.clone()).with_revision_source(corpus);
        info!(cache_root = %config.cache_root.display(), "service ready");
        Ok(Self::assemble(root, coordinator, worker))
    }

    /// Wire a service around any engine. The request identity carries no
    /// input revision.
    pub fn with_engine(root: StoreRoot, engine: Arc<dyn AnalysisEngine>, notifier: Notifier) -> Self {
        let worker = Worker::new(root.clone(), engine, notifier);
        let coordinator = Coordinator::new(root.clone());
        Self::assemble(root, coordinator, worker)
    }

    fn assemble(root: StoreRoot, coordinator: Coordinator, worker: Worker) -> Self {
        Self {
            artifacts: ArtifactStore::new(root.clone()),
            queue: JobQueue::new(root.clone()),
            subscribers: SubscriberRegistry::new(root.clone()),
            worker: Arc::new(worker),
            coordinator,
            root,
        }
    }
}
