pub mod algo;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod kind;
pub mod notify;
pub mod ops;
pub mod params;
pub mod service;
pub mod store;
pub mod worker;

pub use config::Config;
pub use coordinator::{Coordinator, RequestOutcome, RequestStatus, SubscribeOutcome};
pub use engine::{AnalysisEngine, CorpusEngine};
pub use error::{EngineError, Error, Result, TransportError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use kind::{Namespace, RequestKind};
pub use notify::{Notification, NotificationTransport, Notifier};
pub use service::Service;
pub use worker::{JobOutcome, TickReport, Worker};
