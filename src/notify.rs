//! Completion notices for subscribers.
//!
//! Delivery is best-effort: the worker logs a failed send and still
//! considers the job complete.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::TransportError;
use crate::fingerprint::Fingerprint;
use crate::kind::RequestKind;

pub const DEFAULT_SENDER: &str = "Trendcache <noreply@trendcache.local>";
pub const DEFAULT_SUBJECT: &str = "Your request is ready!";

static OUTBOX_SEQ: AtomicU64 = AtomicU64::new(0);

/// One message; every subscriber of a request is a blind copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub bcc: Vec<String>,
}

pub trait NotificationTransport: Send + Sync {
    fn send(&self, message: &Notification) -> Result<(), TransportError>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        info!(
            sender = %message.sender,
            subject = %message.subject,
            recipients = message.bcc.len(),
            body = %message.body,
            "notification"
        );
        Ok(())
    }
}

/// Drops each message as a JSON file into a directory watched by an
/// external mail relay. Files appear atomically.
#[derive(Debug, Clone)]
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl NotificationTransport for OutboxTransport {
    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        if message.bcc.is_empty() {
            return Err(TransportError::Rejected("no recipients".into()));
        }
        fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let seq = OUTBOX_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("{stamp}-{}-{seq:06}", std::process::id());
        let staged = self.dir.join(format!(".{name}.tmp"));
        let dest = self.dir.join(format!("{name}.json"));

        let json = serde_json::to_vec_pretty(message).map_err(|e| TransportError::Rejected(e.to_string()))?;
        let result = File::create(&staged)
            .and_then(|mut f| {
                f.write_all(&json)?;
                f.sync_all()
            })
            .and_then(|_| fs::rename(&staged, &dest));
        if let Err(e) = result {
            let _ = fs::remove_file(&staged);
            return Err(e.into());
        }
        info!(path = %dest.display(), recipients = message.bcc.len(), "notification queued in outbox");
        Ok(())
    }
}

/// Formats completion notices and hands them to a transport.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn NotificationTransport>,
    sender: String,
    subject: String,
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            transport,
            sender: DEFAULT_SENDER.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn compose(&self, kind: RequestKind, fp: &Fingerprint, parameters: &Value, bcc: Vec<String>) -> Notification {
        let params = serde_json::to_string_pretty(parameters).unwrap_or_else(|_| parameters.to_string());
        Notification {
            sender: self.sender.clone(),
            subject: self.subject.clone(),
            body: format!(
                "Your {kind} request (id: {fp}) is done and the results are ready for review.\n\n\
                 Parameters:\n{params}\n"
            ),
            bcc,
        }
    }

    pub fn notify_ready(
        &self,
        kind: RequestKind,
        fp: &Fingerprint,
        parameters: &Value,
        bcc: Vec<String>,
    ) -> Result<(), TransportError> {
        self.transport.send(&self.compose(kind, fp, parameters, bcc))
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sender", &self.sender)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
