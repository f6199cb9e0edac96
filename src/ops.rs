//! Shared operation wrappers for the CLI and any other front end.
//!
//! Each `op_*` function is a synchronous wrapper around the service. Input
//! and output are `serde_json::Value`; errors are plain strings ready to
//! print.

use serde_json::{json, Value};

use crate::coordinator::RequestOutcome;
use crate::fingerprint::Fingerprint;
use crate::kind::{Namespace, RequestKind};
use crate::service::Service;
use crate::store::JobRecord;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse_kind(kind: &str) -> Result<RequestKind, String> {
    RequestKind::parse(kind).map_err(|e| e.to_string())
}

fn parse_id(request_id: &str) -> Result<Fingerprint, String> {
    Fingerprint::parse(request_id).map_err(|e| e.to_string())
}

/// `None` means every kind.
fn kinds(kind: Option<&str>) -> Result<Vec<RequestKind>, String> {
    match kind {
        Some(k) => Ok(vec![parse_kind(k)?]),
        None => Ok(RequestKind::ALL.to_vec()),
    }
}

fn record_json(record: &JobRecord, subscribers: usize) -> Value {
    json!({
        "kind": record.kind.as_str(),
        "request_id": record.fingerprint.as_str(),
        "attempts": record.attempts,
        "enqueued_at": record.enqueued_at.to_rfc3339(),
        "last_error": record.last_error,
        "subscribers": subscribers,
        "parameters": record.parameters,
    })
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// Submit a request. An `email` argument, or an `email` field inside the
/// parameters, subscribes that address when the result is not ready.
pub fn op_request(svc: &Service, kind: &str, params: &Value, email: Option<&str>) -> Result<Value, String> {
    let kind = parse_kind(kind)?;
    let email = email
        .map(str::to_string)
        .or_else(|| params.get("email").and_then(Value::as_str).map(str::to_string))
        .filter(|e| !e.trim().is_empty());

    let outcome = match &email {
        Some(address) => svc.coordinator.request_and_subscribe(kind, params, address),
        None => svc.coordinator.request(kind, params),
    }
    .map_err(|e| e.to_string())?;

    Ok(match outcome {
        RequestOutcome::Ready(result) => json!({
            "kind": kind.as_str(),
            "status": "ready",
            "result": result,
        }),
        RequestOutcome::Pending(fp) => json!({
            "kind": kind.as_str(),
            "status": "pending",
            "request_id": fp.as_str(),
            "subscribed": email,
        }),
    })
}

pub fn op_subscribe(svc: &Service, kind: &str, request_id: &str, address: &str) -> Result<Value, String> {
    let kind = parse_kind(kind)?;
    let fp = parse_id(request_id)?;
    let outcome = svc
        .coordinator
        .subscribe(kind, &fp, address)
        .map_err(|e| e.to_string())?;
    let mut out = serde_json::to_value(outcome).map_err(|e| e.to_string())?;
    if let Some(obj) = out.as_object_mut() {
        obj.insert("request_id".into(), json!(fp.as_str()));
    }
    Ok(out)
}

pub fn op_status(svc: &Service, kind: &str, request_id: &str) -> Result<Value, String> {
    let kind = parse_kind(kind)?;
    let fp = parse_id(request_id)?;
    let status = svc.coordinator.status(kind, &fp).map_err(|e| e.to_string())?;
    let mut out = serde_json::to_value(status).map_err(|e| e.to_string())?;
    if let Some(obj) = out.as_object_mut() {
        obj.insert("kind".into(), json!(kind.as_str()));
        obj.insert("request_id".into(), json!(fp.as_str()));
    }
    Ok(out)
}

/// The finished result of a request, or an error when it is not ready.
pub fn op_result(svc: &Service, kind: &str, request_id: &str) -> Result<Value, String> {
    let kind = parse_kind(kind)?;
    let fp = parse_id(request_id)?;
    svc.coordinator
        .result(kind, &fp)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("{kind} request {fp} has no result yet"))
}

// ── Queue administration ────────────────────────────────────────────────────

pub fn op_queue_list(svc: &Service, kind: Option<&str>) -> Result<Value, String> {
    let mut out = Vec::new();
    for kind in kinds(kind)? {
        for record in svc.queue.list_pending(kind).map_err(|e| e.to_string())? {
            let subscribers = svc
                .subscribers
                .peek(kind, &record.fingerprint)
                .map_err(|e| e.to_string())?
                .len();
            out.push(record_json(&record, subscribers));
        }
    }
    Ok(Value::Array(out))
}

pub fn op_dead_list(svc: &Service, kind: Option<&str>) -> Result<Value, String> {
    let mut out = Vec::new();
    for kind in kinds(kind)? {
        for record in svc.queue.list_dead(kind).map_err(|e| e.to_string())? {
            let subscribers = svc
                .subscribers
                .peek(kind, &record.fingerprint)
                .map_err(|e| e.to_string())?
                .len();
            out.push(record_json(&record, subscribers));
        }
    }
    Ok(Value::Array(out))
}

pub fn op_requeue(svc: &Service, kind: &str, request_id: &str) -> Result<Value, String> {
    let kind = parse_kind(kind)?;
    let fp = parse_id(request_id)?;
    let requeued = svc.queue.requeue_dead(kind, &fp).map_err(|e| e.to_string())?;
    Ok(json!({
        "kind": kind.as_str(),
        "request_id": fp.as_str(),
        "requeued": requeued,
    }))
}

/// Run one worker pass synchronously.
pub fn op_tick(svc: &Service) -> Result<Value, String> {
    let report = svc.worker.tick().map_err(|e| e.to_string())?;
    let mut out = serde_json::to_value(&report).map_err(|e| e.to_string())?;
    if let Some(obj) = out.as_object_mut() {
        obj.insert("completed".into(), json!(report.completed()));
        obj.insert("failed".into(), json!(report.failed()));
    }
    Ok(out)
}

// ── Cache management operations ─────────────────────────────────────────────

pub fn op_cache_info(svc: &Service) -> Result<Value, String> {
    let artifacts = svc.artifacts.info().map_err(|e| e.to_string())?;
    let total_bytes: u64 = artifacts.iter().map(|a| a.bytes).sum();
    Ok(json!({
        "path": svc.root.path().display().to_string(),
        "total": artifacts.len(),
        "total_bytes": total_bytes,
        "artifacts": artifacts,
    }))
}

/// Evict one namespace, or everything when `namespace` is `None`.
pub fn op_cache_clear(svc: &Service, namespace: Option<&str>) -> Result<Value, String> {
    let ns = namespace
        .map(Namespace::parse)
        .transpose()
        .map_err(|e| e.to_string())?;
    let deleted = svc.artifacts.invalidate(ns).map_err(|e| e.to_string())?;
    Ok(json!({
        "path": svc.root.path().display().to_string(),
        "deleted": deleted,
        "namespace": namespace.unwrap_or("all"),
    }))
}
