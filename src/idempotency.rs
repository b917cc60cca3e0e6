// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Idempotent request replay.
//!
//! Active only when a request carries `Idempotency-Key: "<token>"` (the
//! token must be quoted). The first execution is captured — status,
//! single-valued headers, body — and persisted through the storage
//! abstraction under a reserved type name. A repeat of the same key
//! validates request equivalence (method, URL, critical headers, body
//! SHA-256) and replays the stored response without invoking the handler;
//! any mismatch is a bad request naming the differing part. Two in-flight
//! requests with one key conflict: the second gets 409.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::document::Document;
use crate::error::Error;
use crate::http::AppState;
use crate::metadata::Metadata;

/// Reserved storage type name for idempotency records.
pub const IDEMPOTENCY_KIND: &str = "idempotency-key";

/// Headers that must match between the original and a replayed request.
const CRITICAL_HEADERS: [&str; 2] = ["accept", "authorization"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedResult {
    method: String,
    url: String,
    request_headers: BTreeMap<String, String>,
    body_sha256: String,
    status: u16,
    response_headers: BTreeMap<String, String>,
    /// Hex-encoded so binary-safe replay survives the JSON storage layer.
    response_body_hex: String,
}

/// Process-wide single-flight set. The mutex is held only around set
/// mutation; storage I/O happens outside it.
#[derive(Debug, Default)]
pub struct IdempotencyGate {
    in_flight: Mutex<HashSet<String>>,
}

impl IdempotencyGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_key(self: &Arc<Self>, key: &str) -> Result<InFlight, Error> {
        let mut set = self.in_flight.lock();
        if !set.insert(key.to_string()) {
            return Err(Error::conflict(format!(
                "request with Idempotency-Key {key} already in flight"
            )));
        }
        Ok(InFlight {
            gate: self.clone(),
            key: key.to_string(),
        })
    }
}

/// Releases the in-flight slot on every exit path. Never outlives the
/// request.
#[derive(Debug)]
struct InFlight {
    gate: Arc<IdempotencyGate>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gate.in_flight.lock().remove(&self.key);
    }
}

pub async fn middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(raw) = req.headers().get("idempotency-key") else {
        return next.run(req).await;
    };

    let raw = match raw.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => {
            return Error::bad_request("invalid Idempotency-Key: not valid UTF-8").into_response()
        }
    };

    match serve(state, &raw, req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn serve(state: AppState, raw: &str, req: Request, next: Next) -> Result<Response, Error> {
    let key = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::bad_request(format!("invalid Idempotency-Key: {raw}")))?;

    let stored = state
        .engine
        .store()
        .read(IDEMPOTENCY_KIND, key)
        .await
        .map_err(|e| Error::internal(format!("read idempotency key {key} failed: {e}")))?;

    if let Some(doc) = stored {
        return replay(&state, key, doc, req).await;
    }

    let _slot = state.gate.lock_key(key)?;

    // Capture identity fields before the body is consumed.
    let method = req.method().to_string();
    let url = req.uri().to_string();
    let mut request_headers = BTreeMap::new();
    for name in CRITICAL_HEADERS {
        let value = header_str(req.headers(), name);
        if !value.is_empty() {
            request_headers.insert(name.to_string(), value);
        }
    }

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, state.engine.config().max_body_bytes)
        .await
        .map_err(|e| Error::bad_request(format!("read request body failed: {e}")))?;
    let body_sha256 = hex::encode(Sha256::digest(&bytes));

    let req = Request::from_parts(parts, Body::from(bytes));
    let resp = next.run(req).await;

    // Streaming responses cannot be captured for replay; pass them through.
    if is_event_stream(&resp) {
        warn!(key, "skipping idempotency capture for event-stream response");
        return Ok(resp);
    }

    let (resp_parts, resp_body) = resp.into_parts();
    let resp_bytes = to_bytes(resp_body, usize::MAX)
        .await
        .map_err(|e| Error::internal(format!("buffer response body failed: {e}")))?;

    let mut response_headers = BTreeMap::new();
    for (name, value) in &resp_parts.headers {
        if let Ok(value) = value.to_str() {
            response_headers
                .entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    let saved = SavedResult {
        method,
        url,
        request_headers,
        body_sha256,
        status: resp_parts.status.as_u16(),
        response_headers,
        response_body_hex: hex::encode(&resp_bytes),
    };

    persist(&state, key, &saved).await;

    Ok(Response::from_parts(resp_parts, Body::from(resp_bytes)))
}

async fn replay(state: &AppState, key: &str, doc: Document, req: Request) -> Result<Response, Error> {
    let saved: SavedResult = serde_json::from_value(Value::Object(doc.fields))
        .map_err(|e| Error::internal(format!("decode idempotency record failed: {e}")))?;

    if req.method().as_str() != saved.method {
        return Err(Error::bad_request(format!(
            "HTTP method mismatch: {}",
            req.method()
        )));
    }

    if req.uri().to_string() != saved.url {
        return Err(Error::bad_request(format!("URL mismatch: {}", req.uri())));
    }

    for name in CRITICAL_HEADERS {
        let got = header_str(req.headers(), name);
        let want = saved
            .request_headers
            .get(name)
            .map(String::as_str)
            .unwrap_or_default();
        if got != want {
            return Err(Error::bad_request(format!("header mismatch: {name}: {got}")));
        }
    }

    let bytes = to_bytes(req.into_body(), state.engine.config().max_body_bytes)
        .await
        .map_err(|e| Error::bad_request(format!("hash request body failed: {e}")))?;
    let hexed = hex::encode(Sha256::digest(&bytes));
    if hexed != saved.body_sha256 {
        return Err(Error::bad_request(format!(
            "request body mismatch: {hexed} vs {}",
            saved.body_sha256
        )));
    }

    let body = hex::decode(&saved.response_body_hex)
        .map_err(|e| Error::internal(format!("decode idempotency record failed: {e}")))?;

    let mut builder = Response::builder().status(saved.status);
    for (name, value) in &saved.response_headers {
        builder = builder.header(name, value);
    }
    let resp = builder
        .body(Body::from(body))
        .map_err(|e| Error::internal(format!("build replay response failed: {e}")))?;

    crate::metrics::record_idempotent_replay();
    debug!(key, status = saved.status, "replayed idempotent response");
    Ok(resp)
}

/// Best-effort persistence: a lost capture only costs a re-execution on the
/// client's next retry.
async fn persist(state: &AppState, key: &str, saved: &SavedResult) {
    let fields = match serde_json::to_value(saved) {
        Ok(Value::Object(map)) => map,
        _ => {
            warn!(key, "encode idempotency record failed");
            return;
        }
    };

    let doc = Document {
        meta: Metadata {
            id: key.to_string(),
            generation: 0,
            etag: String::new(),
        },
        fields,
    };

    if let Err(err) = state.engine.store().write(IDEMPOTENCY_KIND, &doc).await {
        warn!(key, error = %err, "persist idempotency record failed");
    }
}

fn header_str(headers: &http::HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn is_event_stream(resp: &Response) -> bool {
    header_str(resp.headers(), "content-type").starts_with("text/event-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_lock_conflicts() {
        let gate = Arc::new(IdempotencyGate::new());

        let slot = gate.lock_key("k1").unwrap();
        let err = gate.lock_key("k1").unwrap_err();
        assert_eq!(err.status(), http::StatusCode::CONFLICT);

        // Different key is independent
        let _other = gate.lock_key("k2").unwrap();

        // Releasing the slot frees the key
        drop(slot);
        let _again = gate.lock_key("k1").unwrap();
    }

    #[test]
    fn test_saved_result_round_trip() {
        let saved = SavedResult {
            method: "POST".into(),
            url: "/widget".into(),
            request_headers: BTreeMap::from([("accept".to_string(), "*/*".to_string())]),
            body_sha256: "abc".into(),
            status: 200,
            response_headers: BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            response_body_hex: hex::encode(b"{\"ok\":true}"),
        };

        let value = serde_json::to_value(&saved).unwrap();
        let back: SavedResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.method, "POST");
        assert_eq!(back.status, 200);
        assert_eq!(
            hex::decode(&back.response_body_hex).unwrap(),
            b"{\"ok\":true}"
        );
    }
}
