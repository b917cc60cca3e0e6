// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Verb handlers: thin mappings from HTTP onto engine operations.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{header, HeaderMap, StatusCode};
use serde_json::Value;

use super::{negotiate, stream, AppState, Negotiated};
use crate::document::Document;
use crate::engine::list_etag;
use crate::error::Error;
use crate::listopts::ListOpts;
use crate::metadata::IfMatch;
use crate::registry::OpContext;

fn parse_body(bytes: &Bytes) -> Result<Value, Error> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::bad_request(format!("parse request body failed: {e}")))
}

fn if_match(headers: &HeaderMap) -> Result<Option<IfMatch>, Error> {
    match headers.get(header::IF_MATCH) {
        None => Ok(None),
        Some(raw) => {
            let raw = raw
                .to_str()
                .map_err(|_| Error::bad_request("invalid If-Match: not valid UTF-8"))?;
            IfMatch::parse(raw).map(Some)
        }
    }
}

fn if_none_match(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::IF_NONE_MATCH)?.to_str().ok()?;
    let token = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"'))?;
    Some(token.to_string())
}

fn doc_response(doc: &Document) -> Response {
    (
        StatusCode::OK,
        [(header::ETAG, format!("\"{}\"", doc.meta.etag))],
        Json(doc.to_value()),
    )
        .into_response()
}

pub async fn get_collection(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let opts = ListOpts::parse(query.as_deref())?;

    match negotiate(&headers)? {
        Negotiated::EventStream => stream::list_stream(state, kind, opts, headers).await,
        Negotiated::Json => {
            let ctx = OpContext::new(headers.clone());
            let docs = state.engine.list(&ctx, &kind, &opts).await?;
            let etag = list_etag(&docs);

            if if_none_match(&headers).as_deref() == Some(etag.as_str()) {
                return Ok((
                    StatusCode::NOT_MODIFIED,
                    [(header::ETAG, format!("\"{etag}\""))],
                )
                    .into_response());
            }

            crate::metrics::record_operation(&kind, "list", "success");
            Ok((
                StatusCode::OK,
                [(header::ETAG, format!("\"{etag}\""))],
                Json(docs),
            )
                .into_response())
        }
    }
}

pub async fn get_item(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    match negotiate(&headers)? {
        Negotiated::EventStream => stream::item_stream(state, kind, id, headers).await,
        Negotiated::Json => {
            let ctx = OpContext::new(headers.clone());
            let doc = state
                .engine
                .get(&ctx, &kind, &id)
                .await?
                .ok_or_else(|| Error::not_found(format!("{id}: not found")))?;

            if if_none_match(&headers).as_deref() == Some(doc.meta.etag.as_str()) {
                return Ok((
                    StatusCode::NOT_MODIFIED,
                    [(header::ETAG, format!("\"{}\"", doc.meta.etag))],
                )
                    .into_response());
            }

            crate::metrics::record_operation(&kind, "get", "success");
            Ok(doc_response(&doc))
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, Error> {
    let body = parse_body(&bytes)?;
    let ctx = OpContext::new(headers);
    let doc = state.engine.create(&ctx, &kind, body).await?;
    Ok(doc_response(&doc))
}

pub async fn replace(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, Error> {
    let body = parse_body(&bytes)?;
    let cond = if_match(&headers)?;
    let ctx = OpContext::new(headers);
    let doc = state
        .engine
        .replace(&ctx, &kind, &id, body, cond.as_ref())
        .await?;
    Ok(doc_response(&doc))
}

pub async fn merge(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, Error> {
    let body = parse_body(&bytes)?;
    let cond = if_match(&headers)?;
    let ctx = OpContext::new(headers);
    let doc = state
        .engine
        .merge(&ctx, &kind, &id, body, cond.as_ref())
        .await?;
    Ok(doc_response(&doc))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let cond = if_match(&headers)?;
    let ctx = OpContext::new(headers);
    state.engine.delete(&ctx, &kind, &id, cond.as_ref()).await?;
    Ok(StatusCode::OK.into_response())
}
