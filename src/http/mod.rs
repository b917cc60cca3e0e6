// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP surface.
//!
//! Maps the standard verbs onto engine operations and negotiates between
//! one-shot JSON and server-sent event streams by `Accept` header. The
//! request path is: idempotency gate → request hook → routing → handler.

pub mod clients;
pub mod debug;
pub mod handlers;
pub mod openapi;
pub mod stream;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::HeaderMap;
use tracing::info;

use crate::engine::Engine;
use crate::error::Error;
use crate::idempotency::{self, IdempotencyGate};

/// Pre-route filter: may rewrite the request or reject it, in which case
/// the rejection is returned verbatim.
pub type RequestHook = dyn Fn(Request) -> Result<Request, Error> + Send + Sync;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gate: Arc<IdempotencyGate>,
    request_hook: Option<Arc<RequestHook>>,
}

/// Build the router for an engine.
pub fn build_router(engine: Arc<Engine>) -> Router {
    build_router_with_hook(engine, None)
}

/// Build the router with a request hook installed.
pub fn build_router_with_hook(engine: Arc<Engine>, hook: Option<Arc<RequestHook>>) -> Router {
    let state = AppState {
        engine,
        gate: Arc::new(IdempotencyGate::new()),
        request_hook: hook,
    };

    Router::new()
        .route("/_debug", get(debug::handle))
        .route("/_openapi", get(openapi::handle))
        .route("/_goclient", get(clients::go_client))
        .route("/_tsclient", get(clients::ts_client))
        .route(
            "/{kind}",
            get(handlers::get_collection).post(handlers::create),
        )
        .route(
            "/{kind}/{id}",
            get(handlers::get_item)
                .put(handlers::replace)
                .patch(handlers::merge)
                .delete(handlers::delete_item),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_hook_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            idempotency::middleware,
        ))
        .with_state(state)
}

/// Serve an engine on an already-bound listener.
pub async fn serve(engine: Arc<Engine>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    info!(addr = %engine.config().listen_addr, "resource-engine listening");
    let app = build_router(engine);
    axum::serve(listener, app).await
}

async fn request_hook_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    match &state.request_hook {
        None => next.run(req).await,
        Some(hook) => match hook(req) {
            Ok(req) => next.run(req).await,
            Err(err) => err.into_response(),
        },
    }
}

/// Content negotiation outcome for GET requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Negotiated {
    Json,
    EventStream,
}

/// Pick a response representation from the Accept header. Client listing
/// order expresses preference; no header (or `*/*`) defaults to JSON.
pub(crate) fn negotiate(headers: &HeaderMap) -> Result<Negotiated, Error> {
    let Some(accept) = headers.get(http::header::ACCEPT) else {
        return Ok(Negotiated::Json);
    };
    let accept = accept
        .to_str()
        .map_err(|_| Error::bad_request("invalid Accept header"))?;
    if accept.trim().is_empty() {
        return Ok(Negotiated::Json);
    }

    for part in accept.split(',') {
        let mime = part.split(';').next().unwrap_or_default().trim();
        match mime {
            "application/json" | "application/*" | "*/*" => return Ok(Negotiated::Json),
            "text/event-stream" => return Ok(Negotiated::EventStream),
            _ => {}
        }
    }

    Err(Error::NotAcceptable(format!(
        "no supported content type in Accept: {accept}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(accept: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(a) = accept {
            h.insert(http::header::ACCEPT, a.parse().unwrap());
        }
        h
    }

    #[test]
    fn test_negotiate_defaults_to_json() {
        assert_eq!(negotiate(&headers(None)).unwrap(), Negotiated::Json);
        assert_eq!(negotiate(&headers(Some("*/*"))).unwrap(), Negotiated::Json);
        assert_eq!(negotiate(&headers(Some(""))).unwrap(), Negotiated::Json);
    }

    #[test]
    fn test_negotiate_json() {
        assert_eq!(
            negotiate(&headers(Some("application/json"))).unwrap(),
            Negotiated::Json
        );
        assert_eq!(
            negotiate(&headers(Some("application/json; charset=utf-8"))).unwrap(),
            Negotiated::Json
        );
    }

    #[test]
    fn test_negotiate_event_stream() {
        assert_eq!(
            negotiate(&headers(Some("text/event-stream"))).unwrap(),
            Negotiated::EventStream
        );
    }

    #[test]
    fn test_negotiate_client_order_wins() {
        assert_eq!(
            negotiate(&headers(Some("text/event-stream, application/json"))).unwrap(),
            Negotiated::EventStream
        );
        assert_eq!(
            negotiate(&headers(Some("application/json, text/event-stream"))).unwrap(),
            Negotiated::Json
        );
    }

    #[test]
    fn test_negotiate_unsupported() {
        let err = negotiate(&headers(Some("application/xml"))).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_ACCEPTABLE);
    }
}
