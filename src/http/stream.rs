// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Server-sent event streams.
//!
//! Single-object watch: `initial` with the current object, `update` per
//! mutation, `delete` (empty payload) then close when the object vanishes.
//!
//! List streams subscribe to the per-type register *before* snapshotting,
//! under the type's read lock, so no mutation can fall between the
//! snapshot and the live tail. `full` mode re-emits the visible page as
//! `update` whenever it changes (debounced across bursts); `diff` mode
//! emits per-object `add`/`update`/`remove` against the previously emitted
//! view, re-emitting a move as `remove`+`add`.
//!
//! A `heartbeat` event with an empty payload goes out after each heartbeat
//! interval of silence; the timer resets on every real event.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use http::{header, HeaderMap};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval};
use tracing::{debug, warn};

use super::AppState;
use crate::bus::{Change, Subscription};
use crate::document::Document;
use crate::engine::{list_etag, Engine};
use crate::error::Error;
use crate::listopts::{ListOpts, StreamMode};
use crate::registry::{OpContext, ResourceType};

/// `GET /{kind}/{id}` with `Accept: text/event-stream`.
pub(crate) async fn item_stream(
    state: AppState,
    kind: String,
    id: String,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let engine = state.engine.clone();
    let rt = engine.registry().get(&kind)?;
    let ctx = OpContext::new(headers);

    // Subscribe before reading, under the read lock: nothing can commit in
    // between, so the initial snapshot plus the tail is gapless.
    let (initial, sub) = {
        let _guard = rt.lock.read().await;
        let sub = engine.store().subscribe_key(&kind, &id);
        let doc = engine
            .get_unlocked(&rt, &ctx, &id)
            .await?
            .ok_or_else(|| Error::not_found(format!("{id}: not found")))?;
        (doc, sub)
    };

    let (tx, rx) = mpsc::channel(16);
    let heartbeat = Duration::from_secs(engine.config().heartbeat_secs.max(1));
    tokio::spawn(run_item_stream(rt, ctx, initial, sub, tx, heartbeat));

    Ok(sse_response(rx))
}

/// `GET /{kind}` with `Accept: text/event-stream`.
pub(crate) async fn list_stream(
    state: AppState,
    kind: String,
    opts: ListOpts,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let engine = state.engine.clone();
    let rt = engine.registry().get(&kind)?;
    let ctx = OpContext::new(headers);

    // Surface bad filter/sort paths as a plain 400 before streaming starts.
    for filter in &opts.filters {
        rt.validate_path(&filter.path)?;
    }
    for sort in &opts.sorts {
        rt.validate_path(&sort.path)?;
    }

    let (initial, sub) = {
        let _guard = rt.lock.read().await;
        let sub = engine.store().subscribe_kind(&kind);
        let docs = engine.list_unlocked(&rt, &ctx, &opts).await?;
        (docs, sub)
    };

    let (tx, rx) = mpsc::channel(16);
    let heartbeat = Duration::from_secs(engine.config().heartbeat_secs.max(1));
    let debounce = Duration::from_millis(engine.config().stream_debounce_ms);

    match opts.stream {
        StreamMode::Full => {
            tokio::spawn(run_full_stream(
                engine, rt, ctx, opts, initial, sub, tx, heartbeat, debounce,
            ));
        }
        StreamMode::Diff => {
            tokio::spawn(run_diff_stream(
                engine, rt, ctx, opts, initial, sub, tx, heartbeat,
            ));
        }
    }

    Ok(sse_response(rx))
}

fn sse_response(rx: mpsc::Receiver<Event>) -> Response {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|ev| (Ok::<_, Infallible>(ev), rx))
    });

    let mut resp = Sse::new(stream).into_response();
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, http::HeaderValue::from_static("no-cache"));
    resp
}

fn ticker(period: Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

async fn emit(
    tx: &mpsc::Sender<Event>,
    kind: &str,
    name: &'static str,
    data: String,
) -> Result<(), ()> {
    crate::metrics::record_stream_event(kind, name);
    tx.send(Event::default().event(name).data(data))
        .await
        .map_err(|_| ())
}

async fn emit_doc(
    tx: &mpsc::Sender<Event>,
    kind: &str,
    name: &'static str,
    doc: &Document,
) -> Result<(), ()> {
    let data = serde_json::to_string(doc).map_err(|_| ())?;
    emit(tx, kind, name, data).await
}

async fn emit_page(
    tx: &mpsc::Sender<Event>,
    kind: &str,
    name: &'static str,
    docs: &[Document],
) -> Result<(), ()> {
    let data = serde_json::to_string(docs).map_err(|_| ())?;
    emit(tx, kind, name, data).await
}

async fn run_item_stream(
    rt: Arc<ResourceType>,
    ctx: OpContext,
    initial: Document,
    mut sub: Subscription,
    tx: mpsc::Sender<Event>,
    heartbeat: Duration,
) {
    let kind = rt.name().to_string();
    let mut beat = ticker(heartbeat);

    if emit_doc(&tx, &kind, "initial", &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            change = sub.recv() => match change {
                Some(Change::Put(doc)) => {
                    let doc = match rt.check_read(doc, &ctx) {
                        Ok(doc) => doc,
                        Err(err) => {
                            debug!(kind = %kind, error = %err, "read check ended watch");
                            return;
                        }
                    };
                    if emit_doc(&tx, &kind, "update", &doc).await.is_err() {
                        return;
                    }
                    beat.reset();
                }
                Some(Change::Delete { .. }) => {
                    let _ = emit(&tx, &kind, "delete", "{}".to_string()).await;
                    return;
                }
                None => {
                    if sub.lagged() {
                        warn!(kind = %kind, "watch terminated: slow consumer");
                    }
                    return;
                }
            },
            _ = beat.tick() => {
                if emit(&tx, &kind, "heartbeat", "{}".to_string()).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_full_stream(
    engine: Arc<Engine>,
    rt: Arc<ResourceType>,
    ctx: OpContext,
    opts: ListOpts,
    initial: Vec<Document>,
    mut sub: Subscription,
    tx: mpsc::Sender<Event>,
    heartbeat: Duration,
    debounce: Duration,
) {
    let kind = rt.name().to_string();
    let mut beat = ticker(heartbeat);
    let mut last_etag = list_etag(&initial);

    if emit_page(&tx, &kind, "initial", &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            change = sub.recv() => {
                if change.is_none() {
                    if sub.lagged() {
                        warn!(kind = %kind, "list stream terminated: slow consumer");
                    }
                    return;
                }

                // Drain the burst before recomputing the page.
                let closed = drain_burst(&mut sub, debounce).await;

                let page = match engine.list(&ctx, &kind, &opts).await {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(kind = %kind, error = %err, "list stream recompute failed");
                        return;
                    }
                };

                let etag = list_etag(&page);
                if etag != last_etag {
                    if emit_page(&tx, &kind, "update", &page).await.is_err() {
                        return;
                    }
                    last_etag = etag;
                    beat.reset();
                }

                if closed {
                    return;
                }
            },
            _ = beat.tick() => {
                if emit(&tx, &kind, "heartbeat", "{}".to_string()).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Consume further events until the stream is quiet for one debounce
/// window. Returns true when the subscription closed mid-burst.
async fn drain_burst(sub: &mut Subscription, debounce: Duration) -> bool {
    if debounce.is_zero() {
        return false;
    }
    loop {
        match timeout(debounce, sub.recv()).await {
            Ok(Some(_)) => {}
            Ok(None) => return true,
            Err(_) => return false,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_diff_stream(
    engine: Arc<Engine>,
    rt: Arc<ResourceType>,
    ctx: OpContext,
    opts: ListOpts,
    initial: Vec<Document>,
    mut sub: Subscription,
    tx: mpsc::Sender<Event>,
    heartbeat: Duration,
) {
    let kind = rt.name().to_string();
    let mut beat = ticker(heartbeat);
    let mut view = initial;

    if emit_page(&tx, &kind, "initial", &view).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            change = sub.recv() => {
                if change.is_none() {
                    if sub.lagged() {
                        warn!(kind = %kind, "diff stream terminated: slow consumer");
                    }
                    return;
                }

                let page = match engine.list(&ctx, &kind, &opts).await {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(kind = %kind, error = %err, "diff stream recompute failed");
                        return;
                    }
                };

                let events = diff_view(&view, &page);
                let emitted = !events.is_empty();
                for (name, doc) in events {
                    if emit_doc(&tx, &kind, name, &doc).await.is_err() {
                        return;
                    }
                }
                view = page;
                if emitted {
                    beat.reset();
                }
            },
            _ = beat.tick() => {
                if emit(&tx, &kind, "heartbeat", "{}".to_string()).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Compute per-object events between the previously emitted view and the
/// new visible page.
///
/// - vanished id → `remove`
/// - new id → `add`
/// - same id, different etag → `update`
/// - same id and etag but a different position among the survivors →
///   `remove` then `add` (position is observable state in a sorted page)
fn diff_view(old: &[Document], new: &[Document]) -> Vec<(&'static str, Document)> {
    let old_by_id: HashMap<&str, &Document> =
        old.iter().map(|d| (d.meta.id.as_str(), d)).collect();
    let new_ids: HashSet<&str> = new.iter().map(|d| d.meta.id.as_str()).collect();

    // Rank of each surviving id on both sides; a rank change is a move.
    let old_rank: HashMap<&str, usize> = old
        .iter()
        .filter(|d| new_ids.contains(d.meta.id.as_str()))
        .enumerate()
        .map(|(i, d)| (d.meta.id.as_str(), i))
        .collect();
    let new_rank: HashMap<&str, usize> = new
        .iter()
        .filter(|d| old_by_id.contains_key(d.meta.id.as_str()))
        .enumerate()
        .map(|(i, d)| (d.meta.id.as_str(), i))
        .collect();

    let mut events = Vec::new();

    for doc in old {
        if !new_ids.contains(doc.meta.id.as_str()) {
            events.push(("remove", doc.clone()));
        }
    }

    for doc in new {
        let id = doc.meta.id.as_str();
        match old_by_id.get(id) {
            None => events.push(("add", doc.clone())),
            Some(prev) if prev.meta.etag != doc.meta.etag => {
                events.push(("update", doc.clone()));
            }
            Some(prev) => {
                if old_rank.get(id) != new_rank.get(id) {
                    events.push(("remove", (*prev).clone()));
                    events.push(("add", doc.clone()));
                }
            }
        }
    }

    events
}
