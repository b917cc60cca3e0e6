// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot listing: filter, stable multi-key sort, cursor, window.
//!
//! The storage list order is unspecified; everything observable is imposed
//! here. The list etag is the digest of the member etags in final order, so
//! two identical visible pages always carry the same etag and any visible
//! change produces a new one.

use sha2::{Digest, Sha256};

use super::Engine;
use crate::document::Document;
use crate::error::Error;
use crate::listopts::ListOpts;
use crate::path;
use crate::registry::{OpContext, ResourceType};

impl Engine {
    pub(crate) async fn list_unlocked(
        &self,
        rt: &ResourceType,
        ctx: &OpContext,
        opts: &ListOpts,
    ) -> Result<Vec<Document>, Error> {
        let docs = self.store().list(rt.name()).await?;
        let visible = apply(rt, docs, opts)?;

        // Read checks last: a refused item drops out of the page, and the
        // hook may redact what remains.
        let mut out = Vec::with_capacity(visible.len());
        for doc in visible {
            if let Ok(doc) = rt.check_read(doc, ctx) {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

/// Pure snapshot shaping, shared by one-shot lists and the stream engine.
pub(crate) fn apply(
    rt: &ResourceType,
    mut docs: Vec<Document>,
    opts: &ListOpts,
) -> Result<Vec<Document>, Error> {
    for filter in &opts.filters {
        rt.validate_path(&filter.path)?;
        let kind = rt.field_kind(&filter.path);

        let mut kept = Vec::with_capacity(docs.len());
        for doc in docs {
            if path::matches(&doc.fields, &filter.path, filter.op, &filter.value, kind)? {
                kept.push(doc);
            }
        }
        docs = kept;
    }

    for sort in &opts.sorts {
        rt.validate_path(&sort.path)?;
    }

    // Secondary id ordering keeps the result deterministic when sort keys
    // tie (or no sorts are given).
    docs.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
    if !opts.sorts.is_empty() {
        docs.sort_by(|a, b| {
            for sort in &opts.sorts {
                let kind = rt.field_kind(&sort.path);
                let ord = path::order_values(
                    path::first(&a.fields, &sort.path),
                    path::first(&b.fields, &sort.path),
                    kind,
                );
                let ord = if sort.descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    if let Some(after) = &opts.after {
        match docs.iter().position(|d| &d.meta.id == after) {
            Some(pos) => {
                docs.drain(..=pos);
            }
            // The keyed position is gone; nothing is "after" it.
            None => docs.clear(),
        }
    }

    if opts.offset > 0 {
        if opts.offset >= docs.len() {
            docs.clear();
        } else {
            docs.drain(..opts.offset);
        }
    }

    if let Some(limit) = opts.limit {
        docs.truncate(limit);
    }

    Ok(docs)
}

/// ETag over a result set: hash of the member etags in final order.
#[must_use]
pub fn list_etag(docs: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in docs {
        hasher.update(doc.meta.etag.as_bytes());
    }
    format!("etag:{}", hex::encode(hasher.finalize()))
}
