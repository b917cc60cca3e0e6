// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dynamic field-path evaluation.
//!
//! Paths are dotted selectors (`a.b.c`) resolved against a document's field
//! map. Resolution descends named members; a missing or null intermediate
//! yields "no value" (the predicate is false, not an error). Array nodes
//! distribute the predicate: `P(array)` holds iff `P(x)` holds for at least
//! one element.
//!
//! Right-hand sides are textual and parsed according to the concrete kind of
//! the resolved value — see [`compare`].

mod compare;

pub use compare::{order_values, FieldKind, Op};

use serde_json::{Map, Value};

use crate::error::Error;

/// Resolve every leaf candidate for `path`, distributing across arrays.
///
/// Null leaves are dropped: a null field never matches any predicate.
pub fn candidates<'a>(fields: &'a Map<String, Value>, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    walk_map(fields, &parts, &mut out);
    out
}

/// The first resolved leaf, used for ordering (sorts ignore extra array
/// elements).
pub fn first<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    candidates(fields, path).into_iter().next()
}

fn walk_map<'a>(map: &'a Map<String, Value>, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    if let Some(v) = map.get(*head) {
        walk(v, rest, out);
    }
}

fn walk<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                walk(item, parts, out);
            }
        }
        Value::Object(map) => {
            if parts.is_empty() {
                out.push(value);
            } else {
                walk_map(map, parts, out);
            }
        }
        leaf => {
            if parts.is_empty() {
                out.push(leaf);
            }
        }
    }
}

/// Evaluate `path op rhs` against a field map.
///
/// No resolved value means no match. Type-incompatible comparisons and
/// undefined operators surface as [`Error::BadRequest`].
pub fn matches(
    fields: &Map<String, Value>,
    path: &str,
    op: Op,
    rhs: &str,
    kind: Option<FieldKind>,
) -> Result<bool, Error> {
    for candidate in candidates(fields, path) {
        if compare::compare(candidate, op, rhs, kind)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check a path against a type's zero-value shape.
///
/// Walks as deep as the shape allows; members below an (empty) array stop
/// the walk and are accepted, since element shape is unknown at
/// registration time.
pub fn validate(zero: &Map<String, Value>, path: &str) -> Result<(), Error> {
    let unknown = || Error::bad_request(format!("unknown filter path: {path}"));
    let parts: Vec<&str> = path.split('.').collect();
    let mut map = zero;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            return Err(unknown());
        }

        let value = map.get(*part).ok_or_else(unknown)?;
        let last = i + 1 == parts.len();

        match value {
            Value::Object(m) => map = m,
            Value::Array(items) => match items.first() {
                Some(Value::Object(m)) => map = m,
                // Unknown element shape; accept the rest of the path.
                _ => return Ok(()),
            },
            _ if last => return Ok(()),
            _ => return Err(unknown()),
        }
    }

    Ok(())
}
