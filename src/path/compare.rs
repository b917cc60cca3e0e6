// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed comparison of resolved values against textual right-hand sides.
//!
//! The concrete kind of the resolved (stored) value dictates how the RHS is
//! parsed: integers and floats parse decimally, bools parse `true`/`false`,
//! strings compare verbatim. Fields declared [`FieldKind::Time`] accept
//! RFC3339 (with or without zone), epoch seconds, and epoch milliseconds;
//! the parsed value carries its precision and the stored time is truncated
//! to that precision before comparison, so `2006-01-02T15:04:05Z` matches a
//! stored value with subsecond content. [`FieldKind::Date`] fields parse
//! `YYYY-MM-DD`.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::Error;

/// Declared kind for string-typed fields with richer semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// RFC3339 timestamp
    Time,
    /// Civil date (`YYYY-MM-DD`)
    Date,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// String has-prefix
    Hp,
    /// Membership in a comma-separated list
    In,
}

impl Op {
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "hp" => Ok(Self::Hp),
            "in" => Ok(Self::In),
            other => Err(Error::bad_request(format!("unknown filter operator: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Hp => "hp",
            Self::In => "in",
        }
    }
}

/// Epoch values at or above this magnitude are milliseconds, below are
/// seconds. 1e11 seconds is year 5138; no plausible confusion.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Parsed RHS time with the precision its textual form carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimePrecision {
    Second,
    Milli,
    Day,
}

pub(super) fn compare(
    stored: &Value,
    op: Op,
    rhs: &str,
    kind: Option<FieldKind>,
) -> Result<bool, Error> {
    match stored {
        Value::Null => Ok(false),
        Value::Array(items) => {
            for item in items {
                if compare(item, op, rhs, kind)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Object(_) => Err(Error::bad_request(
            "cannot compare a structured field; filter on one of its members",
        )),
        Value::Bool(stored) => compare_bool(*stored, op, rhs),
        Value::Number(n) => compare_number(n, op, rhs),
        Value::String(s) => match kind {
            Some(FieldKind::Time) => compare_time(s, op, rhs),
            Some(FieldKind::Date) => compare_date(s, op, rhs),
            None => compare_string(s, op, rhs),
        },
    }
}

fn ordered(ord: Ordering, op: Op) -> bool {
    match op {
        Op::Eq | Op::In => ord == Ordering::Equal,
        Op::Ne => ord != Ordering::Equal,
        Op::Gt => ord == Ordering::Greater,
        Op::Gte => ord != Ordering::Less,
        Op::Lt => ord == Ordering::Less,
        Op::Lte => ord != Ordering::Greater,
        Op::Hp => false,
    }
}

fn compare_bool(stored: bool, op: Op, rhs: &str) -> Result<bool, Error> {
    if op == Op::Hp {
        return Err(Error::bad_request("operator hp requires a string field"));
    }
    if op == Op::In {
        for item in rhs.split(',') {
            if compare_bool(stored, Op::Eq, item.trim())? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    let want = match rhs {
        "true" => true,
        "false" => false,
        other => {
            return Err(Error::bad_request(format!(
                "parse bool value failed: {other}"
            )))
        }
    };

    Ok(ordered(stored.cmp(&want), op))
}

fn compare_number(stored: &serde_json::Number, op: Op, rhs: &str) -> Result<bool, Error> {
    if op == Op::Hp {
        return Err(Error::bad_request("operator hp requires a string field"));
    }
    if op == Op::In {
        for item in rhs.split(',') {
            if compare_number(stored, Op::Eq, item.trim())? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if let Some(l) = stored.as_i64() {
        let r: i64 = rhs
            .parse()
            .map_err(|_| Error::bad_request(format!("parse integer value failed: {rhs}")))?;
        return Ok(ordered(l.cmp(&r), op));
    }

    if let Some(l) = stored.as_u64() {
        let r: u64 = rhs
            .parse()
            .map_err(|_| Error::bad_request(format!("parse integer value failed: {rhs}")))?;
        return Ok(ordered(l.cmp(&r), op));
    }

    let l = stored.as_f64().unwrap_or(f64::NAN);
    let r: f64 = rhs
        .parse()
        .map_err(|_| Error::bad_request(format!("parse float value failed: {rhs}")))?;
    let ord = l
        .partial_cmp(&r)
        .ok_or_else(|| Error::bad_request("float comparison is undefined for NaN"))?;
    Ok(ordered(ord, op))
}

fn compare_string(stored: &str, op: Op, rhs: &str) -> Result<bool, Error> {
    match op {
        Op::Hp => Ok(stored.starts_with(rhs)),
        Op::In => Ok(rhs.split(',').any(|item| item == stored)),
        _ => Ok(ordered(stored.cmp(rhs), op)),
    }
}

fn compare_time(stored: &str, op: Op, rhs: &str) -> Result<bool, Error> {
    if op == Op::Hp {
        return Err(Error::bad_request("operator hp requires a string field"));
    }
    if op == Op::In {
        for item in rhs.split(',') {
            if compare_time(stored, Op::Eq, item.trim())? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    let stored = parse_stored_time(stored)?;
    let (want, precision) = parse_time_rhs(rhs)?;

    let ord = match precision {
        TimePrecision::Second => stored.timestamp().cmp(&want.timestamp()),
        TimePrecision::Milli => stored.timestamp_millis().cmp(&want.timestamp_millis()),
        TimePrecision::Day => stored.date_naive().cmp(&want.date_naive()),
    };

    Ok(ordered(ord, op))
}

fn compare_date(stored: &str, op: Op, rhs: &str) -> Result<bool, Error> {
    if op == Op::Hp {
        return Err(Error::bad_request("operator hp requires a string field"));
    }
    if op == Op::In {
        for item in rhs.split(',') {
            if compare_date(stored, Op::Eq, item.trim())? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    let stored = parse_date(stored)?;
    let want = parse_date(rhs)?;
    Ok(ordered(stored.cmp(&want), op))
}

fn parse_date(s: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Error::bad_request(format!("parse date value failed: {s}")))
}

/// Stored times are whatever chrono serialized: RFC3339 with optional
/// fraction. Be liberal and accept a zoneless form too.
fn parse_stored_time(s: &str) -> Result<DateTime<Utc>, Error> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(t.and_utc());
    }
    Err(Error::bad_request(format!("parse time value failed: {s}")))
}

fn parse_time_rhs(s: &str) -> Result<(DateTime<Utc>, TimePrecision), Error> {
    if let Ok(epoch) = s.parse::<i64>() {
        if epoch.abs() >= EPOCH_MILLIS_CUTOFF {
            let t = DateTime::from_timestamp_millis(epoch)
                .ok_or_else(|| Error::bad_request(format!("epoch millis out of range: {s}")))?;
            return Ok((t, TimePrecision::Milli));
        }
        let t = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| Error::bad_request(format!("epoch seconds out of range: {s}")))?;
        return Ok((t, TimePrecision::Second));
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        let precision = if s.contains('.') {
            TimePrecision::Milli
        } else {
            TimePrecision::Second
        };
        return Ok((t.with_timezone(&Utc), precision));
    }

    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        let precision = if s.contains('.') {
            TimePrecision::Milli
        } else {
            TimePrecision::Second
        };
        return Ok((t.and_utc(), precision));
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let t = d
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::bad_request(format!("parse time value failed: {s}")))?;
        return Ok((t.and_utc(), TimePrecision::Day));
    }

    Err(Error::bad_request(format!("parse time value failed: {s}")))
}

/// Total order over two resolved values of the same field, for sorting.
///
/// Missing/null sorts first; mixed kinds fall back to a stable kind rank so
/// the comparator stays total.
pub fn order_values(a: Option<&Value>, b: Option<&Value>, kind: Option<FieldKind>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => order_present(a, b, kind),
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn order_present(a: &Value, b: &Value, kind: Option<FieldKind>) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x.cmp(&y);
            }
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            if kind == Some(FieldKind::Time) {
                if let (Ok(x), Ok(y)) = (parse_stored_time(x), parse_stored_time(y)) {
                    return x.cmp(&y);
                }
            }
            x.cmp(y)
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}
