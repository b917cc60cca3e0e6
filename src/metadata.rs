//! Server-owned resource metadata.
//!
//! Every registered resource embeds a [`Metadata`] block:
//! - `id`: opaque string, assigned at create, immutable thereafter
//! - `generation`: monotonic mutation counter, 0 on create, +1 per mutation
//! - `etag`: content digest of the serialized resource, minus the etag itself
//!
//! Clients may send metadata on the wire; the engine discards it before
//! merge or replace. ETags are opaque to clients; the `etag:` prefix exists
//! so If-Match can tell an etag token apart from a `generation:N` token.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Wire names of the server-owned fields.
pub const METADATA_FIELDS: [&str; 3] = ["id", "generation", "etag"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub etag: String,
}

/// Compute the etag for a document's content.
///
/// The input is the canonical (sorted-key) JSON serialization of
/// `{id, ...fields}`. serde_json maps are ordered, so equal content always
/// digests to the same token. The generation is deliberately excluded: a
/// mutation that changes no user field keeps its etag, so etag equality
/// tracks content, not history.
pub fn compute_etag(id: &str, fields: &Map<String, Value>) -> Result<String, Error> {
    let mut canonical = Map::new();
    canonical.insert("id".to_string(), Value::String(id.to_string()));
    for (k, v) in fields {
        canonical.insert(k.clone(), v.clone());
    }

    let bytes = serde_json::to_vec(&Value::Object(canonical))?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("etag:{}", hex::encode(digest)))
}

/// A parsed `If-Match` precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfMatch {
    ETag(String),
    Generation(u64),
}

impl IfMatch {
    /// Parse an `If-Match` header value.
    ///
    /// Accepted forms are `"etag:<hex>"` and `"generation:<n>"`, both
    /// quoted. Anything else is a bad request.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let token = raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| Error::bad_request(format!("invalid If-Match: {raw}")))?;

        if token.starts_with("etag:") {
            return Ok(Self::ETag(token.to_string()));
        }

        if let Some(gen) = token.strip_prefix("generation:") {
            let gen = gen
                .parse::<u64>()
                .map_err(|_| Error::bad_request(format!("invalid If-Match: {raw}")))?;
            return Ok(Self::Generation(gen));
        }

        Err(Error::bad_request(format!("invalid If-Match: {raw}")))
    }

    /// Evaluate the precondition against stored metadata.
    ///
    /// Mismatches are distinguishable so clients can tell which token failed.
    pub fn check(&self, meta: &Metadata) -> Result<(), Error> {
        match self {
            Self::ETag(want) if *want != meta.etag => Err(Error::precondition_failed(format!(
                "etag mismatch: {want} vs {}",
                meta.etag
            ))),
            Self::Generation(want) if *want != meta.generation => Err(
                Error::precondition_failed(format!(
                    "generation mismatch: {want} vs {}",
                    meta.generation
                )),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_etag_deterministic() {
        let f = fields(json!({"text": "foo", "num": 1}));
        let a = compute_etag("x", &f).unwrap();
        let b = compute_etag("x", &f).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("etag:"));
    }

    #[test]
    fn test_etag_changes_with_content() {
        let a = compute_etag("x", &fields(json!({"text": "foo"}))).unwrap();
        let b = compute_etag("x", &fields(json!({"text": "bar"}))).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_etag_ignores_generation() {
        // Equal content digests equally regardless of mutation history
        let f = fields(json!({"text": "foo"}));
        let a = compute_etag("x", &f).unwrap();
        let b = compute_etag("x", &f).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_etag_differs_across_ids() {
        let f = fields(json!({"text": "foo"}));
        assert_ne!(
            compute_etag("x", &f).unwrap(),
            compute_etag("y", &f).unwrap()
        );
    }

    #[test]
    fn test_etag_key_order_irrelevant() {
        // serde_json maps sort keys, so insertion order must not matter
        let mut a = Map::new();
        a.insert("b".to_string(), json!(2));
        a.insert("a".to_string(), json!(1));
        let mut b = Map::new();
        b.insert("a".to_string(), json!(1));
        b.insert("b".to_string(), json!(2));
        assert_eq!(
            compute_etag("x", &a).unwrap(),
            compute_etag("x", &b).unwrap()
        );
    }

    #[test]
    fn test_if_match_parse_etag() {
        let m = IfMatch::parse("\"etag:abc123\"").unwrap();
        assert_eq!(m, IfMatch::ETag("etag:abc123".to_string()));
    }

    #[test]
    fn test_if_match_parse_generation() {
        let m = IfMatch::parse("\"generation:42\"").unwrap();
        assert_eq!(m, IfMatch::Generation(42));
    }

    #[test]
    fn test_if_match_parse_unquoted() {
        assert!(IfMatch::parse("etag:abc123").is_err());
    }

    #[test]
    fn test_if_match_parse_garbage() {
        let err = IfMatch::parse("\"foobar\"").unwrap_err();
        assert!(err.to_string().contains("invalid If-Match"));
    }

    #[test]
    fn test_if_match_parse_bad_generation() {
        assert!(IfMatch::parse("\"generation:abc\"").is_err());
    }

    #[test]
    fn test_check_etag_mismatch() {
        let meta = Metadata {
            id: "x".into(),
            generation: 3,
            etag: "etag:real".into(),
        };
        let err = IfMatch::ETag("etag:doesnotmatch".into())
            .check(&meta)
            .unwrap_err();
        assert!(err.to_string().contains("etag mismatch"));

        let err = IfMatch::Generation(50).check(&meta).unwrap_err();
        assert!(err.to_string().contains("generation mismatch"));

        IfMatch::ETag("etag:real".into()).check(&meta).unwrap();
        IfMatch::Generation(3).check(&meta).unwrap();
    }
}
