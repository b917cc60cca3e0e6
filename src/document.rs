//! Document data structure.
//!
//! The [`Document`] is the unit that flows through the engine: the
//! server-owned [`Metadata`] block plus the user's field map. On the wire
//! the two are flat:
//!
//! ```json
//! {"id": "…", "generation": 3, "etag": "etag:…", "text": "foo", "num": 1}
//! ```
//!
//! Deserialization pulls the metadata members out of the object; whatever a
//! client sent for them is separated here and discarded by the mutation
//! pipeline before merge or replace.

use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::metadata::{compute_etag, Metadata};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub meta: Metadata,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            meta: Metadata {
                id: id.into(),
                generation: 0,
                etag: String::new(),
            },
            fields,
        }
    }

    /// Recompute and store the etag from the current id and fields.
    pub fn refresh_etag(&mut self) -> Result<(), Error> {
        self.meta.etag = compute_etag(&self.meta.id, &self.fields)?;
        Ok(())
    }

    /// Split a parsed JSON body into its field map, discarding any
    /// client-supplied metadata members.
    pub fn strip_metadata(body: Value) -> Result<Map<String, Value>, Error> {
        let mut map = match body {
            Value::Object(m) => m,
            other => {
                return Err(Error::bad_request(format!(
                    "request body must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        for key in crate::metadata::METADATA_FIELDS {
            map.remove(key);
        }

        Ok(map)
    }

    /// The flat wire representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.meta.id.clone()));
        out.insert("generation".to_string(), Value::from(self.meta.generation));
        out.insert("etag".to_string(), Value::String(self.meta.etag.clone()));
        for (k, v) in &self.fields {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3 + self.fields.len()))?;
        map.serialize_entry("id", &self.meta.id)?;
        map.serialize_entry("generation", &self.meta.generation)?;
        map.serialize_entry("etag", &self.meta.etag)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::deserialize(deserializer)?;

        let id = match map.remove("id") {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "id must be a string, got {}",
                    json_kind(&other)
                )))
            }
            None => String::new(),
        };

        let generation = match map.remove("generation") {
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| D::Error::custom("generation must be a non-negative integer"))?,
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "generation must be a number, got {}",
                    json_kind(&other)
                )))
            }
            None => 0,
        };

        let etag = match map.remove("etag") {
            Some(Value::String(s)) => s,
            Some(_) | None => String::new(),
        };

        Ok(Self {
            meta: Metadata {
                id,
                generation,
                etag,
            },
            fields: map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_round_trip() {
        let mut doc = Document::new(
            "abc",
            Document::strip_metadata(json!({"text": "foo", "num": 1})).unwrap(),
        );
        doc.meta.generation = 2;
        doc.refresh_etag().unwrap();

        let wire = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&wire).unwrap();

        assert_eq!(back, doc);
        assert_eq!(back.meta.id, "abc");
        assert_eq!(back.meta.generation, 2);
        assert_eq!(back.fields["text"], json!("foo"));
    }

    #[test]
    fn test_wire_shape_is_flat() {
        let doc = Document::new("abc", Map::new());
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["id"], json!("abc"));
        assert_eq!(v["generation"], json!(0));
        assert!(v.get("meta").is_none());
        assert!(v.get("fields").is_none());
    }

    #[test]
    fn test_strip_metadata_removes_server_fields() {
        let fields = Document::strip_metadata(json!({
            "id": "spoofed",
            "generation": 99,
            "etag": "etag:spoofed",
            "text": "foo",
        }))
        .unwrap();

        assert!(fields.get("id").is_none());
        assert!(fields.get("generation").is_none());
        assert!(fields.get("etag").is_none());
        assert_eq!(fields["text"], json!("foo"));
    }

    #[test]
    fn test_strip_metadata_rejects_non_object() {
        let err = Document::strip_metadata(json!([1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_deserialize_without_metadata() {
        let doc: Document = serde_json::from_value(json!({"text": "foo"})).unwrap();
        assert_eq!(doc.meta.id, "");
        assert_eq!(doc.meta.generation, 0);
        assert_eq!(doc.fields["text"], json!("foo"));
    }

    #[test]
    fn test_deserialize_rejects_bad_generation() {
        let res: Result<Document, _> = serde_json::from_value(json!({"generation": "three"}));
        assert!(res.is_err());
    }

    #[test]
    fn test_to_value_matches_serialize() {
        let mut doc = Document::new(
            "abc",
            Document::strip_metadata(json!({"num": 4})).unwrap(),
        );
        doc.refresh_etag().unwrap();
        assert_eq!(doc.to_value(), serde_json::to_value(&doc).unwrap());
    }
}
