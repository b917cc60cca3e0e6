// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `GET /_openapi`: OpenAPI 3.0.3 document generated from the registry.
//!
//! Schemas are derived from each type's serialized zero value; metadata
//! members are marked read-only since clients may never set them.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Map, Value};

use super::AppState;

pub async fn handle(State(state): State<AppState>) -> Json<Value> {
    let mut schemas = Map::new();
    let mut paths = Map::new();

    for rt in state.engine.registry().entries() {
        let name = rt.name();

        schemas.insert(format!("new.{name}"), type_schema(rt.zero_fields()));

        paths.insert(
            format!("/{name}"),
            json!({
                "get": {
                    "summary": format!("List {name} objects"),
                    "responses": {"200": {"description": format!("Array of {name} objects")}}
                },
                "post": {
                    "summary": format!("Create new {name} object"),
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {"$ref": format!("#/components/schemas/new.{name}")}
                            }
                        }
                    },
                    "responses": {"200": {"description": format!("Created {name} object")}}
                }
            }),
        );

        paths.insert(
            format!("/{name}/{{id}}"),
            json!({
                "parameters": [{
                    "name": "id",
                    "in": "path",
                    "required": true,
                    "schema": {"type": "string"}
                }],
                "get": {
                    "summary": format!("Get {name} object"),
                    "responses": {"200": {"description": format!("The {name} object")}}
                },
                "put": {
                    "summary": format!("Replace {name} object"),
                    "responses": {"200": {"description": format!("Replaced {name} object")}}
                },
                "patch": {
                    "summary": format!("Update {name} object"),
                    "responses": {"200": {"description": format!("Updated {name} object")}}
                },
                "delete": {
                    "summary": format!("Delete {name} object"),
                    "responses": {"200": {"description": "Deleted"}}
                }
            }),
        );
    }

    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "resource-engine",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "components": {
            "schemas": Value::Object(schemas),
            "requestBodies": {},
            "responses": {},
        },
        "paths": Value::Object(paths),
    }))
}

fn type_schema(zero: &Map<String, Value>) -> Value {
    let mut properties = Map::new();

    properties.insert(
        "id".to_string(),
        json!({"type": "string", "readOnly": true}),
    );
    properties.insert(
        "generation".to_string(),
        json!({"type": "integer", "format": "int64", "readOnly": true}),
    );
    properties.insert(
        "etag".to_string(),
        json!({"type": "string", "readOnly": true}),
    );

    for (name, value) in zero {
        properties.insert(name.clone(), field_schema(value));
    }

    json!({"type": "object", "properties": Value::Object(properties)})
}

fn field_schema(value: &Value) -> Value {
    match value {
        Value::Null => json!({"nullable": true}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) if n.is_f64() => json!({"type": "number", "format": "double"}),
        Value::Number(_) => json!({"type": "integer", "format": "int64"}),
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => {
            let item_schema = items.first().map(field_schema).unwrap_or(json!({}));
            json!({"type": "array", "items": item_schema})
        }
        Value::Object(map) => {
            let mut properties = Map::new();
            for (name, value) in map {
                properties.insert(name.clone(), field_schema(value));
            }
            json!({"type": "object", "properties": Value::Object(properties)})
        }
    }
}
