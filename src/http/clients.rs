// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `GET /_goclient` and `GET /_tsclient`: generated client source.
//!
//! Both generators walk the registry's field layouts and emit a small,
//! dependency-free client as `text/plain`. They exist so a consumer can
//! bootstrap against a running server without sharing crate code.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::header;
use serde_json::{Map, Value};

use super::AppState;

pub async fn go_client(State(state): State<AppState>) -> Response {
    plain(generate_go(&state))
}

pub async fn ts_client(State(state): State<AppState>) -> Response {
    plain(generate_ts(&state))
}

fn plain(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// `some_field` / `some-field` → `SomeField`
fn go_name(s: &str) -> String {
    s.split(|c| c == '_' || c == '-')
        .map(upper_first)
        .collect()
}

/// `some_field` → `someField`
fn camel(s: &str) -> String {
    let pascal = go_name(s);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn go_type(value: &Value) -> String {
    match value {
        Value::Null => "any".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) if n.is_f64() => "float64".to_string(),
        Value::Number(_) => "int64".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => match items.first() {
            Some(item) => format!("[]{}", go_type(item)),
            None => "[]any".to_string(),
        },
        Value::Object(_) => "map[string]any".to_string(),
    }
}

fn ts_type(value: &Value) -> String {
    match value {
        Value::Null => "any".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => match items.first() {
            Some(item) => format!("{}[]", ts_type(item)),
            None => "any[]".to_string(),
        },
        Value::Object(_) => "Record<string, any>".to_string(),
    }
}

fn generate_go(state: &AppState) -> String {
    let mut out = String::new();
    out.push_str("// Code generated by resource-engine. DO NOT EDIT.\n\n");
    out.push_str("package client\n\n");
    out.push_str("import (\n\t\"bytes\"\n\t\"encoding/json\"\n\t\"fmt\"\n\t\"io\"\n\t\"net/http\"\n)\n\n");

    out.push_str("type Metadata struct {\n");
    out.push_str("\tID         string `json:\"id\"`\n");
    out.push_str("\tGeneration int64  `json:\"generation\"`\n");
    out.push_str("\tETag       string `json:\"etag\"`\n");
    out.push_str("}\n\n");

    for rt in state.engine.registry().entries() {
        let type_name = go_name(rt.name());
        out.push_str(&format!("type {type_name} struct {{\n"));
        out.push_str("\tMetadata\n");
        for (field, value) in field_list(rt.zero_fields()) {
            out.push_str(&format!(
                "\t{} {} `json:\"{field}\"`\n",
                go_name(&field),
                go_type(&value),
            ));
        }
        out.push_str("}\n\n");
    }

    out.push_str("type Client struct {\n\tBaseURL string\n\tHTTP    *http.Client\n}\n\n");
    out.push_str("func NewClient(baseURL string) *Client {\n");
    out.push_str("\treturn &Client{BaseURL: baseURL, HTTP: http.DefaultClient}\n}\n\n");

    out.push_str(
        r#"func (c *Client) do(method, path string, in, out any) error {
	var body io.Reader
	if in != nil {
		js, err := json.Marshal(in)
		if err != nil {
			return err
		}
		body = bytes.NewReader(js)
	}

	req, err := http.NewRequest(method, c.BaseURL+path, body)
	if err != nil {
		return err
	}
	req.Header.Set("Content-Type", "application/json")

	resp, err := c.HTTP.Do(req)
	if err != nil {
		return err
	}
	defer resp.Body.Close()

	if resp.StatusCode != http.StatusOK {
		msg, _ := io.ReadAll(resp.Body)
		return fmt.Errorf("%s %s: %d: %s", method, path, resp.StatusCode, msg)
	}

	if out == nil {
		return nil
	}
	return json.NewDecoder(resp.Body).Decode(out)
}

"#,
    );

    for rt in state.engine.registry().entries() {
        let api_name = rt.name();
        let type_name = go_name(api_name);

        out.push_str(&format!(
            r#"func (c *Client) Create{type_name}(obj *{type_name}) (*{type_name}, error) {{
	out := &{type_name}{{}}
	return out, c.do("POST", "/{api_name}", obj, out)
}}

func (c *Client) Get{type_name}(id string) (*{type_name}, error) {{
	out := &{type_name}{{}}
	return out, c.do("GET", "/{api_name}/"+id, nil, out)
}}

func (c *Client) List{type_name}(query string) ([]*{type_name}, error) {{
	out := []*{type_name}{{}}
	return out, c.do("GET", "/{api_name}"+query, nil, &out)
}}

func (c *Client) Update{type_name}(id string, delta map[string]any) (*{type_name}, error) {{
	out := &{type_name}{{}}
	return out, c.do("PATCH", "/{api_name}/"+id, delta, out)
}}

func (c *Client) Replace{type_name}(id string, obj *{type_name}) (*{type_name}, error) {{
	out := &{type_name}{{}}
	return out, c.do("PUT", "/{api_name}/"+id, obj, out)
}}

func (c *Client) Delete{type_name}(id string) error {{
	return c.do("DELETE", "/{api_name}/"+id, nil, nil)
}}

"#,
        ));
    }

    out
}

fn generate_ts(state: &AppState) -> String {
    let mut out = String::new();
    out.push_str("// Generated by resource-engine. Do not edit.\n\n");

    out.push_str("export interface Metadata {\n  id: string;\n  generation: number;\n  etag: string;\n}\n\n");

    for rt in state.engine.registry().entries() {
        let type_name = go_name(rt.name());
        out.push_str(&format!("export interface {type_name} extends Metadata {{\n"));
        for (field, value) in field_list(rt.zero_fields()) {
            out.push_str(&format!("  {}: {};\n", camel(&field), ts_type(&value)));
        }
        out.push_str("}\n\n");
    }

    out.push_str(
        r#"export class Client {
  constructor(private baseUrl: string) {}

  private async do<T>(method: string, path: string, body?: unknown): Promise<T> {
    const resp = await fetch(this.baseUrl + path, {
      method,
      headers: { "Content-Type": "application/json" },
      body: body === undefined ? undefined : JSON.stringify(body),
    });
    if (!resp.ok) {
      throw new Error(`${method} ${path}: ${resp.status}: ${await resp.text()}`);
    }
    const text = await resp.text();
    return (text ? JSON.parse(text) : undefined) as T;
  }

"#,
    );

    for rt in state.engine.registry().entries() {
        let api_name = rt.name();
        let type_name = go_name(api_name);
        let method_name = upper_first(&camel(api_name));

        out.push_str(&format!(
            r#"  create{method_name}(obj: Partial<{type_name}>): Promise<{type_name}> {{
    return this.do("POST", "/{api_name}", obj);
  }}

  get{method_name}(id: string): Promise<{type_name}> {{
    return this.do("GET", `/{api_name}/${{id}}`);
  }}

  list{method_name}(query = ""): Promise<{type_name}[]> {{
    return this.do("GET", "/{api_name}" + query);
  }}

  update{method_name}(id: string, delta: Partial<{type_name}>): Promise<{type_name}> {{
    return this.do("PATCH", `/{api_name}/${{id}}`, delta);
  }}

  replace{method_name}(id: string, obj: Partial<{type_name}>): Promise<{type_name}> {{
    return this.do("PUT", `/{api_name}/${{id}}`, obj);
  }}

  delete{method_name}(id: string): Promise<void> {{
    return this.do("DELETE", `/{api_name}/${{id}}`);
  }}

"#,
        ));
    }

    out.push_str("}\n");
    out
}

fn field_list(zero: &Map<String, Value>) -> Vec<(String, Value)> {
    zero.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
