// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! List query grammar.
//!
//! ```text
//! filter[<path>][<op>]=<value>   predicate chain; all must hold
//! filter[<path>]=<value>         shorthand for op `eq`
//! sorts=±path,…                  stable multi-key ordering, `-` reverses
//! limit=N, offset=M              applied after filter+sort
//! _after=<id>                    cursor; skip items up to the keyed position
//! stream=full|diff               streaming mode (event-stream requests)
//! ```

use crate::error::Error;
use crate::path::Op;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub path: String,
    pub op: Op,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub path: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// Re-emit the entire visible page on every change.
    #[default]
    Full,
    /// Emit add/update/remove deltas against the previously emitted view.
    Diff,
}

#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    pub filters: Vec<Filter>,
    pub sorts: Vec<Sort>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub after: Option<String>,
    pub stream: StreamMode,
}

impl ListOpts {
    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(raw: Option<&str>) -> Result<Self, Error> {
        let mut opts = Self::default();
        let Some(raw) = raw else {
            return Ok(opts);
        };

        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (decode(k)?, decode(v)?),
                None => (decode(pair)?, String::new()),
            };

            if let Some(rest) = key.strip_prefix("filter[") {
                opts.filters.push(parse_filter(rest, value)?);
                continue;
            }

            match key.as_str() {
                "sorts" => {
                    for part in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        let (path, descending) = match part.strip_prefix('-') {
                            Some(p) => (p, true),
                            None => (part.strip_prefix('+').unwrap_or(part), false),
                        };
                        opts.sorts.push(Sort {
                            path: path.to_string(),
                            descending,
                        });
                    }
                }
                "limit" => {
                    opts.limit = Some(value.parse().map_err(|_| {
                        Error::bad_request(format!("parse limit failed: {value}"))
                    })?);
                }
                "offset" => {
                    opts.offset = value.parse().map_err(|_| {
                        Error::bad_request(format!("parse offset failed: {value}"))
                    })?;
                }
                "_after" => {
                    opts.after = Some(value);
                }
                "stream" => {
                    opts.stream = match value.as_str() {
                        "full" => StreamMode::Full,
                        "diff" => StreamMode::Diff,
                        other => {
                            return Err(Error::bad_request(format!(
                                "unknown stream mode: {other}"
                            )))
                        }
                    };
                }
                other => {
                    return Err(Error::bad_request(format!("unknown list parameter: {other}")));
                }
            }
        }

        Ok(opts)
    }
}

fn parse_filter(rest: &str, value: String) -> Result<Filter, Error> {
    // rest is "<path>]" or "<path>][<op>]"
    let (path, tail) = rest
        .split_once(']')
        .ok_or_else(|| Error::bad_request(format!("malformed filter parameter: {rest}")))?;
    if path.is_empty() {
        return Err(Error::bad_request("filter path must not be empty"));
    }

    let op = match tail {
        "" => Op::Eq,
        _ => {
            let op = tail
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| {
                    Error::bad_request(format!("malformed filter parameter: {rest}"))
                })?;
            Op::parse(op)?
        }
    };

    Ok(Filter {
        path: path.to_string(),
        op,
        value,
    })
}

fn decode(s: &str) -> Result<String, Error> {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .map_err(|e| Error::bad_request(format!("parse URL query failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query() {
        let opts = ListOpts::parse(None).unwrap();
        assert!(opts.filters.is_empty());
        assert!(opts.sorts.is_empty());
        assert_eq!(opts.limit, None);
        assert_eq!(opts.stream, StreamMode::Full);

        let opts = ListOpts::parse(Some("")).unwrap();
        assert!(opts.filters.is_empty());
    }

    #[test]
    fn test_filter_with_op() {
        let opts = ListOpts::parse(Some("filter[num][gte]=3")).unwrap();
        assert_eq!(
            opts.filters,
            vec![Filter {
                path: "num".into(),
                op: Op::Gte,
                value: "3".into()
            }]
        );
    }

    #[test]
    fn test_filter_default_op_is_eq() {
        let opts = ListOpts::parse(Some("filter[text]=foo")).unwrap();
        assert_eq!(opts.filters[0].op, Op::Eq);
        assert_eq!(opts.filters[0].value, "foo");
    }

    #[test]
    fn test_filter_nested_path_and_chain() {
        let opts =
            ListOpts::parse(Some("filter[a.b][hp]=pre&filter[num][lt]=10")).unwrap();
        assert_eq!(opts.filters.len(), 2);
        assert_eq!(opts.filters[0].path, "a.b");
        assert_eq!(opts.filters[0].op, Op::Hp);
        assert_eq!(opts.filters[1].op, Op::Lt);
    }

    #[test]
    fn test_filter_unknown_op() {
        assert!(ListOpts::parse(Some("filter[num][like]=3")).is_err());
    }

    #[test]
    fn test_filter_malformed() {
        assert!(ListOpts::parse(Some("filter[num=3")).is_err());
        assert!(ListOpts::parse(Some("filter[][eq]=3")).is_err());
    }

    #[test]
    fn test_sorts() {
        let opts = ListOpts::parse(Some("sorts=text,-num,%2Bother")).unwrap();
        assert_eq!(
            opts.sorts,
            vec![
                Sort {
                    path: "text".into(),
                    descending: false
                },
                Sort {
                    path: "num".into(),
                    descending: true
                },
                Sort {
                    path: "other".into(),
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn test_window_params() {
        let opts = ListOpts::parse(Some("limit=5&offset=10&_after=abc")).unwrap();
        assert_eq!(opts.limit, Some(5));
        assert_eq!(opts.offset, 10);
        assert_eq!(opts.after.as_deref(), Some("abc"));
    }

    #[test]
    fn test_bad_limit() {
        assert!(ListOpts::parse(Some("limit=abc")).is_err());
    }

    #[test]
    fn test_stream_modes() {
        assert_eq!(
            ListOpts::parse(Some("stream=diff")).unwrap().stream,
            StreamMode::Diff
        );
        assert_eq!(
            ListOpts::parse(Some("stream=full")).unwrap().stream,
            StreamMode::Full
        );
        assert!(ListOpts::parse(Some("stream=bogus")).is_err());
    }

    #[test]
    fn test_unknown_parameter() {
        assert!(ListOpts::parse(Some("bogus=1")).is_err());
    }

    #[test]
    fn test_percent_decoding() {
        let opts = ListOpts::parse(Some("filter[text]=hello%20world")).unwrap();
        assert_eq!(opts.filters[0].value, "hello world");

        let opts = ListOpts::parse(Some("filter[text]=a+b")).unwrap();
        assert_eq!(opts.filters[0].value, "a b");
    }
}
