//! Helpers for parsing structured output from model responses
//!
//! Models are asked to answer with fenced JSON. These helpers pull the
//! fenced body out of a response (tolerating missing fences and stray
//! prose) and deserialize it.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?P<lang>[A-Za-z0-9_+-]+)?(?:[ \t]*\n)?(?P<body>.*?)```")
        .expect("fence regex is valid")
});

/// Extract the JSON payload from a fenced model response.
///
/// Preference order: the first fence tagged `json` or untagged, then the
/// first fence of any tag, then the trimmed response itself.
pub fn extract_fenced_content(text: &str) -> String {
    let mut first_any: Option<&str> = None;
    for caps in FENCE_RE.captures_iter(text) {
        let body = caps.name("body").map(|m| m.as_str()).unwrap_or("");
        if first_any.is_none() {
            first_any = Some(body);
        }
        let lang = caps
            .name("lang")
            .map(|m| m.as_str().trim().to_ascii_lowercase());
        if matches!(lang.as_deref(), None | Some("json")) {
            return body.trim().to_string();
        }
    }
    match first_any {
        Some(body) => body.trim().to_string(),
        None => {
            tracing::debug!("no fenced block in model response, using raw text");
            text.trim().to_string()
        }
    }
}

/// Parse a model response into a typed value
pub fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let content = extract_fenced_content(text);
    if content.is_empty() {
        return Err(Error::extraction_parse("empty model response"));
    }
    serde_json::from_str(&content)
        .map_err(|e| Error::extraction_parse(format!("invalid JSON in model response: {e}")))
}

/// Parse a model response into a list of JSON objects.
///
/// A single top-level object is treated as a one-element list.
pub fn parse_json_items(text: &str) -> Result<Vec<serde_json::Map<String, Value>>> {
    let content = extract_fenced_content(text);
    if content.is_empty() {
        return Err(Error::extraction_parse("empty model response"));
    }

    let parsed: Value = serde_json::from_str(&content)
        .map_err(|e| Error::extraction_parse(format!("invalid JSON in model response: {e}")))?;

    match parsed {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(Error::extraction_parse(format!(
                    "expected an object in extraction list, got: {other}"
                ))),
            })
            .collect(),
        other => Err(Error::extraction_parse(format!(
            "expected a list or object, got: {other}"
        ))),
    }
}
