//! Interpretation of external tool output.
//!
//! Contract-call tools print JSON when asked to, sometimes preceded by
//! progress lines. Decoding goes through small result types first and falls
//! back to token search on raw text only when no JSON document is present.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// First `n` non-empty lines of `text`, joined with `" | "`.
pub fn first_lines(text: &str, n: usize) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(n)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Extract the first JSON object embedded in `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    trimmed.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&trimmed[start..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .filter(Value::is_object)
    })
}

/// Result of an instantiate call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstantiateOutput {
    #[serde(alias = "address", alias = "contract_address")]
    pub contract: String,
}

/// Result of a contract message call (dry-run or executed).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallOutput {
    #[serde(default)]
    pub reverted: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

fn decode_call(stdout: &str) -> Option<CallOutput> {
    extract_json(stdout).and_then(|value| serde_json::from_value::<CallOutput>(value).ok())
}

static CONTRACT_LINE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Contract\s+([0-9A-Za-z]{20,})\s*$").ok());

/// Address of a freshly instantiated contract, if the output carries one.
pub fn instantiated_address(stdout: &str) -> Option<String> {
    if let Some(value) = extract_json(stdout) {
        return serde_json::from_value::<InstantiateOutput>(value)
            .ok()
            .map(|out| out.contract)
            .filter(|addr| !addr.trim().is_empty());
    }
    CONTRACT_LINE_RE
        .as_ref()?
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Text of the value returned by a call: the decoded `data` field when
/// available, otherwise the raw output.
pub fn returned_value(stdout: &str) -> String {
    match decode_call(stdout).and_then(|out| out.data) {
        Some(data) => data.to_string(),
        None => stdout.trim().to_string(),
    }
}

/// Whether the value returned by a call contains `token`.
pub fn returns_token(stdout: &str, token: &str) -> bool {
    returned_value(stdout).contains(token)
}

/// Status markers accepted for an executed call.
pub const CALL_SUCCESS_MARKERS: [&str; 2] = ["Ok", "success"];

/// Whether an executed call reported success.
///
/// Decoded output is judged by the top-level variant of `data` (or a `status`
/// field); a decoded `reverted: true` is always a failure. Unstructured output
/// passes when either marker appears anywhere.
pub fn call_succeeded(stdout: &str) -> bool {
    let Some(out) = decode_call(stdout) else {
        return CALL_SUCCESS_MARKERS
            .iter()
            .any(|marker| stdout.contains(marker));
    };
    if out.reverted == Some(true) {
        return false;
    }
    out.data
        .as_ref()
        .and_then(top_level_ident)
        .or(out.status.as_deref())
        .is_some_and(|ident| CALL_SUCCESS_MARKERS.iter().any(|marker| *marker == ident))
}

/// Variant name of an encoded value: `{"Ok": ..}`, `{"Tuple": {"ident": "Ok"}}`,
/// `{"ident": "Ok"}` or a bare string.
fn top_level_ident(data: &Value) -> Option<&str> {
    match data {
        Value::String(ident) => Some(ident.as_str()),
        Value::Object(map) => {
            if let Some(ident) = map.get("ident").and_then(Value::as_str) {
                return Some(ident);
            }
            if map.len() != 1 {
                return None;
            }
            let (key, inner) = map.iter().next()?;
            inner
                .get("ident")
                .and_then(Value::as_str)
                .or(Some(key.as_str()))
        }
        _ => None,
    }
}

/// Whether any of `patterns` matches `text`.
pub fn matches_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}
