//! Redacted, display-only rendering of a captured event.
//!
//! Nothing here feeds the replay path: replays always use the captured
//! values.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::{FieldMap, FieldValue};

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
];

const SENSITIVE_KEY_PARTS: [&str; 8] = [
    "token",
    "secret",
    "password",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "session",
];

/// Applied in order to every free-text value.
static TEXT_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            "[REDACTED_EMAIL]",
        ),
        (r"[A-Za-z0-9_-]{24,}", "[REDACTED_TOKEN]"),
        (r"Bearer [A-Za-z0-9._-]+", "Bearer [REDACTED_TOKEN]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("invalid redaction pattern"),
            replacement,
        )
    })
    .collect()
});

pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
}

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

pub fn redact_headers(headers: &FieldMap) -> FieldMap {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_header(name) {
                FieldValue::One(REDACTED.to_owned())
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

pub fn redact_text(text: &str) -> String {
    TEXT_PATTERNS
        .iter()
        .fold(text.to_owned(), |acc, (regex, replacement)| {
            regex.replace_all(&acc, *replacement).into_owned()
        })
}

pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text)),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        Value::Object(map) => {
            let redacted: Map<String, Value> = map
                .iter()
                .map(|(key, item)| {
                    let item = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_owned())
                    } else {
                        redact_json(item)
                    };
                    (key.clone(), item)
                })
                .collect();
            Value::Object(redacted)
        }
        scalar => scalar.clone(),
    }
}

/// Wraps `text` in single quotes for a POSIX shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r#"'"'"'"#))
}

pub fn build_curl(method: &str, url: &str, headers: &FieldMap, body: &str) -> String {
    let mut parts = vec!["curl".to_owned(), "-X".to_owned(), method.to_owned()];
    for (name, value) in headers {
        for item in value.values() {
            parts.push("-H".to_owned());
            parts.push(shell_quote(&format!("{name}: {item}")));
        }
    }
    if !body.is_empty() {
        parts.push("--data".to_owned());
        parts.push(shell_quote(body));
    }
    parts.push(shell_quote(url));
    parts.join(" ")
}
