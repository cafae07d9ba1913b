//! Turns an inbound webhook request into a [`NewEvent`].

use axum::http::{HeaderMap, Method, Uri};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{insert_field, FieldMap, NewEvent};

/// Captured body text is cut at this many characters.
pub const MAX_BODY_CHARS: usize = 200_000;

pub fn headers_to_fields(headers: &HeaderMap) -> FieldMap {
    let mut fields = FieldMap::new();
    for (name, value) in headers {
        insert_field(
            &mut fields,
            name.as_str().to_ascii_lowercase(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    fields
}

pub fn query_to_fields(query: Option<&str>) -> FieldMap {
    let mut fields = FieldMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            insert_field(&mut fields, key.into_owned(), value.into_owned());
        }
    }
    fields
}

/// Returns the (possibly cut) body text and whether it was cut.
pub fn cap_body(text: String) -> (String, bool) {
    match text.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => (text[..cut].to_owned(), true),
        None => (text, false),
    }
}

/// Parses the body as JSON only when it is an object or array.
pub fn detect_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub fn capture_event(
    inbox_id: Uuid,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> NewEvent {
    let header_fields = headers_to_fields(headers);
    let content_type = header_fields
        .get("content-type")
        .and_then(|value| value.first())
        .unwrap_or_default()
        .to_owned();

    let path = match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{query}", uri.path()),
        _ => uri.path().to_owned(),
    };

    let (body_text, truncated) = cap_body(String::from_utf8_lossy(body).into_owned());
    let body_json = detect_json(&body_text);

    NewEvent {
        inbox_id,
        method: method.as_str().to_owned(),
        path,
        query: query_to_fields(uri.query()),
        headers: header_fields,
        content_type,
        body_text,
        body_json,
        truncated,
    }
}
