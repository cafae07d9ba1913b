use reqwest::Method;

use crate::{
    domain::{FieldMap, FieldValue, HeaderOverride, JsonOverride, StoredEvent},
    replay::overrides::{apply_header_overrides, apply_json_overrides},
};

/// Managed by the HTTP client, never forwarded from the capture.
const TRANSPORT_HEADERS: [&str; 3] = ["host", "content-length", "accept-encoding"];

/// The request shape sent for every attempt of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub headers: FieldMap,
    pub body: Option<String>,
}

impl OutboundRequest {
    /// Body text as recorded on an attempt; empty when nothing is sent.
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }
}

pub fn replay_method(captured: &str) -> Method {
    match captured.to_ascii_uppercase().as_str() {
        "GET" => Method::GET,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        _ => Method::POST,
    }
}

pub fn method_allows_body(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

pub fn reconstruct(
    event: &StoredEvent,
    header_overrides: &[HeaderOverride],
    json_overrides: &[JsonOverride],
) -> OutboundRequest {
    let method = replay_method(&event.method);

    let mut headers = apply_header_overrides(&event.headers, header_overrides);
    for name in TRANSPORT_HEADERS {
        headers.remove(name);
    }
    if !event.content_type.is_empty() && !headers.contains_key("content-type") {
        headers.insert(
            "content-type".to_owned(),
            FieldValue::One(event.content_type.clone()),
        );
    }

    let body_text = match &event.body_json {
        Some(doc) => apply_json_overrides(doc.clone(), json_overrides).to_string(),
        None => event.body_text.clone(),
    };
    let body = method_allows_body(&method).then_some(body_text);

    OutboundRequest {
        method,
        headers,
        body,
    }
}
