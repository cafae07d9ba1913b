use std::{error::Error as _, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::replay::reconstruct::OutboundRequest;

/// Characters of the response body kept on an attempt record.
pub const RESPONSE_SNIPPET_CHARS: usize = 400;

/// Upper bound on response bytes read per attempt; enough for the snippet
/// even when every character takes four bytes.
const RESPONSE_READ_LIMIT: usize = RESPONSE_SNIPPET_CHARS * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
        }
    }

    fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if err.is_body() {
            Self::Body
        } else {
            Self::Request
        }
    }
}

/// Result of a single outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    pub snippet: String,
    pub error_message: String,
    pub success: bool,
}

/// Performs exactly one outbound call per `execute`; retrying is the
/// runner's job.
#[derive(Clone)]
pub struct AttemptExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl AttemptExecutor {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn execute(&self, destination_url: &str, request: &OutboundRequest) -> AttemptOutcome {
        let mut builder = self
            .client
            .request(request.method.clone(), destination_url)
            .timeout(self.timeout)
            .headers(wire_headers(request));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(&err),
        };

        let status = response.status().as_u16();
        let head = read_head(response, RESPONSE_READ_LIMIT).await;
        AttemptOutcome {
            status,
            snippet: snippet(&String::from_utf8_lossy(&head), RESPONSE_SNIPPET_CHARS),
            error_message: String::new(),
            success: (200..=299).contains(&status),
        }
    }
}

/// Reads at most `limit` bytes of the body and drops the rest of the stream.
async fn read_head(mut response: reqwest::Response, limit: usize) -> Vec<u8> {
    let mut head = Vec::new();
    while head.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => head.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "response body read stopped");
                break;
            }
        }
    }
    head.truncate(limit);
    head
}

fn wire_headers(request: &OutboundRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "skipping header with invalid name");
            continue;
        };
        for item in value.values() {
            match HeaderValue::from_str(item) {
                Ok(header_value) => {
                    headers.append(header_name.clone(), header_value);
                }
                Err(_) => tracing::warn!(header = %name, "skipping header with invalid value"),
            }
        }
    }
    headers
}

fn transport_failure(err: &reqwest::Error) -> AttemptOutcome {
    let kind = TransportErrorKind::classify(err);
    AttemptOutcome {
        status: 0,
        snippet: String::new(),
        error_message: format!("{}: {}", kind.as_str(), error_chain(err)),
        success: false,
    }
}

/// Joins an error with its sources, skipping causes already contained in the
/// outer message.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_owned(),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        http::{HeaderMap as AxumHeaderMap, StatusCode},
        routing::any,
        Router,
    };
    use reqwest::Method;

    use crate::domain::{FieldMap, FieldValue};

    use super::*;

    fn executor(timeout: Duration) -> AttemptExecutor {
        AttemptExecutor::new(reqwest::Client::builder().no_proxy().build().unwrap(), timeout)
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    fn post(body: &str, headers: FieldMap) -> OutboundRequest {
        OutboundRequest {
            method: Method::POST,
            headers,
            body: Some(body.to_owned()),
        }
    }

    #[test]
    fn snippet_truncates_on_char_boundaries() {
        assert_eq!(snippet("abcdef", 3), "abc");
        assert_eq!(snippet("ab", 3), "ab");
        assert_eq!(snippet("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn success_captures_status_and_body() {
        let seen = Arc::new(Mutex::new(Vec::<(Option<String>, Vec<String>, String)>::new()));
        let seen_clone = Arc::clone(&seen);
        let url = serve(Router::new().route(
            "/hook",
            any(move |headers: AxumHeaderMap, body: String| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    let tags = headers
                        .get_all("x-tag")
                        .iter()
                        .map(|v| v.to_str().unwrap().to_owned())
                        .collect();
                    let content_type = headers
                        .get("content-type")
                        .map(|v| v.to_str().unwrap().to_owned());
                    seen.lock().unwrap().push((content_type, tags, body));
                    (StatusCode::CREATED, "accepted")
                }
            }),
        ))
        .await;

        let mut headers = FieldMap::new();
        headers.insert("content-type".into(), FieldValue::One("application/json".into()));
        headers.insert("x-tag".into(), FieldValue::Many(vec!["a".into(), "b".into()]));

        let outcome = executor(Duration::from_secs(5))
            .execute(&url, &post(r#"{"a":1}"#, headers))
            .await;

        assert_eq!(
            outcome,
            AttemptOutcome {
                status: 201,
                snippet: "accepted".into(),
                error_message: String::new(),
                success: true,
            }
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("application/json"));
        assert_eq!(seen[0].1, vec!["a", "b"]);
        assert_eq!(seen[0].2, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn non_2xx_is_not_success_and_snippet_is_bounded() {
        let long_body = "x".repeat(RESPONSE_SNIPPET_CHARS * 3);
        let url = serve(Router::new().route(
            "/hook",
            any(move || {
                let body = long_body.clone();
                async move { (StatusCode::SERVICE_UNAVAILABLE, body) }
            }),
        ))
        .await;

        let outcome = executor(Duration::from_secs(5))
            .execute(&url, &post("payload", FieldMap::new()))
            .await;

        assert_eq!(outcome.status, 503);
        assert!(!outcome.success);
        assert!(outcome.error_message.is_empty());
        assert_eq!(outcome.snippet.len(), RESPONSE_SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn endless_response_body_is_read_only_up_to_the_limit() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            let chunk = format!("400\r\n{}\r\n", "x".repeat(1024));
            while socket.write_all(chunk.as_bytes()).await.is_ok() {}
        });

        let started = std::time::Instant::now();
        let outcome = executor(Duration::from_secs(3))
            .execute(&format!("http://{addr}/hook"), &post("payload", FieldMap::new()))
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(outcome.status, 200);
        assert!(outcome.success);
        assert_eq!(outcome.snippet, "x".repeat(RESPONSE_SNIPPET_CHARS));
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = executor(Duration::from_secs(5))
            .execute(&format!("http://{addr}/hook"), &post("payload", FieldMap::new()))
            .await;

        assert_eq!(outcome.status, 0);
        assert!(!outcome.success);
        assert!(outcome.error_message.starts_with("connect: "), "{}", outcome.error_message);
    }

    #[tokio::test]
    async fn slow_destination_times_out() {
        let url = serve(Router::new().route(
            "/hook",
            any(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        ))
        .await;

        let outcome = executor(Duration::from_millis(100))
            .execute(&url, &post("payload", FieldMap::new()))
            .await;

        assert_eq!(outcome.status, 0);
        assert!(outcome.error_message.starts_with("timeout: "), "{}", outcome.error_message);
    }

    #[tokio::test]
    async fn invalid_header_values_are_skipped() {
        let url = serve(Router::new().route("/hook", any(|| async { StatusCode::NO_CONTENT }))).await;

        let mut headers = FieldMap::new();
        headers.insert("x-bad".into(), FieldValue::One("line\nbreak".into()));
        headers.insert("bad name".into(), FieldValue::One("v".into()));

        let outcome = executor(Duration::from_secs(5))
            .execute(&url, &post("", headers))
            .await;

        assert_eq!(outcome.status, 204);
        assert!(outcome.success);
    }
}
