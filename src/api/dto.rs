use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    domain::{
        lenient_header_overrides, lenient_json_overrides, FieldMap, HeaderOverride, Inbox,
        JobStatus, JsonOverride, NewReplayJob, ReplayAttempt, ReplayJob, StoredEvent,
        DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS, MAX_BASE_DELAY_MS,
        MIN_ATTEMPTS,
    },
    errors::AppError,
    replay::{
        is_http_url,
        overrides::{HeaderDiff, JsonDiff},
    },
};

const BODY_PREVIEW_CHARS: usize = 180;

/// Parses a request body, falling back to defaults when it is missing or
/// malformed.
pub fn lenient_json<T: DeserializeOwned + Default>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

pub fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateInboxRequest {
    #[serde(default)]
    pub name: Option<String>,
}

impl CreateInboxRequest {
    pub fn name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("New Inbox")
            .to_owned()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub destination_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_header_overrides")]
    pub header_overrides: Vec<HeaderOverride>,
    #[serde(default, deserialize_with = "lenient_json_overrides")]
    pub json_overrides: Vec<JsonOverride>,
    #[serde(default, alias = "retryMax")]
    pub max_attempts: Option<Value>,
    #[serde(default)]
    pub base_delay_ms: Option<Value>,
}

/// Reads an integral setting; fractional numbers are floored.
fn bounded_setting(raw: Option<&Value>, default: u32, min: u32, max: u32) -> Option<u32> {
    let Some(raw) = raw.filter(|value| !value.is_null()) else {
        return Some(default);
    };
    let floored = raw.as_f64()?.floor();
    (floored >= f64::from(min) && floored <= f64::from(max)).then_some(floored as u32)
}

impl CreateJobRequest {
    pub fn validate(self) -> Result<NewReplayJob, AppError> {
        let event_id = self
            .event_id
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::bad_request("missing_event_id", "eventId is required"))?;
        let destination_url = self
            .destination_url
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                AppError::bad_request("missing_destination_url", "destinationUrl is required")
            })?;
        if !is_http_url(&destination_url) {
            return Err(AppError::bad_request(
                "invalid_destination_url",
                "destinationUrl must be an http or https URL",
            ));
        }
        let max_attempts = bounded_setting(
            self.max_attempts.as_ref(),
            DEFAULT_MAX_ATTEMPTS,
            MIN_ATTEMPTS,
            MAX_ATTEMPTS,
        )
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_max_attempts",
                format!("maxAttempts must be between {MIN_ATTEMPTS} and {MAX_ATTEMPTS}"),
            )
        })?;
        let base_delay_ms = bounded_setting(
            self.base_delay_ms.as_ref(),
            DEFAULT_BASE_DELAY_MS,
            0,
            MAX_BASE_DELAY_MS,
        )
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_base_delay_ms",
                format!("baseDelayMs must be between 0 and {MAX_BASE_DELAY_MS}"),
            )
        })?;
        let event_id = Uuid::parse_str(&event_id).map_err(|_| AppError::NotFound("event_not_found"))?;

        Ok(NewReplayJob {
            event_id,
            destination_url,
            header_overrides: self.header_overrides,
            json_overrides: self.json_overrides,
            max_attempts,
            base_delay_ms,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutatePreviewRequest {
    #[serde(default, deserialize_with = "lenient_header_overrides")]
    pub header_overrides: Vec<HeaderOverride>,
    #[serde(default, deserialize_with = "lenient_json_overrides")]
    pub json_overrides: Vec<JsonOverride>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub name: &'static str,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxView {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub webhook_url: String,
}

impl InboxView {
    pub fn new(inbox: Inbox, public_api_base: &str) -> Self {
        Self {
            webhook_url: format!("{public_api_base}/i/{}", inbox.id),
            id: inbox.id,
            name: inbox.name,
            created_at: inbox.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub inbox: InboxView,
}

#[derive(Debug, Serialize)]
pub struct InboxListResponse {
    pub inboxes: Vec<InboxView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub ok: bool,
    pub event_id: Uuid,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub method: String,
    pub content_type: String,
    pub body_preview: String,
}

impl From<StoredEvent> for EventSummary {
    fn from(event: StoredEvent) -> Self {
        let body_preview = event
            .body_text
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .take(BODY_PREVIEW_CHARS)
            .collect();
        Self {
            id: event.id,
            received_at: event.received_at,
            method: event.method,
            content_type: event.content_type,
            body_preview,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<EventSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyView {
    pub raw: String,
    pub json: Option<Value>,
    pub is_json: bool,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    pub id: Uuid,
    pub inbox_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub query: FieldMap,
    pub headers: FieldMap,
    pub content_type: String,
    pub body: BodyView,
}

impl From<StoredEvent> for EventDetail {
    fn from(event: StoredEvent) -> Self {
        Self {
            id: event.id,
            inbox_id: event.inbox_id,
            received_at: event.received_at,
            method: event.method,
            path: event.path,
            query: event.query,
            headers: event.headers,
            content_type: event.content_type,
            body: BodyView {
                raw: event.body_text,
                is_json: event.body_json.is_some(),
                json: event.body_json,
                truncated: event.truncated,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: EventDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeView {
    pub event_id: Uuid,
    pub inbox_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub headers: FieldMap,
    pub body: BodyView,
    pub curl: String,
}

#[derive(Debug, Serialize)]
pub struct SafeResponse {
    pub safe: SafeView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewBody {
    pub is_json: bool,
    pub json: Option<Value>,
    pub raw: String,
}

#[derive(Debug, Serialize)]
pub struct Preview {
    pub headers: FieldMap,
    pub body: PreviewBody,
}

#[derive(Debug, Serialize)]
pub struct PreviewDiff {
    pub headers: HeaderDiff,
    pub json: JsonDiff,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub preview: Preview,
    pub diff: PreviewDiff,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub event_id: Uuid,
    pub inbox_id: Option<Uuid>,
    pub destination_url: String,
    pub header_overrides: Vec<HeaderOverride>,
    pub json_overrides: Vec<JsonOverride>,
    pub max_attempts: u32,
    pub base_delay_ms: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl JobView {
    pub fn new(job: ReplayJob, inbox_id: Option<Uuid>) -> Self {
        Self {
            id: job.id,
            event_id: job.event_id,
            inbox_id,
            destination_url: job.destination_url,
            header_overrides: job.header_overrides,
            json_overrides: job.json_overrides,
            max_attempts: job.max_attempts,
            base_delay_ms: job.base_delay_ms,
            status: job.status,
            created_at: job.created_at,
            last_run_at: job.last_run_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: JobView,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub id: Uuid,
    pub attempt_no: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub response_status: u16,
    pub response_snippet: String,
    pub error_message: String,
    pub request_headers: FieldMap,
    pub request_body: String,
}

impl From<ReplayAttempt> for AttemptView {
    fn from(attempt: ReplayAttempt) -> Self {
        Self {
            id: attempt.id,
            attempt_no: attempt.attempt_no,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            ok: attempt.success,
            response_status: attempt.response_status,
            response_snippet: attempt.response_snippet,
            error_message: attempt.error_message,
            request_headers: attempt.request_headers,
            request_body: attempt.request_body_text,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    pub job: JobView,
    pub attempts: Vec<AttemptView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub ok: bool,
    pub status: JobStatus,
    pub last_error: String,
    pub last_status_code: u16,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(body: Value) -> CreateJobRequest {
        lenient_json(body.to_string().as_bytes())
    }

    fn code(result: Result<NewReplayJob, AppError>) -> &'static str {
        result.err().map(|err| err.code()).unwrap_or("ok")
    }

    #[test]
    fn validation_codes_follow_field_order() {
        let event_id = Uuid::new_v4().to_string();

        assert_eq!(code(request(json!({})).validate()), "missing_event_id");
        assert_eq!(
            code(request(json!({"eventId": event_id})).validate()),
            "missing_destination_url"
        );
        assert_eq!(
            code(request(json!({"eventId": event_id, "destinationUrl": "ftp://x"})).validate()),
            "invalid_destination_url"
        );
        assert_eq!(
            code(
                request(json!({"eventId": event_id, "destinationUrl": "http://x", "maxAttempts": 6}))
                    .validate()
            ),
            "invalid_max_attempts"
        );
        assert_eq!(
            code(
                request(json!({"eventId": event_id, "destinationUrl": "http://x", "maxAttempts": "3"}))
                    .validate()
            ),
            "invalid_max_attempts"
        );
        assert_eq!(
            code(
                request(json!({"eventId": event_id, "destinationUrl": "http://x", "baseDelayMs": 5001}))
                    .validate()
            ),
            "invalid_base_delay_ms"
        );
        assert_eq!(
            code(request(json!({"eventId": "evt_123", "destinationUrl": "http://x"})).validate()),
            "event_not_found"
        );
    }

    #[test]
    fn defaults_and_lenient_overrides() {
        let event_id = Uuid::new_v4();
        let job = request(json!({
            "eventId": event_id.to_string(),
            "destinationUrl": " https://dest.example/hook ",
            "headerOverrides": [{"action": "set", "name": "x-a", "value": true}, {"bogus": 1}],
            "jsonOverrides": "not a list",
            "retryMax": 4.7
        }))
        .validate()
        .unwrap();

        assert_eq!(job.event_id, event_id);
        assert_eq!(job.destination_url, "https://dest.example/hook");
        assert_eq!(
            job.header_overrides,
            vec![HeaderOverride::Set {
                name: "x-a".into(),
                value: "true".into()
            }]
        );
        assert!(job.json_overrides.is_empty());
        assert_eq!(job.max_attempts, 4);
        assert_eq!(job.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    #[test]
    fn malformed_body_reads_as_empty_request() {
        let request: CreateJobRequest = lenient_json(b"{not json");
        assert_eq!(code(request.validate()), "missing_event_id");

        let inbox: CreateInboxRequest = lenient_json(br#"{"name": "   "}"#);
        assert_eq!(inbox.name(), "New Inbox");
        let inbox: CreateInboxRequest = lenient_json(br#"{"name": " Stripe "}"#);
        assert_eq!(inbox.name(), "Stripe");
    }

    #[test]
    fn body_preview_flattens_newlines() {
        let event = StoredEvent {
            id: Uuid::new_v4(),
            inbox_id: Uuid::new_v4(),
            received_at: Utc::now(),
            method: "POST".into(),
            path: "/i/x".into(),
            query: FieldMap::new(),
            headers: FieldMap::new(),
            content_type: String::new(),
            body_text: format!("a\r\nb{}", "c".repeat(300)),
            body_json: None,
            truncated: false,
        };

        let summary = EventSummary::from(event);

        assert!(summary.body_preview.starts_with("a  bccc"));
        assert_eq!(summary.body_preview.chars().count(), BODY_PREVIEW_CHARS);
    }
}
