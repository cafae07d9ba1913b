use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const MIN_ATTEMPTS: u32 = 1;
pub const MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_BASE_DELAY_MS: u32 = 5_000;
pub const DEFAULT_BASE_DELAY_MS: u32 = 200;

/// A header or query parameter value. Repeated keys keep every value in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    pub fn push(&mut self, value: String) {
        match self {
            Self::One(first) => {
                let first = std::mem::take(first);
                *self = Self::Many(vec![first, value]);
            }
            Self::Many(values) => values.push(value),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(value) => vec![value.as_str()],
            Self::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.first().map(String::as_str),
        }
    }

    /// Flat string form used for diffing: single values as-is, lists as a
    /// JSON array.
    pub fn to_flat_string(&self) -> String {
        match self {
            Self::One(value) => value.clone(),
            Self::Many(values) => Value::from(values.clone()).to_string(),
        }
    }
}

/// Multi-valued map of lowercase header names (or query keys) to values.
pub type FieldMap = BTreeMap<String, FieldValue>;

pub fn insert_field(map: &mut FieldMap, key: String, value: String) {
    match map.get_mut(&key) {
        Some(existing) => existing.push(value),
        None => {
            map.insert(key, FieldValue::One(value));
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: Uuid,
    pub inbox_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub query: FieldMap,
    pub headers: FieldMap,
    pub content_type: String,
    pub body_text: String,
    pub body_json: Option<Value>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub inbox_id: Uuid,
    pub method: String,
    pub path: String,
    pub query: FieldMap,
    pub headers: FieldMap,
    pub content_type: String,
    pub body_text: String,
    pub body_json: Option<Value>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "replay_job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// One header directive. Names are matched after trimming and lowercasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HeaderOverride {
    Set { name: String, value: String },
    Remove { name: String },
}

impl HeaderOverride {
    pub fn name(&self) -> &str {
        match self {
            Self::Set { name, .. } | Self::Remove { name } => name,
        }
    }

    /// Reads one untyped directive. Entries without a string `name` or with
    /// an unknown `action` yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?.to_owned();
        let action = value.get("action")?.as_str()?.to_ascii_lowercase();
        match action.as_str() {
            "set" => Some(Self::Set {
                name,
                value: stringify_value(value.get("value").unwrap_or(&Value::Null)),
            }),
            "remove" => Some(Self::Remove { name }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonOverride {
    pub path: String,
    pub value: Value,
}

impl JsonOverride {
    pub fn from_value(value: &Value) -> Option<Self> {
        let path = value.get("path")?.as_str()?.to_owned();
        Some(Self {
            path,
            value: value.get("value").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Literal string form of a JSON value: strings unquoted, everything else
/// as serialized JSON (`null`, `true`, `5`, `{"a":1}`).
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn parse_header_overrides(raw: &Value) -> Vec<HeaderOverride> {
    raw.as_array()
        .map(|items| items.iter().filter_map(HeaderOverride::from_value).collect())
        .unwrap_or_default()
}

pub fn parse_json_overrides(raw: &Value) -> Vec<JsonOverride> {
    raw.as_array()
        .map(|items| items.iter().filter_map(JsonOverride::from_value).collect())
        .unwrap_or_default()
}

pub fn lenient_header_overrides<'de, D>(deserializer: D) -> Result<Vec<HeaderOverride>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?.unwrap_or(Value::Null);
    Ok(parse_header_overrides(&raw))
}

pub fn lenient_json_overrides<'de, D>(deserializer: D) -> Result<Vec<JsonOverride>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?.unwrap_or(Value::Null);
    Ok(parse_json_overrides(&raw))
}

#[derive(Debug, Clone)]
pub struct NewReplayJob {
    pub event_id: Uuid,
    pub destination_url: String,
    pub header_overrides: Vec<HeaderOverride>,
    pub json_overrides: Vec<JsonOverride>,
    pub max_attempts: u32,
    pub base_delay_ms: u32,
}

#[derive(Debug, Clone)]
pub struct ReplayJob {
    pub id: Uuid,
    pub event_id: Uuid,
    pub destination_url: String,
    pub header_overrides: Vec<HeaderOverride>,
    pub json_overrides: Vec<JsonOverride>,
    pub max_attempts: u32,
    pub base_delay_ms: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_no: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub request_headers: FieldMap,
    pub request_body_text: String,
    pub response_status: u16,
    pub response_snippet: String,
    pub error_message: String,
    pub success: bool,
}
