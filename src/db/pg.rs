use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{
    db::{ReplayStore, LIST_LIMIT},
    domain::{
        parse_header_overrides, parse_json_overrides, FieldMap, Inbox, JobStatus, NewEvent,
        NewReplayJob, ReplayAttempt, ReplayJob, StoredEvent, MAX_ATTEMPTS, MAX_BASE_DELAY_MS,
        MIN_ATTEMPTS,
    },
    errors::AppError,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| AppError::Internal(format!("migration failed: {err}")))
    }
}

/// Malformed stored JSON reads back as an empty map.
fn field_map(raw: Value) -> FieldMap {
    serde_json::from_value(raw).unwrap_or_default()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map(scrub_json)
        .map_err(|err| AppError::Internal(format!("serialize: {err}")))
}

/// Postgres `text` and `jsonb` reject U+0000; it is stored as U+FFFD.
fn scrub_text(text: String) -> String {
    if text.contains('\0') {
        text.replace('\0', "\u{FFFD}")
    } else {
        text
    }
}

fn scrub_json(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(scrub_text(text)),
        Value::Array(items) => Value::Array(items.into_iter().map(scrub_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (scrub_text(key), scrub_json(item)))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// `jsonb` does not keep key order, so documents are re-read from the raw
/// body when it still parses.
fn captured_json(body_text: &str, stored: Option<Value>) -> Option<Value> {
    let stored = stored?;
    serde_json::from_str::<Value>(body_text.trim())
        .ok()
        .or(Some(stored))
        .filter(|doc| doc.is_object() || doc.is_array())
}

#[derive(sqlx::FromRow)]
struct InboxRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<InboxRow> for Inbox {
    fn from(row: InboxRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    inbox_id: Uuid,
    received_at: DateTime<Utc>,
    method: String,
    path: String,
    query: Value,
    headers: Value,
    content_type: String,
    body_text: String,
    body_json: Option<Value>,
    truncated: bool,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            inbox_id: row.inbox_id,
            received_at: row.received_at,
            method: row.method,
            path: row.path,
            query: field_map(row.query),
            headers: field_map(row.headers),
            content_type: row.content_type,
            body_json: captured_json(&row.body_text, row.body_json),
            body_text: row.body_text,
            truncated: row.truncated,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    event_id: Uuid,
    destination_url: String,
    header_overrides: Value,
    json_overrides: Value,
    max_attempts: i32,
    base_delay_ms: i32,
    status: JobStatus,
    created_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for ReplayJob {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            destination_url: row.destination_url,
            header_overrides: parse_header_overrides(&row.header_overrides),
            json_overrides: parse_json_overrides(&row.json_overrides),
            max_attempts: u32::try_from(row.max_attempts)
                .unwrap_or(MIN_ATTEMPTS)
                .clamp(MIN_ATTEMPTS, MAX_ATTEMPTS),
            base_delay_ms: u32::try_from(row.base_delay_ms)
                .unwrap_or(0)
                .min(MAX_BASE_DELAY_MS),
            status: row.status,
            created_at: row.created_at,
            last_run_at: row.last_run_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    job_id: Uuid,
    attempt_no: i32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    request_headers: Value,
    request_body_text: String,
    response_status: i32,
    response_snippet: String,
    error_message: String,
    success: bool,
}

impl From<AttemptRow> for ReplayAttempt {
    fn from(row: AttemptRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            attempt_no: u32::try_from(row.attempt_no).unwrap_or(0),
            started_at: row.started_at,
            finished_at: row.finished_at,
            request_headers: field_map(row.request_headers),
            request_body_text: row.request_body_text,
            response_status: u16::try_from(row.response_status).unwrap_or(0),
            response_snippet: row.response_snippet,
            error_message: row.error_message,
            success: row.success,
        }
    }
}

const EVENT_COLUMNS: &str = "id, inbox_id, received_at, method, path, query, headers, content_type, body_text, body_json, truncated";
const JOB_COLUMNS: &str = "id, event_id, destination_url, header_overrides, json_overrides, max_attempts, base_delay_ms, status, created_at, last_run_at";
const ATTEMPT_COLUMNS: &str = "id, job_id, attempt_no, started_at, finished_at, request_headers, request_body_text, response_status, response_snippet, error_message, success";

#[async_trait]
impl ReplayStore for PgStore {
    async fn create_inbox(&self, name: String) -> Result<Inbox, AppError> {
        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            INSERT INTO inboxes (id, name)
            VALUES ($1, $2)
            RETURNING id, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scrub_text(name))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_inboxes(&self) -> Result<Vec<Inbox>, AppError> {
        let rows = sqlx::query_as::<_, InboxRow>(
            r#"
            SELECT id, name, created_at
            FROM inboxes
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(LIST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_inbox(&self, id: Uuid) -> Result<Option<Inbox>, AppError> {
        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            SELECT id, name, created_at
            FROM inboxes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_event(&self, event: NewEvent) -> Result<StoredEvent, AppError> {
        let query = to_json(&event.query)?;
        let headers = to_json(&event.headers)?;
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO events (id, inbox_id, method, path, query, headers, content_type, body_text, body_json, truncated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(event.inbox_id)
        .bind(scrub_text(event.method))
        .bind(scrub_text(event.path))
        .bind(query)
        .bind(headers)
        .bind(scrub_text(event.content_type))
        .bind(scrub_text(event.body_text))
        .bind(event.body_json.map(scrub_json))
        .bind(event.truncated)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_events(&self, inbox_id: Uuid) -> Result<Vec<StoredEvent>, AppError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE inbox_id = $1
            ORDER BY received_at DESC
            LIMIT $2
            "#
        ))
        .bind(inbox_id)
        .bind(LIST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<StoredEvent>, AppError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_job(&self, job: NewReplayJob) -> Result<ReplayJob, AppError> {
        let header_overrides = to_json(&job.header_overrides)?;
        let json_overrides = to_json(&job.json_overrides)?;
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO replay_jobs (id, event_id, destination_url, header_overrides, json_overrides, max_attempts, base_delay_ms, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(job.event_id)
        .bind(scrub_text(job.destination_url))
        .bind(header_overrides)
        .bind(json_overrides)
        .bind(job.max_attempts as i32)
        .bind(job.base_delay_ms as i32)
        .bind(JobStatus::Queued)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ReplayJob>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM replay_jobs
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs_for_event(&self, event_id: Uuid) -> Result<Vec<ReplayJob>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM replay_jobs
            WHERE event_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(event_id)
        .bind(LIST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE replay_jobs
            SET status = $2, last_run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(last_run_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("job_not_found"));
        }
        Ok(())
    }

    async fn delete_attempts(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM replay_attempts WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_attempt(&self, attempt: ReplayAttempt) -> Result<(), AppError> {
        let request_headers = to_json(&attempt.request_headers)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO replay_attempts ({ATTEMPT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        ))
        .bind(attempt.id)
        .bind(attempt.job_id)
        .bind(attempt.attempt_no as i32)
        .bind(attempt.started_at)
        .bind(attempt.finished_at)
        .bind(request_headers)
        .bind(scrub_text(attempt.request_body_text))
        .bind(i32::from(attempt.response_status))
        .bind(scrub_text(attempt.response_snippet))
        .bind(scrub_text(attempt.error_message))
        .bind(attempt.success)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<ReplayAttempt>, AppError> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS}
            FROM replay_attempts
            WHERE job_id = $1
            ORDER BY attempt_no ASC
            "#
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
