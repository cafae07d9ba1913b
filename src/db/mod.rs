use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    domain::{Inbox, JobStatus, NewEvent, NewReplayJob, ReplayAttempt, ReplayJob, StoredEvent},
    errors::AppError,
};

pub mod memory;
pub mod pg;

/// Rows returned by list queries.
pub const LIST_LIMIT: usize = 50;

#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn create_inbox(&self, name: String) -> Result<Inbox, AppError>;
    async fn list_inboxes(&self) -> Result<Vec<Inbox>, AppError>;
    async fn get_inbox(&self, id: Uuid) -> Result<Option<Inbox>, AppError>;

    async fn insert_event(&self, event: NewEvent) -> Result<StoredEvent, AppError>;
    async fn list_events(&self, inbox_id: Uuid) -> Result<Vec<StoredEvent>, AppError>;
    async fn get_event(&self, id: Uuid) -> Result<Option<StoredEvent>, AppError>;

    async fn insert_job(&self, job: NewReplayJob) -> Result<ReplayJob, AppError>;
    async fn get_job(&self, id: Uuid) -> Result<Option<ReplayJob>, AppError>;
    async fn list_jobs_for_event(&self, event_id: Uuid) -> Result<Vec<ReplayJob>, AppError>;
    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn delete_attempts(&self, job_id: Uuid) -> Result<(), AppError>;
    async fn insert_attempt(&self, attempt: ReplayAttempt) -> Result<(), AppError>;
    /// Attempts of the job's latest run, ordered by attempt number.
    async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<ReplayAttempt>, AppError>;
}
