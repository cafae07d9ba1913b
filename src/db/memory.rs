use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    db::{ReplayStore, LIST_LIMIT},
    domain::{Inbox, JobStatus, NewEvent, NewReplayJob, ReplayAttempt, ReplayJob, StoredEvent},
    errors::AppError,
};

#[derive(Default)]
struct MemoryState {
    inboxes: Vec<Inbox>,
    events: Vec<StoredEvent>,
    jobs: Vec<ReplayJob>,
    attempts: Vec<ReplayAttempt>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[cfg(test)]
impl MemoryStore {
    /// Removes an event, leaving jobs that reference it in place.
    pub async fn delete_event(&self, id: Uuid) {
        self.state.write().await.events.retain(|event| event.id != id);
    }
}

fn newest_first<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
    items.truncate(LIST_LIMIT);
    items
}

#[async_trait]
impl ReplayStore for MemoryStore {
    async fn create_inbox(&self, name: String) -> Result<Inbox, AppError> {
        let inbox = Inbox {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
        };
        self.state.write().await.inboxes.push(inbox.clone());
        Ok(inbox)
    }

    async fn list_inboxes(&self) -> Result<Vec<Inbox>, AppError> {
        let inboxes = self.state.read().await.inboxes.clone();
        Ok(newest_first(inboxes, |inbox| inbox.created_at))
    }

    async fn get_inbox(&self, id: Uuid) -> Result<Option<Inbox>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .inboxes
            .iter()
            .find(|inbox| inbox.id == id)
            .cloned())
    }

    async fn insert_event(&self, event: NewEvent) -> Result<StoredEvent, AppError> {
        let stored = StoredEvent {
            id: Uuid::new_v4(),
            inbox_id: event.inbox_id,
            received_at: Utc::now(),
            method: event.method,
            path: event.path,
            query: event.query,
            headers: event.headers,
            content_type: event.content_type,
            body_text: event.body_text,
            body_json: event.body_json,
            truncated: event.truncated,
        };
        self.state.write().await.events.push(stored.clone());
        Ok(stored)
    }

    async fn list_events(&self, inbox_id: Uuid) -> Result<Vec<StoredEvent>, AppError> {
        let events = self
            .state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.inbox_id == inbox_id)
            .cloned()
            .collect();
        Ok(newest_first(events, |event| event.received_at))
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<StoredEvent>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .events
            .iter()
            .find(|event| event.id == id)
            .cloned())
    }

    async fn insert_job(&self, job: NewReplayJob) -> Result<ReplayJob, AppError> {
        let stored = ReplayJob {
            id: Uuid::new_v4(),
            event_id: job.event_id,
            destination_url: job.destination_url,
            header_overrides: job.header_overrides,
            json_overrides: job.json_overrides,
            max_attempts: job.max_attempts,
            base_delay_ms: job.base_delay_ms,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            last_run_at: None,
        };
        self.state.write().await.jobs.push(stored.clone());
        Ok(stored)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ReplayJob>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned())
    }

    async fn list_jobs_for_event(&self, event_id: Uuid) -> Result<Vec<ReplayJob>, AppError> {
        let jobs = self
            .state
            .read()
            .await
            .jobs
            .iter()
            .filter(|job| job.event_id == event_id)
            .cloned()
            .collect();
        Ok(newest_first(jobs, |job| job.created_at))
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(AppError::NotFound("job_not_found"))?;
        job.status = status;
        job.last_run_at = Some(last_run_at);
        Ok(())
    }

    async fn delete_attempts(&self, job_id: Uuid) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .attempts
            .retain(|attempt| attempt.job_id != job_id);
        Ok(())
    }

    async fn insert_attempt(&self, attempt: ReplayAttempt) -> Result<(), AppError> {
        self.state.write().await.attempts.push(attempt);
        Ok(())
    }

    async fn list_attempts(&self, job_id: Uuid) -> Result<Vec<ReplayAttempt>, AppError> {
        let mut attempts: Vec<ReplayAttempt> = self
            .state
            .read()
            .await
            .attempts
            .iter()
            .filter(|attempt| attempt.job_id == job_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|attempt| attempt.attempt_no);
        Ok(attempts)
    }
}
