use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    db::ReplayStore,
    domain::{JobStatus, ReplayAttempt, ReplayJob, MAX_ATTEMPTS, MIN_ATTEMPTS},
    errors::AppError,
    replay::{
        backoff::BackoffPolicy,
        clock::Clock,
        executor::{AttemptExecutor, AttemptOutcome},
        reconstruct::{reconstruct, OutboundRequest},
    },
};

/// Final state of one run, reported to callers instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: String,
    pub last_status_code: u16,
}

/// Executes replay jobs: one sequential attempt loop per run, at most one run
/// per job at a time, bounded number of runs overall.
#[derive(Clone)]
pub struct ReplayRunner {
    store: Arc<dyn ReplayStore>,
    executor: AttemptExecutor,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    permits: Arc<Semaphore>,
}

/// Holds a job id in the in-flight set until dropped.
struct RunGuard {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    job_id: Uuid,
}

impl RunGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<Uuid>>>, job_id: Uuid) -> Option<Self> {
        let mut running = in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        running.insert(job_id).then(|| Self {
            in_flight: Arc::clone(in_flight),
            job_id,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut running = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.job_id);
    }
}

impl ReplayRunner {
    pub fn new(
        store: Arc<dyn ReplayStore>,
        executor: AttemptExecutor,
        clock: Arc<dyn Clock>,
        backoff: BackoffPolicy,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            backoff,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    /// Runs the job from scratch, replacing any earlier attempt history.
    ///
    /// Destination failures are reported through the returned outcome. Errors
    /// are reserved for an unknown job, a run already in progress, and
    /// storage failures.
    pub async fn run(&self, job_id: Uuid) -> Result<RunOutcome, AppError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(AppError::NotFound("job_not_found"))?;
        let _guard =
            RunGuard::acquire(&self.in_flight, job_id).ok_or(AppError::Conflict("job_already_running"))?;
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("replay runner is shut down".to_owned()))?;

        match self.run_attempts(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "replay run aborted");
                if let Err(mark_err) = self
                    .store
                    .update_job_status(job_id, JobStatus::Failed, self.clock.now())
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %mark_err, "could not mark job failed");
                }
                Err(err)
            }
        }
    }

    async fn run_attempts(&self, job: &ReplayJob) -> Result<RunOutcome, AppError> {
        self.store.delete_attempts(job.id).await?;

        let Some(event) = self.store.get_event(job.event_id).await? else {
            tracing::warn!(job_id = %job.id, event_id = %job.event_id, "source event missing");
            self.store
                .update_job_status(job.id, JobStatus::Failed, self.clock.now())
                .await?;
            return Ok(RunOutcome {
                job_id: job.id,
                status: JobStatus::Failed,
                attempts: 0,
                last_error: "event_not_found".to_owned(),
                last_status_code: 0,
            });
        };

        let request = reconstruct(&event, &job.header_overrides, &job.json_overrides);
        let max_attempts = job.max_attempts.clamp(MIN_ATTEMPTS, MAX_ATTEMPTS);

        self.store
            .update_job_status(job.id, JobStatus::Running, self.clock.now())
            .await?;
        tracing::info!(
            job_id = %job.id,
            destination = %job.destination_url,
            method = %request.method,
            max_attempts,
            "replay run started"
        );

        let mut outcome = RunOutcome {
            job_id: job.id,
            status: JobStatus::Failed,
            attempts: 0,
            last_error: String::new(),
            last_status_code: 0,
        };

        for attempt_no in 1..=max_attempts {
            let started_at = self.clock.now();
            let result = self.executor.execute(&job.destination_url, &request).await;
            let finished_at = self.clock.now();

            tracing::info!(
                job_id = %job.id,
                attempt_no,
                status = result.status,
                success = result.success,
                error = %result.error_message,
                "replay attempt finished"
            );

            outcome.attempts = attempt_no;
            outcome.last_status_code = result.status;
            outcome.last_error = failure_reason(&result);

            let success = result.success;
            self.store
                .insert_attempt(attempt_record(job.id, attempt_no, started_at, finished_at, &request, result))
                .await?;

            if success {
                outcome.status = JobStatus::Succeeded;
                break;
            }
            if attempt_no < max_attempts {
                let delay = self.backoff.delay(job.base_delay_ms, attempt_no);
                if !delay.is_zero() {
                    self.clock.sleep(delay).await;
                }
            }
        }

        self.store
            .update_job_status(job.id, outcome.status, self.clock.now())
            .await?;
        tracing::info!(
            job_id = %job.id,
            status = outcome.status.as_str(),
            attempts = outcome.attempts,
            "replay run finished"
        );

        Ok(outcome)
    }
}

fn failure_reason(result: &AttemptOutcome) -> String {
    if result.success {
        String::new()
    } else if !result.error_message.is_empty() {
        result.error_message.clone()
    } else {
        format!("destination responded with status {}", result.status)
    }
}

fn attempt_record(
    job_id: Uuid,
    attempt_no: u32,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: chrono::DateTime<chrono::Utc>,
    request: &OutboundRequest,
    result: AttemptOutcome,
) -> ReplayAttempt {
    ReplayAttempt {
        id: Uuid::new_v4(),
        job_id,
        attempt_no,
        started_at,
        finished_at,
        request_headers: request.headers.clone(),
        request_body_text: request.body_text().to_owned(),
        response_status: result.status,
        response_snippet: result.snippet,
        error_message: result.error_message,
        success: result.success,
    }
}
