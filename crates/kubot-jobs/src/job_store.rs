//! Job store contract and in-memory backend.
//!
//! The store is the only owner of job records. Runners and the reaper mutate
//! records exclusively through this API; lookups and mutations against unknown
//! identifiers are reported as absent values or [`JobTransition::UnknownJob`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use kubot_core::utc_now;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::job_id::JobIdSequence;
use crate::job_types::{
    ExecJob, ExecTarget, ExecTargetError, JobCounts, JobOutcome, JobStatus, JobTransition,
};

/// Async store contract used by the runner, the reaper and query handlers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a pending job and returns its fresh identifier.
    async fn create(&self, user_id: i64, chat_id: i64, target: ExecTarget) -> String;

    async fn get(&self, job_id: &str) -> Option<ExecJob>;

    /// Moves a running job to its terminal state and stamps `end_time`.
    async fn update_status(&self, job_id: &str, outcome: JobOutcome) -> JobTransition;

    /// Moves a pending job to running and tracks the unit of work executing it.
    async fn mark_running(&self, job_id: &str, task: AbortHandle) -> JobTransition;

    /// Returns every job owned by `user_id`, in no particular order.
    async fn list_for_user(&self, user_id: i64) -> Vec<ExecJob>;

    /// Deletes terminal jobs whose `end_time` is at or before `now - max_age`.
    async fn reap_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String>;

    /// Returns the tracked unit of work for a job that has not finished yet.
    async fn active_task(&self, job_id: &str) -> Option<AbortHandle>;

    async fn counts(&self) -> JobCounts;

    async fn reap(&self, max_age: Duration) -> Vec<String> {
        self.reap_at(utc_now(), max_age).await
    }

    async fn create_job(
        &self,
        user_id: i64,
        chat_id: i64,
        pod_name: &str,
        namespace: &str,
        command: Vec<String>,
    ) -> Result<String, ExecTargetError> {
        let target = ExecTarget::new(pod_name, namespace, command)?;
        Ok(self.create(user_id, chat_id, target).await)
    }

    async fn get_user_jobs(&self, user_id: i64) -> Vec<ExecJob> {
        self.list_for_user(user_id).await
    }

    async fn update_job_status(&self, job_id: &str, outcome: JobOutcome) -> JobTransition {
        self.update_status(job_id, outcome).await
    }

    async fn start_job_task(&self, job_id: &str, task: AbortHandle) -> JobTransition {
        self.mark_running(job_id, task).await
    }

    async fn cleanup_old_jobs(&self, max_age_hours: u64) -> Vec<String> {
        self.reap(Duration::from_secs(max_age_hours.saturating_mul(3_600)))
            .await
    }
}

/// Process-local job table. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<StoreInner>,
    ids: JobIdSequence,
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<String, ExecJob>,
    active_tasks: HashMap<String, AbortHandle>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, user_id: i64, chat_id: i64, target: ExecTarget) -> String {
        let job_id = self.ids.next_id();
        let mut inner = self.inner.write().await;
        info!(
            job_id = %job_id,
            user_id,
            pod = target.pod_name(),
            namespace = target.namespace(),
            "created exec job"
        );
        let job = ExecJob::pending(job_id.clone(), user_id, chat_id, target, utc_now());
        inner.jobs.insert(job_id.clone(), job);
        job_id
    }

    async fn get(&self, job_id: &str) -> Option<ExecJob> {
        self.inner.read().await.jobs.get(job_id).cloned()
    }

    async fn update_status(&self, job_id: &str, outcome: JobOutcome) -> JobTransition {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(job_id) else {
            warn!(job_id, "status update for unknown job ignored");
            return JobTransition::UnknownJob;
        };

        let from = job.status;
        let to = outcome.status();
        if let Err(error) = from.ensure_transition(to) {
            warn!(job_id, %error, "status update rejected");
            return JobTransition::Rejected { from, to };
        }

        job.status = to;
        // A wall clock stepping backwards must not put the end before the start.
        job.end_time = Some(utc_now().max(job.start_time));
        match outcome {
            JobOutcome::Completed { output } => job.output = Some(output),
            JobOutcome::Failed { error } => job.error = Some(error),
        }
        inner.active_tasks.remove(job_id);
        JobTransition::Applied { from, to }
    }

    async fn mark_running(&self, job_id: &str, task: AbortHandle) -> JobTransition {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(job_id) else {
            warn!(job_id, "mark running for unknown job ignored");
            return JobTransition::UnknownJob;
        };

        let from = job.status;
        if let Err(error) = from.ensure_transition(JobStatus::Running) {
            warn!(job_id, %error, "mark running rejected");
            return JobTransition::Rejected {
                from,
                to: JobStatus::Running,
            };
        }

        job.status = JobStatus::Running;
        inner.active_tasks.insert(job_id.to_string(), task);
        debug!(job_id, "exec job marked running");
        JobTransition::Applied {
            from,
            to: JobStatus::Running,
        }
    }

    async fn list_for_user(&self, user_id: i64) -> Vec<ExecJob> {
        self.inner
            .read()
            .await
            .jobs
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect()
    }

    async fn reap_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = now.checked_sub_signed(max_age) else {
            return Vec::new();
        };

        // Single write guard with no await point: a cancelled sweep either
        // never started or removed its whole batch.
        let mut inner = self.inner.write().await;
        let expired = inner
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal() && job.end_time.is_some_and(|end| end <= cutoff)
            })
            .map(|job| job.job_id.clone())
            .collect::<Vec<_>>();
        for job_id in &expired {
            inner.jobs.remove(job_id);
            inner.active_tasks.remove(job_id);
            info!(job_id = %job_id, "reaped expired job");
        }
        expired
    }

    async fn active_task(&self, job_id: &str) -> Option<AbortHandle> {
        self.inner.read().await.active_tasks.get(job_id).cloned()
    }

    async fn counts(&self) -> JobCounts {
        let inner = self.inner.read().await;
        let mut counts = JobCounts {
            active_tasks: inner.active_tasks.len(),
            ..JobCounts::default()
        };
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
