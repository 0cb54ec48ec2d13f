//! Detached execution of exec jobs.
//!
//! [`JobRunner::submit`] returns as soon as the job exists in the store. The
//! dispatch runs on its own Tokio task, and its outcome is written back to the
//! store and delivered through the [`JobNotifier`]. Nothing on the execution
//! path propagates back to the caller that created the job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use kubot_core::{format_duration_seconds, render_command, truncate_head};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::job_store::JobStore;
use crate::job_types::{ExecJob, ExecTarget, JobOutcome, JobTransition};

const DEFAULT_JOB_OUTPUT_MAX_CHARS: usize = 3_500;
const DEFAULT_JOB_OUTPUT_TRUNCATION_MARKER: &str = "\n\n... (output truncated)";
const DEFAULT_MAX_JOB_DURATION: Duration = Duration::from_secs(30 * 60);

/// Failures reported by an execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("pod '{pod}' not found in namespace '{namespace}'")]
    PodNotFound { pod: String, namespace: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to start execution backend: {0}")]
    Spawn(String),
    #[error("execution failed: {0}")]
    Backend(String),
}

/// Runs a command inside a pod and returns its captured output.
#[async_trait]
pub trait ExecDispatcher: Send + Sync {
    async fn execute(&self, target: &ExecTarget) -> Result<String, DispatchError>;
}

/// Best-effort delivery of a text message to a chat destination.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    async fn send(&self, chat_id: i64, message: &str) -> Result<()>;
}

/// Runtime configuration for detached job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunnerConfig {
    /// Characters of output retained before the truncation marker is appended.
    pub output_max_chars: usize,
    pub output_truncation_marker: String,
    /// Watchdog for a dispatch that never returns. `None` disables it.
    pub max_job_duration: Option<Duration>,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            output_max_chars: DEFAULT_JOB_OUTPUT_MAX_CHARS,
            output_truncation_marker: DEFAULT_JOB_OUTPUT_TRUNCATION_MARKER.to_string(),
            max_job_duration: Some(DEFAULT_MAX_JOB_DURATION),
        }
    }
}

impl JobRunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_max_chars == 0 {
            bail!("output_max_chars must be greater than 0");
        }
        if self.max_job_duration.is_some_and(|limit| limit.is_zero()) {
            bail!("max_job_duration must be greater than 0 when set");
        }
        Ok(())
    }
}

/// Schedules jobs onto independent Tokio tasks and records their outcome.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn ExecDispatcher>,
    notifier: Arc<dyn JobNotifier>,
    config: JobRunnerConfig,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn ExecDispatcher>,
        notifier: Arc<dyn JobNotifier>,
        config: JobRunnerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            dispatcher,
            notifier,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Creates a job and schedules it. Returns before the dispatch starts.
    pub async fn submit(&self, user_id: i64, chat_id: i64, target: ExecTarget) -> String {
        let job_id = self.store.create(user_id, chat_id, target).await;
        self.start(&job_id).await;
        job_id
    }

    /// Spawns the unit of work for a pending job.
    ///
    /// The task waits on a gate until the store has recorded the job as running
    /// with its abort handle, so the terminal update can never overtake the
    /// `pending -> running` transition.
    pub async fn start(&self, job_id: &str) -> JobTransition {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let runner = self.clone();
        let task_job_id = job_id.to_string();
        let task = tokio::spawn(async move {
            if release_rx.await.is_err() {
                return;
            }
            runner.run_job(&task_job_id).await;
        });

        let transition = self.store.mark_running(job_id, task.abort_handle()).await;
        if transition.is_applied() {
            let _ = release_tx.send(());
        } else {
            warn!(job_id, ?transition, "job not started");
        }
        transition
    }

    async fn run_job(&self, job_id: &str) {
        let Some(job) = self.store.get(job_id).await else {
            warn!(job_id, "job vanished before dispatch");
            return;
        };

        let started_at = Instant::now();
        let dispatch = self.dispatcher.execute(&job.target);
        let result = match self.config.max_job_duration {
            Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(limit)),
            },
            None => dispatch.await,
        };
        let elapsed = started_at.elapsed();

        let message = match result {
            Ok(output) => {
                let output = truncate_head(
                    &output,
                    self.config.output_max_chars,
                    &self.config.output_truncation_marker,
                );
                self.store
                    .update_status(
                        job_id,
                        JobOutcome::Completed {
                            output: output.clone(),
                        },
                    )
                    .await;
                info!(
                    job_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "exec job completed"
                );
                render_job_completed_message(&job, elapsed, &output)
            }
            Err(dispatch_error) => {
                let error_text = dispatch_error.to_string();
                self.store
                    .update_status(
                        job_id,
                        JobOutcome::Failed {
                            error: error_text.clone(),
                        },
                    )
                    .await;
                warn!(
                    job_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error_text,
                    "exec job failed"
                );
                render_job_failed_message(&job, elapsed, &error_text)
            }
        };

        if let Err(send_error) = self.notifier.send(job.chat_id, &message).await {
            error!(
                job_id,
                chat_id = job.chat_id,
                error = %send_error,
                "job notification delivery failed"
            );
        }
    }
}

fn render_job_header(title: &str, job: &ExecJob, elapsed: Duration) -> String {
    format!(
        "{title}\n\nJob ID: {}\nPod: {}\nNamespace: {}\nCommand: {}\nDuration: {}",
        job.job_id,
        job.target.pod_name(),
        job.target.namespace(),
        render_command(job.target.command()),
        format_duration_seconds(elapsed.as_secs_f64(), 2),
    )
}

/// Notification text for a job that returned output.
pub fn render_job_completed_message(job: &ExecJob, elapsed: Duration, output: &str) -> String {
    format!(
        "{}\n\nOutput:\n{output}",
        render_job_header("Async exec completed", job, elapsed)
    )
}

/// Notification text for a job whose dispatch failed.
pub fn render_job_failed_message(job: &ExecJob, elapsed: Duration, error: &str) -> String {
    format!(
        "{}\n\nError: {error}",
        render_job_header("Async exec failed", job, elapsed)
    )
}
