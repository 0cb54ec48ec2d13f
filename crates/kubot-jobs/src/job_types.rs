//! Job model shared by the store, runner and chat command layer.

use chrono::{DateTime, Utc};
use kubot_core::elapsed_seconds_between;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a job status transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job status transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Lifecycle state for an exec job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet handed to a unit of work.
    #[default]
    Pending,
    /// The dispatch for this job is in flight.
    Running,
    /// The dispatch returned output.
    Completed,
    /// The dispatch failed or exceeded the watchdog.
    Failed,
}

impl JobStatus {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns the capitalized label used in chat replies.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Returns true when this status can transition to `next`.
    ///
    /// Transitions are strictly monotonic; a status never transitions to itself.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), StatusTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(StatusTransitionError {
            from: self,
            to: next,
        })
    }

    /// Returns true when no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failures for an execution target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecTargetError {
    #[error("pod name cannot be empty")]
    EmptyPodName,
    #[error("namespace cannot be empty")]
    EmptyNamespace,
    #[error("command cannot be empty")]
    EmptyCommand,
}

/// Pod identity plus the command vector to run inside it.
///
/// Deserialization goes through [`ExecTarget::new`], so a decoded target is
/// as valid as a constructed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ExecTargetFields")]
pub struct ExecTarget {
    pod_name: String,
    namespace: String,
    command: Vec<String>,
}

#[derive(Deserialize)]
struct ExecTargetFields {
    pod_name: String,
    namespace: String,
    command: Vec<String>,
}

impl TryFrom<ExecTargetFields> for ExecTarget {
    type Error = ExecTargetError;

    fn try_from(fields: ExecTargetFields) -> Result<Self, Self::Error> {
        Self::new(fields.pod_name, fields.namespace, fields.command)
    }
}

impl ExecTarget {
    /// Builds a target, rejecting blank identities and empty command vectors.
    pub fn new(
        pod_name: impl Into<String>,
        namespace: impl Into<String>,
        command: Vec<String>,
    ) -> Result<Self, ExecTargetError> {
        let pod_name = pod_name.into().trim().to_string();
        let namespace = namespace.into().trim().to_string();
        if pod_name.is_empty() {
            return Err(ExecTargetError::EmptyPodName);
        }
        if namespace.is_empty() {
            return Err(ExecTargetError::EmptyNamespace);
        }
        if command.iter().all(|word| word.trim().is_empty()) {
            return Err(ExecTargetError::EmptyCommand);
        }
        Ok(Self {
            pod_name,
            namespace,
            command,
        })
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

/// Tracked record of one asynchronous in-pod command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecJob {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub target: ExecTarget,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecJob {
    /// Creates a pending job stamped with `start_time`.
    pub fn pending(
        job_id: impl Into<String>,
        user_id: i64,
        chat_id: i64,
        target: ExecTarget,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id,
            chat_id,
            target,
            status: JobStatus::Pending,
            start_time,
            end_time: None,
            output: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds from creation to `end_time`, or to `now` while still in flight.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        elapsed_seconds_between(self.start_time, self.end_time.unwrap_or(now))
    }
}

/// Terminal result reported into the store for a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { output: String },
    Failed { error: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Result of a store mutation. Unknown jobs and rejected transitions are
/// reported, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Applied { from: JobStatus, to: JobStatus },
    UnknownJob,
    Rejected { from: JobStatus, to: JobStatus },
}

impl JobTransition {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Point-in-time per-status totals for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub active_tasks: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}
