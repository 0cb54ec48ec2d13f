//! Asynchronous in-pod command jobs.
//!
//! A job decouples an "execute command in pod" request from its outcome: the
//! store hands back an identifier immediately, the runner executes the command
//! out-of-band and reports the result through a notifier, and the reaper drops
//! finished jobs once they age past the retention window.

pub mod job_id;
pub mod job_reaper;
pub mod job_runner;
pub mod job_store;
pub mod job_types;

pub use job_id::{is_valid_job_id, JobIdSequence, JOB_ID_LEN};
pub use job_reaper::{start_job_reaper, sweep_expired_jobs, JobReaperConfig, JobReaperHandle};
pub use job_runner::{
    render_job_completed_message, render_job_failed_message, DispatchError, ExecDispatcher,
    JobNotifier, JobRunner, JobRunnerConfig,
};
pub use job_store::{InMemoryJobStore, JobStore};
pub use job_types::{
    ExecJob, ExecTarget, ExecTargetError, JobCounts, JobOutcome, JobStatus, JobTransition,
    StatusTransitionError,
};
