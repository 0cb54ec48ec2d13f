//! Chat text for job acknowledgements, listings and detail views.

use chrono::{DateTime, Utc};
use kubot_core::{format_duration_seconds, render_command, render_command_preview};
use kubot_jobs::{ExecJob, ExecTarget, JobStatus};

const JOBS_LISTING_LIMIT: usize = 10;
const JOBS_COMMAND_PREVIEW_WORDS: usize = 3;

/// Immediate acknowledgement sent when an async exec job is accepted.
pub fn render_exec_started(job_id: &str, target: &ExecTarget) -> String {
    format!(
        "Async exec started\n\nJob ID: {job_id}\nPod: {}\nNamespace: {}\nCommand: {}\n\nYou'll be notified when the command completes. Use /jobs to check status.",
        target.pod_name(),
        target.namespace(),
        render_command(target.command()),
    )
}

fn render_job_duration(job: &ExecJob, now: DateTime<Utc>) -> String {
    match (job.end_time, job.status) {
        (Some(_), _) => format!(" ({})", format_duration_seconds(job.elapsed_seconds(now), 1)),
        (None, JobStatus::Running) => format!(
            " ({} so far)",
            format_duration_seconds(job.elapsed_seconds(now), 1)
        ),
        (None, _) => String::new(),
    }
}

/// Renders a user's jobs most-recent-first, capped at ten entries.
pub fn render_jobs_listing(jobs: &[ExecJob], now: DateTime<Utc>) -> String {
    if jobs.is_empty() {
        return "No async execution jobs found.".to_string();
    }

    let mut ordered = jobs.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| right.start_time.cmp(&left.start_time));

    let mut message = String::from("Your async execution jobs\n\n");
    for job in ordered.iter().take(JOBS_LISTING_LIMIT) {
        message.push_str(&format!(
            "{} - {}{}\n   {} @ {}\n   {}\n\n",
            job.job_id,
            job.status.label(),
            render_job_duration(job, now),
            job.target.pod_name(),
            job.target.namespace(),
            render_command_preview(job.target.command(), JOBS_COMMAND_PREVIEW_WORDS),
        ));
    }
    if ordered.len() > JOBS_LISTING_LIMIT {
        message.push_str(&format!(
            "... and {} more jobs",
            ordered.len() - JOBS_LISTING_LIMIT
        ));
    }
    message.trim_end().to_string()
}

/// Full view of one job, including its output or error once terminal.
pub fn render_job_detail(job: &ExecJob, now: DateTime<Utc>) -> String {
    let mut message = format!(
        "Job {} - {}{}\nPod: {}\nNamespace: {}\nCommand: {}\nStarted: {}",
        job.job_id,
        job.status.label(),
        render_job_duration(job, now),
        job.target.pod_name(),
        job.target.namespace(),
        render_command(job.target.command()),
        job.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(end_time) = job.end_time {
        message.push_str(&format!(
            "\nFinished: {}",
            end_time.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(output) = job.output.as_deref() {
        message.push_str(&format!("\n\nOutput:\n{output}"));
    }
    if let Some(error) = job.error.as_deref() {
        message.push_str(&format!("\n\nError: {error}"));
    }
    message
}
