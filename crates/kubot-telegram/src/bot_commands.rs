//! Chat command parsing and routing.
//!
//! `/exec` dispatches inline and replies with the output. `/exec_notif` only
//! creates the job: the acknowledgement is sent first and the runtime starts
//! the job afterwards, so the completion notice can never arrive before it.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use kubot_core::truncate_head;
use kubot_jobs::{
    is_valid_job_id, DispatchError, ExecDispatcher, ExecTarget, JobRunner, JobTransition,
};
use tracing::{info, warn};

use crate::bot_access::AuthorizedUsers;
use crate::job_render::{render_exec_started, render_job_detail, render_jobs_listing};

const DEFAULT_SYNC_OUTPUT_MAX_CHARS: usize = 4_000;
const DEFAULT_SYNC_OUTPUT_TRUNCATION_MARKER: &str = "\n\n... (truncated)";
const ACCESS_DENIED_REPLY: &str = "Access denied. You are not authorized to use this bot.";
const EXEC_USAGE: &str = "Usage: /exec <pod_name> <namespace> <command>";
const EXEC_NOTIF_USAGE: &str = "Usage: /exec_notif <pod_name> <namespace> <command>";
const JOB_USAGE: &str = "Usage: /job <job_id>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Help,
    Exec { args: Vec<String> },
    ExecNotif { args: Vec<String> },
    Jobs,
    Job { job_id: String },
    Invalid { message: String },
    Unknown { command: String },
}

impl BotCommand {
    /// Parses a message text. Returns `None` for plain text that is not a command.
    /// Any `@botname` suffix is accepted.
    pub fn parse(text: &str) -> Option<Self> {
        Self::parse_for(text, None)
    }

    /// Like [`BotCommand::parse`], but a `/cmd@botname` addressed to an account
    /// other than `bot_username` yields `None`. Usernames compare
    /// case-insensitively.
    pub fn parse_for(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let (head, remainder) = match trimmed.split_once(char::is_whitespace) {
            Some((head, remainder)) => (head, remainder.trim()),
            None => (trimmed, ""),
        };
        // Group chats address commands as `/cmd@botname`.
        let (name, addressee) = match head.trim_start_matches('/').split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (head.trim_start_matches('/'), None),
        };
        if let (Some(addressee), Some(bot_username)) = (addressee, bot_username) {
            if !addressee.eq_ignore_ascii_case(bot_username.trim_start_matches('@')) {
                return None;
            }
        }

        let parsed = match name {
            "start" | "help" => BotCommand::Help,
            "jobs" => BotCommand::Jobs,
            "job" => match remainder.split_whitespace().collect::<Vec<_>>().as_slice() {
                [job_id] => BotCommand::Job {
                    job_id: job_id.to_ascii_lowercase(),
                },
                _ => BotCommand::Invalid {
                    message: JOB_USAGE.to_string(),
                },
            },
            "exec" | "exec_notif" => match shell_words::split(remainder) {
                Ok(args) if name == "exec" => BotCommand::Exec { args },
                Ok(args) => BotCommand::ExecNotif { args },
                Err(error) => BotCommand::Invalid {
                    message: format!("Could not parse arguments: {error}"),
                },
            },
            other => BotCommand::Unknown {
                command: other.to_string(),
            },
        };
        Some(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub text: String,
}

/// Text to send back, plus a job that must be started once it is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReply {
    pub text: String,
    pub deferred_job_id: Option<String>,
}

impl BotReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            deferred_job_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCommandRouterConfig {
    pub sync_output_max_chars: usize,
    pub sync_output_truncation_marker: String,
    /// This bot's username. When set, commands addressed to other bots are ignored.
    pub bot_username: Option<String>,
}

impl Default for BotCommandRouterConfig {
    fn default() -> Self {
        Self {
            sync_output_max_chars: DEFAULT_SYNC_OUTPUT_MAX_CHARS,
            sync_output_truncation_marker: DEFAULT_SYNC_OUTPUT_TRUNCATION_MARKER.to_string(),
            bot_username: None,
        }
    }
}

impl BotCommandRouterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sync_output_max_chars == 0 {
            bail!("sync_output_max_chars must be greater than 0");
        }
        if self
            .bot_username
            .as_deref()
            .is_some_and(|name| name.trim_start_matches('@').trim().is_empty())
        {
            bail!("bot_username cannot be blank");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct BotCommandRouter {
    runner: JobRunner,
    dispatcher: Arc<dyn ExecDispatcher>,
    access: AuthorizedUsers,
    config: BotCommandRouterConfig,
}

impl BotCommandRouter {
    pub fn new(
        runner: JobRunner,
        dispatcher: Arc<dyn ExecDispatcher>,
        access: AuthorizedUsers,
        config: BotCommandRouterConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runner,
            dispatcher,
            access,
            config,
        })
    }

    /// Handles one inbound message. Plain text yields no reply.
    pub async fn handle(&self, message: &InboundMessage) -> Option<BotReply> {
        let command = BotCommand::parse_for(&message.text, self.config.bot_username.as_deref())?;
        if !self.access.is_authorized(message.user_id) {
            warn!(
                user_id = message.user_id,
                username = message.username.as_deref().unwrap_or("unknown"),
                "unauthorized access attempt"
            );
            return Some(BotReply::text(ACCESS_DENIED_REPLY));
        }

        let reply = match command {
            BotCommand::Help => BotReply::text(render_help()),
            BotCommand::Exec { args } => BotReply::text(self.handle_exec(&args).await),
            BotCommand::ExecNotif { args } => self.handle_exec_notif(message, &args).await,
            BotCommand::Jobs => {
                let jobs = self.runner.store().list_for_user(message.user_id).await;
                BotReply::text(render_jobs_listing(&jobs, Utc::now()))
            }
            BotCommand::Job { job_id } => {
                BotReply::text(self.handle_job(message.user_id, &job_id).await)
            }
            BotCommand::Invalid { message } => BotReply::text(message),
            BotCommand::Unknown { command } => BotReply::text(format!(
                "Unknown command /{command}. Use /help to list commands."
            )),
        };
        Some(reply)
    }

    /// Starts a job created by `/exec_notif` after its acknowledgement went out.
    pub async fn start_deferred_job(&self, job_id: &str) -> JobTransition {
        self.runner.start(job_id).await
    }

    async fn handle_exec(&self, args: &[String]) -> String {
        let target = match parse_exec_target(args, EXEC_USAGE) {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        match self.dispatcher.execute(&target).await {
            Ok(output) => {
                let output = truncate_head(
                    &output,
                    self.config.sync_output_max_chars,
                    &self.config.sync_output_truncation_marker,
                );
                format!("Command output from {}\n\n{output}", target.pod_name())
            }
            Err(DispatchError::PermissionDenied(detail)) => format!(
                "Permission denied\n\nThe bot lacks pods/exec access in namespace {}.\n\nError details: {detail}",
                target.namespace()
            ),
            Err(error) => {
                warn!(pod = target.pod_name(), namespace = target.namespace(), %error, "exec failed");
                format!("Error executing command: {error}")
            }
        }
    }

    async fn handle_exec_notif(&self, message: &InboundMessage, args: &[String]) -> BotReply {
        let target = match parse_exec_target(args, EXEC_NOTIF_USAGE) {
            Ok(target) => target,
            Err(reply) => return BotReply::text(reply),
        };
        let acknowledgement_target = target.clone();
        let job_id = self
            .runner
            .store()
            .create(message.user_id, message.chat_id, target)
            .await;
        info!(job_id = %job_id, user_id = message.user_id, "async exec accepted");
        BotReply {
            text: render_exec_started(&job_id, &acknowledgement_target),
            deferred_job_id: Some(job_id),
        }
    }

    async fn handle_job(&self, user_id: i64, job_id: &str) -> String {
        if !is_valid_job_id(job_id) {
            return JOB_USAGE.to_string();
        }
        match self.runner.store().get(job_id).await {
            Some(job) if job.user_id == user_id => render_job_detail(&job, Utc::now()),
            _ => format!("Job {job_id} not found."),
        }
    }
}

fn parse_exec_target(args: &[String], usage: &str) -> Result<ExecTarget, String> {
    match args {
        [pod, namespace, command @ ..] if !command.is_empty() => {
            ExecTarget::new(pod.as_str(), namespace.as_str(), command.to_vec())
                .map_err(|error| format!("Invalid exec request: {error}\n\n{usage}"))
        }
        _ => Err(usage.to_string()),
    }
}

fn render_help() -> String {
    [
        "Kubernetes exec bot",
        "",
        "/exec <pod_name> <namespace> <command> - run a command and wait for its output",
        "/exec_notif <pod_name> <namespace> <command> - run a command in the background and get notified",
        "/jobs - list your recent background jobs",
        "/job <job_id> - show one background job",
        "/help - show this message",
        "",
        "Quote arguments that contain spaces, e.g. /exec web-0 default sh -c 'ls /tmp'",
    ]
    .join("\n")
}
