use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kubot_jobs::{JobReaperConfig, JobRunnerConfig};
use kubot_kube::KubectlDispatcherConfig;
use kubot_telegram::{
    AuthorizedUsers, BotCommandRouterConfig, TelegramApiConfig, TelegramPollingConfig,
};

fn parse_authorized_users(value: &str) -> Result<AuthorizedUsers, String> {
    AuthorizedUsers::parse(value).map_err(|error| error.to_string())
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    parse_positive_u64(value).and_then(|parsed| {
        usize::try_from(parsed).map_err(|_| "value is too large".to_string())
    })
}

#[derive(Debug, Parser)]
#[command(
    name = "kubot",
    about = "Telegram bot that runs commands in Kubernetes pods",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "bot-token",
        env = "BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token"
    )]
    pub(crate) bot_token: String,

    #[arg(
        long = "authorized-users",
        env = "AUTHORIZED_USERS",
        value_parser = parse_authorized_users,
        help = "Comma-separated Telegram user ids allowed to use the bot"
    )]
    pub(crate) authorized_users: AuthorizedUsers,

    #[arg(
        long = "bot-username",
        env = "KUBOT_BOT_USERNAME",
        help = "Bot username for /cmd@botname addressing; fetched with getMe when unset"
    )]
    pub(crate) bot_username: Option<String>,

    #[arg(
        long = "health-check-port",
        env = "HEALTH_CHECK_PORT",
        default_value_t = 8080,
        help = "Port for the /health and /ready endpoints"
    )]
    pub(crate) health_check_port: u16,

    #[arg(
        long = "health-check-bind",
        env = "KUBOT_HEALTH_CHECK_BIND",
        default_value = "0.0.0.0",
        help = "Address the health server binds to"
    )]
    pub(crate) health_check_bind: String,

    #[arg(
        long = "telegram-api-base",
        env = "KUBOT_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Base URL of the Telegram Bot API"
    )]
    pub(crate) telegram_api_base: String,

    #[arg(
        long = "telegram-request-timeout-ms",
        env = "KUBOT_TELEGRAM_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for Telegram API requests, added to the long-poll wait"
    )]
    pub(crate) telegram_request_timeout_ms: u64,

    #[arg(
        long = "poll-timeout-seconds",
        env = "KUBOT_POLL_TIMEOUT_SECONDS",
        default_value_t = 30,
        help = "Long-poll wait passed to getUpdates"
    )]
    pub(crate) poll_timeout_seconds: u64,

    #[arg(
        long = "kubectl-bin",
        env = "KUBOT_KUBECTL_BIN",
        default_value = "kubectl",
        help = "kubectl executable used for exec and readiness checks"
    )]
    pub(crate) kubectl_bin: PathBuf,

    #[arg(
        long = "kube-context",
        env = "KUBOT_KUBE_CONTEXT",
        help = "Optional kubeconfig context"
    )]
    pub(crate) kube_context: Option<String>,

    #[arg(
        long = "kubeconfig",
        env = "KUBOT_KUBECONFIG",
        help = "Optional kubeconfig path; in-cluster config is used when unset"
    )]
    pub(crate) kubeconfig: Option<PathBuf>,

    #[arg(
        long = "exec-timeout-seconds",
        env = "KUBOT_EXEC_TIMEOUT_SECONDS",
        default_value_t = 300,
        value_parser = parse_positive_u64,
        help = "Upper bound for one kubectl exec"
    )]
    pub(crate) exec_timeout_seconds: u64,

    #[arg(
        long = "exec-max-output-bytes",
        env = "KUBOT_EXEC_MAX_OUTPUT_BYTES",
        default_value_t = 1_048_576,
        value_parser = parse_positive_usize,
        help = "Bytes kept from each kubectl output stream before the child is killed"
    )]
    pub(crate) exec_max_output_bytes: usize,

    #[arg(
        long = "job-max-duration-seconds",
        env = "KUBOT_JOB_MAX_DURATION_SECONDS",
        default_value_t = 1_800,
        help = "Watchdog for background jobs; 0 disables it"
    )]
    pub(crate) job_max_duration_seconds: u64,

    #[arg(
        long = "job-output-max-chars",
        env = "KUBOT_JOB_OUTPUT_MAX_CHARS",
        default_value_t = 3_500,
        value_parser = parse_positive_usize,
        help = "Characters of background job output kept before truncation"
    )]
    pub(crate) job_output_max_chars: usize,

    #[arg(
        long = "sync-output-max-chars",
        env = "KUBOT_SYNC_OUTPUT_MAX_CHARS",
        default_value_t = 4_000,
        value_parser = parse_positive_usize,
        help = "Characters of /exec output kept before truncation"
    )]
    pub(crate) sync_output_max_chars: usize,

    #[arg(
        long = "reaper-interval-seconds",
        env = "KUBOT_REAPER_INTERVAL_SECONDS",
        default_value_t = 3_600,
        value_parser = parse_positive_u64,
        help = "Pause between finished-job cleanup sweeps"
    )]
    pub(crate) reaper_interval_seconds: u64,

    #[arg(
        long = "job-retention-hours",
        env = "KUBOT_JOB_RETENTION_HOURS",
        default_value_t = 24,
        help = "Finished jobs older than this are deleted"
    )]
    pub(crate) job_retention_hours: u64,
}

impl Cli {
    pub(crate) fn telegram_api_config(&self) -> TelegramApiConfig {
        TelegramApiConfig {
            api_base: self.telegram_api_base.clone(),
            bot_token: self.bot_token.clone(),
            request_timeout_ms: self.telegram_request_timeout_ms,
        }
    }

    pub(crate) fn polling_config(&self) -> TelegramPollingConfig {
        TelegramPollingConfig {
            poll_timeout_secs: self.poll_timeout_seconds,
            ..TelegramPollingConfig::default()
        }
    }

    pub(crate) fn kubectl_config(&self) -> KubectlDispatcherConfig {
        KubectlDispatcherConfig {
            kubectl_bin: self.kubectl_bin.clone(),
            context: self.kube_context.clone(),
            kubeconfig: self.kubeconfig.clone(),
            exec_timeout: Duration::from_secs(self.exec_timeout_seconds),
            max_capture_bytes: self.exec_max_output_bytes,
            ..KubectlDispatcherConfig::default()
        }
    }

    pub(crate) fn job_runner_config(&self) -> JobRunnerConfig {
        JobRunnerConfig {
            output_max_chars: self.job_output_max_chars,
            max_job_duration: (self.job_max_duration_seconds > 0)
                .then(|| Duration::from_secs(self.job_max_duration_seconds)),
            ..JobRunnerConfig::default()
        }
    }

    pub(crate) fn router_config(&self) -> BotCommandRouterConfig {
        BotCommandRouterConfig {
            sync_output_max_chars: self.sync_output_max_chars,
            bot_username: self.bot_username.clone(),
            ..BotCommandRouterConfig::default()
        }
    }

    pub(crate) fn reaper_config(&self) -> JobReaperConfig {
        JobReaperConfig {
            interval: Duration::from_secs(self.reaper_interval_seconds),
            retention: Duration::from_secs(self.job_retention_hours.saturating_mul(3_600)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::Cli;

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut args = vec![
            "kubot",
            "--bot-token",
            "123:abc",
            "--authorized-users",
            "42,7",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args)
    }

    #[test]
    fn unit_defaults_match_documented_limits() {
        let cli = parse(&[]).expect("parse");
        assert_eq!(cli.health_check_port, 8080);
        assert!(cli.authorized_users.is_authorized(7));

        let runner = cli.job_runner_config();
        assert_eq!(runner.output_max_chars, 3_500);
        assert_eq!(runner.max_job_duration, Some(Duration::from_secs(1_800)));
        assert_eq!(cli.router_config().sync_output_max_chars, 4_000);
        assert_eq!(cli.router_config().bot_username, None);

        let reaper = cli.reaper_config();
        assert_eq!(reaper.interval, Duration::from_secs(3_600));
        assert_eq!(reaper.retention, Duration::from_secs(86_400));

        let kubectl = cli.kubectl_config();
        assert_eq!(kubectl.exec_timeout, Duration::from_secs(300));
        assert_eq!(kubectl.context, None);
        assert_eq!(kubectl.max_capture_bytes, 1_048_576);
    }

    #[test]
    fn functional_zero_job_duration_disables_watchdog() {
        let cli = parse(&["--job-max-duration-seconds", "0"]).expect("parse");
        assert_eq!(cli.job_runner_config().max_job_duration, None);
    }

    #[test]
    fn regression_rejects_invalid_authorized_users_and_zero_limits() {
        assert!(Cli::try_parse_from([
            "kubot",
            "--bot-token",
            "t",
            "--authorized-users",
            "alice"
        ])
        .is_err());
        assert!(parse(&["--job-output-max-chars", "0"]).is_err());
        assert!(parse(&["--reaper-interval-seconds", "0"]).is_err());
        assert!(parse(&["--exec-max-output-bytes", "0"]).is_err());
    }
}
