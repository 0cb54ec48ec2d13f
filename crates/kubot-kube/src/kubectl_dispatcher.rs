use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use kubot_jobs::{DispatchError, ExecDispatcher, ExecTarget};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const DEFAULT_KUBECTL_BIN: &str = "kubectl";
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const REMOTE_EXIT_MARKER: &str = "command terminated with exit code";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubectlDispatcherConfig {
    pub kubectl_bin: PathBuf,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    /// Upper bound for one `kubectl exec` child process.
    pub exec_timeout: Duration,
    pub probe_timeout: Duration,
    /// Bytes kept from each of stdout and stderr; the child is killed once
    /// either stream goes past it.
    pub max_capture_bytes: usize,
}

impl Default for KubectlDispatcherConfig {
    fn default() -> Self {
        Self {
            kubectl_bin: PathBuf::from(DEFAULT_KUBECTL_BIN),
            context: None,
            kubeconfig: None,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

/// [`ExecDispatcher`] backed by `kubectl exec`.
#[derive(Debug, Clone)]
pub struct KubectlDispatcher {
    config: KubectlDispatcherConfig,
}

impl KubectlDispatcher {
    pub fn new(config: KubectlDispatcherConfig) -> Result<Self> {
        if config.kubectl_bin.as_os_str().is_empty() {
            bail!("kubectl binary path cannot be empty");
        }
        if config.exec_timeout.is_zero() || config.probe_timeout.is_zero() {
            bail!("kubectl timeouts must be greater than zero");
        }
        if config.max_capture_bytes == 0 {
            bail!("kubectl output capture limit must be greater than zero");
        }
        Ok(Self { config })
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = self.config.kubeconfig.as_ref() {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = self.config.context.as_deref() {
            args.push("--context".to_string());
            args.push(context.to_string());
        }
        args
    }

    /// Full argument vector for running `target` through `kubectl exec`.
    pub fn exec_args(&self, target: &ExecTarget) -> Vec<String> {
        let mut args = self.global_args();
        args.extend([
            "exec".to_string(),
            "--namespace".to_string(),
            target.namespace().to_string(),
            target.pod_name().to_string(),
            "--".to_string(),
        ]);
        args.extend(target.command().iter().cloned());
        args
    }

    /// Checks that the cluster answers a cheap namespace listing.
    pub async fn probe(&self) -> Result<()> {
        let mut args = self.global_args();
        args.extend(
            ["get", "namespaces", "--chunk-size=1", "--output=name"].map(str::to_string),
        );
        let output = tokio::time::timeout(
            self.config.probe_timeout,
            self.command(&args).output(),
        )
        .await
        .context("cluster probe timed out")?
        .with_context(|| format!("failed to run {}", self.config.kubectl_bin.display()))?;
        if !output.status.success() {
            bail!(
                "cluster probe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.config.kubectl_bin);
        command.args(args);
        command.kill_on_drop(true);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl ExecDispatcher for KubectlDispatcher {
    async fn execute(&self, target: &ExecTarget) -> Result<String, DispatchError> {
        let args = self.exec_args(target);
        debug!(
            pod = target.pod_name(),
            namespace = target.namespace(),
            "running kubectl exec"
        );
        let mut child = self.command(&args).spawn().map_err(|error| {
            DispatchError::Spawn(format!("{}: {error}", self.config.kubectl_bin.display()))
        })?;
        let output = match tokio::time::timeout(
            self.config.exec_timeout,
            capture_output(&mut child, self.config.max_capture_bytes),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return Err(DispatchError::Backend(format!(
                    "failed to read kubectl output: {error}"
                )))
            }
            // Dropping the child kills it.
            Err(_) => return Err(DispatchError::Timeout(self.config.exec_timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.truncated {
            warn!(
                pod = target.pod_name(),
                namespace = target.namespace(),
                limit_bytes = self.config.max_capture_bytes,
                "kubectl exec output exceeded the capture limit; child killed"
            );
            return Ok(merge_streams(&stdout, &stderr));
        }
        if output.status.success() || stderr.contains(REMOTE_EXIT_MARKER) {
            return Ok(merge_streams(&stdout, &stderr));
        }

        let error = classify_kubectl_failure(&stderr, output.status.code(), target);
        warn!(
            pod = target.pod_name(),
            namespace = target.namespace(),
            %error,
            "kubectl exec failed"
        );
        Err(error)
    }
}

struct CapturedOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

async fn capture_output(child: &mut Child, limit: usize) -> std::io::Result<CapturedOutput> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_bytes = Vec::new();
    let mut stderr_bytes = Vec::new();
    let truncated = {
        let stdout_read = read_capped(stdout, limit, &mut stdout_bytes);
        let stderr_read = read_capped(stderr, limit, &mut stderr_bytes);
        tokio::pin!(stdout_read, stderr_read);
        tokio::select! {
            cut = &mut stdout_read => if cut? { true } else { stderr_read.await? },
            cut = &mut stderr_read => if cut? { true } else { stdout_read.await? },
        }
    };
    if truncated {
        if let Err(error) = child.start_kill() {
            debug!(%error, "kubectl exited before it could be killed");
        }
    }
    let status = child.wait().await?;
    stdout_bytes.truncate(limit);
    stderr_bytes.truncate(limit);
    Ok(CapturedOutput {
        status,
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        truncated,
    })
}

/// Appends at most `limit + 1` bytes to `buffer` and reports whether the
/// stream went past `limit`. The pipe is closed on return.
async fn read_capped<R>(
    pipe: Option<R>,
    limit: usize,
    buffer: &mut Vec<u8>,
) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(false);
    };
    let mut limited = pipe.take(limit as u64 + 1);
    limited.read_to_end(buffer).await?;
    Ok(buffer.len() > limit)
}

fn merge_streams(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => {
            let separator = if stdout.ends_with('\n') { "" } else { "\n" };
            format!("{stdout}{separator}{stderr}")
        }
    }
}

/// Maps kubectl's stderr for a failed exec onto a [`DispatchError`].
pub fn classify_kubectl_failure(
    stderr: &str,
    exit_code: Option<i32>,
    target: &ExecTarget,
) -> DispatchError {
    let detail = stderr.trim();
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("notfound") || lowered.contains("not found") {
        return DispatchError::PodNotFound {
            pod: target.pod_name().to_string(),
            namespace: target.namespace().to_string(),
        };
    }
    if lowered.contains("forbidden") || lowered.contains("unauthorized") {
        return DispatchError::PermissionDenied(detail.to_string());
    }
    if detail.is_empty() {
        return DispatchError::Backend(match exit_code {
            Some(code) => format!("kubectl exited with status {code}"),
            None => "kubectl terminated by signal".to_string(),
        });
    }
    DispatchError::Backend(detail.to_string())
}
