use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::job_store::JobStore;

const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(3_600);
const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(24 * 3_600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReaperConfig {
    /// Pause between sweeps. The first sweep runs one interval after start.
    pub interval: Duration,
    /// Terminal jobs whose `end_time` is older than this are deleted.
    pub retention: Duration,
}

impl Default for JobReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAPER_INTERVAL,
            retention: DEFAULT_JOB_RETENTION,
        }
    }
}

/// Owns the background sweep task until [`JobReaperHandle::shutdown`] is awaited.
#[derive(Debug)]
pub struct JobReaperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl JobReaperHandle {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the loop between sweeps and waits for the task to exit.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the periodic reaper on the current Tokio runtime.
pub fn start_job_reaper(
    store: Arc<dyn JobStore>,
    config: JobReaperConfig,
) -> Result<JobReaperHandle> {
    if config.interval.is_zero() {
        bail!("job reaper interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("job reaper requires an active Tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(async move {
        run_job_reaper_loop(store, config, shutdown_rx).await;
    });
    Ok(JobReaperHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

/// Runs one sweep and returns the number of deleted jobs.
pub async fn sweep_expired_jobs(store: &dyn JobStore, retention: Duration) -> usize {
    let reaped = store.reap(retention).await;
    let counts = store.counts().await;
    info!(
        reaped = reaped.len(),
        remaining = counts.total(),
        in_flight = counts.pending + counts.running,
        "completed periodic job cleanup"
    );
    reaped.len()
}

async fn run_job_reaper_loop(
    store: Arc<dyn JobStore>,
    config: JobReaperConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(
        interval_secs = config.interval.as_secs(),
        retention_secs = config.retention.as_secs(),
        "job reaper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_expired_jobs(store.as_ref(), config.retention).await;
            }
            _ = &mut shutdown_rx => {
                debug!("job reaper stopped");
                break;
            }
        }
    }
}
