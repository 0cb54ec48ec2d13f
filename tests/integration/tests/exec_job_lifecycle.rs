use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use kubot_jobs::{
    sweep_expired_jobs, DispatchError, ExecDispatcher, ExecTarget, InMemoryJobStore,
    JobNotifier, JobRunner, JobRunnerConfig, JobStatus, JobStore,
};
use kubot_telegram::{AuthorizedUsers, BotCommandRouter, BotCommandRouterConfig, InboundMessage};
use tokio::sync::Mutex as AsyncMutex;

/// Resolves pods by name: `missing` is absent, `hung` never answers, anything
/// else echoes its command after `delay`.
struct ScriptedDispatcher {
    delay: Duration,
}

#[async_trait]
impl ExecDispatcher for ScriptedDispatcher {
    async fn execute(&self, target: &ExecTarget) -> Result<String, DispatchError> {
        match target.pod_name() {
            "missing" => Err(DispatchError::PodNotFound {
                pod: target.pod_name().to_string(),
                namespace: target.namespace().to_string(),
            }),
            "hung" => std::future::pending().await,
            _ => {
                tokio::time::sleep(self.delay).await;
                Ok(format!("ran: {}", target.command().join(" ")))
            }
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: AsyncMutex<Vec<(i64, String)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    async fn messages(&self) -> Vec<(i64, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl JobNotifier for RecordingNotifier {
    async fn send(&self, chat_id: i64, message: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("chat unreachable");
        }
        self.sent.lock().await.push((chat_id, message.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryJobStore>,
    notifier: Arc<RecordingNotifier>,
    dispatcher: Arc<ScriptedDispatcher>,
    runner: JobRunner,
}

impl Harness {
    fn new(delay: Duration, max_job_duration: Option<Duration>) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Arc::new(ScriptedDispatcher { delay });
        let runner = JobRunner::new(
            store.clone(),
            dispatcher.clone(),
            notifier.clone(),
            JobRunnerConfig {
                max_job_duration,
                ..JobRunnerConfig::default()
            },
        )
        .expect("runner");
        Self {
            store,
            notifier,
            dispatcher,
            runner,
        }
    }

    async fn wait_terminal(&self, job_id: &str) -> kubot_jobs::ExecJob {
        for _ in 0..300 {
            if let Some(job) = self.store.get(job_id).await {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not reach a terminal state");
    }

    async fn wait_notifications(&self, expected: usize) -> Vec<(i64, String)> {
        for _ in 0..300 {
            let messages = self.notifier.messages().await;
            if messages.len() >= expected {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notifier.messages().await
    }
}

fn target(pod: &str, command: &[&str]) -> ExecTarget {
    ExecTarget::new(
        pod,
        "default",
        command.iter().map(|word| word.to_string()).collect(),
    )
    .expect("target")
}

#[tokio::test]
async fn integration_submitted_job_runs_detached_and_notifies_on_completion() {
    let harness = Harness::new(Duration::from_millis(150), None);

    let job_id = harness
        .runner
        .submit(10, 500, target("worker-1", &["sleep", "5"]))
        .await;

    let in_flight = harness.store.get(&job_id).await.expect("job");
    assert_eq!(in_flight.status, JobStatus::Running);
    assert_eq!(in_flight.end_time, None);
    assert!(harness.store.active_task(&job_id).await.is_some());

    let finished = harness.wait_terminal(&job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.output.as_deref(), Some("ran: sleep 5"));
    assert_eq!(finished.error, None);
    assert!(finished.end_time.is_some_and(|end| end >= finished.start_time));
    assert!(harness.store.active_task(&job_id).await.is_none());

    let messages = harness.wait_notifications(1).await;
    assert_eq!(messages.len(), 1);
    let (chat_id, text) = &messages[0];
    assert_eq!(*chat_id, 500);
    assert!(text.starts_with("Async exec completed"));
    assert!(text.contains(&format!("Job ID: {job_id}")));
    assert!(text.contains("Pod: worker-1"));
    assert!(text.contains("Command: sleep 5"));
    assert!(text.ends_with("Output:\nran: sleep 5"));
}

#[tokio::test]
async fn integration_dispatch_failure_is_recorded_and_only_surfaced_by_notification() {
    let harness = Harness::new(Duration::ZERO, None);

    let job_id = harness
        .runner
        .submit(10, 500, target("missing", &["cat", "/etc/hostname"]))
        .await;
    let failed = harness.wait_terminal(&job_id).await;

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.output, None);
    assert_eq!(
        failed.error.as_deref(),
        Some("pod 'missing' not found in namespace 'default'")
    );
    let messages = harness.wait_notifications(1).await;
    assert!(messages[0].1.starts_with("Async exec failed"));
    assert!(messages[0]
        .1
        .ends_with("Error: pod 'missing' not found in namespace 'default'"));
}

#[tokio::test]
async fn integration_watchdog_fails_jobs_that_never_return() {
    let harness = Harness::new(Duration::ZERO, Some(Duration::from_millis(50)));

    let job_id = harness
        .runner
        .submit(10, 500, target("hung", &["tail", "-f", "/dev/null"]))
        .await;
    let failed = harness.wait_terminal(&job_id).await;

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("execution timed out after 50ms")
    );
    assert_eq!(harness.wait_notifications(1).await.len(), 1);
}

#[tokio::test]
async fn integration_notifier_failure_leaves_job_state_intact() {
    let harness = Harness::new(Duration::ZERO, None);
    harness.notifier.fail.store(true, Ordering::SeqCst);

    let job_id = harness
        .runner
        .submit(10, 500, target("worker-1", &["date"]))
        .await;
    let finished = harness.wait_terminal(&job_id).await;

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.output.as_deref(), Some("ran: date"));
    assert!(harness.notifier.messages().await.is_empty());
}

#[tokio::test]
async fn integration_concurrent_jobs_are_isolated_per_user() {
    let harness = Harness::new(Duration::from_millis(20), None);

    let mut handles = Vec::new();
    for index in 0..20_i64 {
        let runner = harness.runner.clone();
        handles.push(tokio::spawn(async move {
            let user_id = index % 2;
            let job_id = runner
                .submit(user_id, 100 + user_id, target("worker-1", &["echo", "hi"]))
                .await;
            (user_id, job_id)
        }));
    }
    let mut submitted = Vec::new();
    for handle in handles {
        submitted.push(handle.await.expect("submit task"));
    }

    let ids = submitted
        .iter()
        .map(|(_, job_id)| job_id.clone())
        .collect::<HashSet<_>>();
    assert_eq!(ids.len(), 20);
    for (_, job_id) in &submitted {
        assert_eq!(
            harness.wait_terminal(job_id).await.status,
            JobStatus::Completed
        );
    }

    for user_id in [0_i64, 1] {
        let jobs = harness.store.list_for_user(user_id).await;
        assert_eq!(jobs.len(), 10);
        assert!(jobs
            .iter()
            .all(|job| job.user_id == user_id && job.chat_id == 100 + user_id));
    }
    let counts = harness.store.counts().await;
    assert_eq!(counts.completed, 20);
    assert_eq!(counts.active_tasks, 0);
}

#[tokio::test]
async fn integration_reaped_jobs_disappear_and_their_ids_are_not_reissued() {
    let harness = Harness::new(Duration::ZERO, None);
    let running = harness
        .runner
        .submit(10, 500, target("hung", &["sleep", "infinity"]))
        .await;
    let finished = harness
        .runner
        .submit(10, 500, target("worker-1", &["ls"]))
        .await;
    harness.wait_terminal(&finished).await;

    assert_eq!(sweep_expired_jobs(harness.store.as_ref(), Duration::ZERO).await, 1);
    assert!(harness.store.get(&finished).await.is_none());
    assert_eq!(
        harness.store.get(&running).await.map(|job| job.status),
        Some(JobStatus::Running)
    );

    let mut issued = HashSet::from([finished.clone()]);
    for _ in 0..50 {
        let job_id = harness
            .store
            .create(11, 501, target("worker-1", &["ls"]))
            .await;
        assert!(issued.insert(job_id));
    }

    if let Some(task) = harness.store.active_task(&running).await {
        task.abort();
    }
}

#[tokio::test]
async fn integration_chat_commands_drive_the_job_lifecycle() {
    let harness = Harness::new(Duration::from_millis(20), None);
    let router = BotCommandRouter::new(
        harness.runner.clone(),
        harness.dispatcher.clone(),
        AuthorizedUsers::new([10]),
        BotCommandRouterConfig::default(),
    )
    .expect("router");
    let message = |text: &str| InboundMessage {
        chat_id: 500,
        user_id: 10,
        username: None,
        text: text.to_string(),
    };

    let reply = router
        .handle(&message("/exec_notif worker-1 default sleep 5"))
        .await
        .expect("reply");
    let job_id = reply.deferred_job_id.expect("deferred job");
    assert!(reply.text.starts_with("Async exec started"));

    let listing = router.handle(&message("/jobs")).await.expect("reply");
    assert!(listing.text.contains(&format!("{job_id} - Pending")));

    assert!(router.start_deferred_job(&job_id).await.is_applied());
    harness.wait_terminal(&job_id).await;

    let listing = router.handle(&message("/jobs")).await.expect("reply");
    assert!(listing.text.contains(&format!("{job_id} - Completed (")));
    assert!(listing.text.contains("worker-1 @ default"));

    let detail = router
        .handle(&message(&format!("/job {job_id}")))
        .await
        .expect("reply");
    assert!(detail.text.ends_with("Output:\nran: sleep 5"));
}
