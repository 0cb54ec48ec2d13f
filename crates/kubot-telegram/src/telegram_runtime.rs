use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bot_commands::{BotCommandRouter, InboundMessage};
use crate::telegram_api_client::{TelegramApiClient, TelegramUpdate};
use crate::telegram_notifier::bound_telegram_message;

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramPollingConfig {
    /// Long-poll wait passed to `getUpdates`.
    pub poll_timeout_secs: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for TelegramPollingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl TelegramPollingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            bail!("retry_max_delay_ms must be at least retry_base_delay_ms");
        }
        Ok(())
    }
}

/// Long-polling loop: fetches updates and hands each message to its own task.
pub struct TelegramPollingRuntime {
    client: TelegramApiClient,
    router: Arc<BotCommandRouter>,
    config: TelegramPollingConfig,
    next_offset: i64,
}

impl TelegramPollingRuntime {
    pub fn new(
        client: TelegramApiClient,
        router: Arc<BotCommandRouter>,
        config: TelegramPollingConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            router,
            config,
            next_offset: 0,
        })
    }

    /// Polls until `shutdown_rx` flips to `true` or its sender is dropped.
    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_timeout_secs = self.config.poll_timeout_secs,
            "telegram polling started"
        );
        let mut failures = 0_usize;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let poll = self
                .client
                .get_updates(self.next_offset, self.config.poll_timeout_secs);
            let result = tokio::select! {
                result = poll => result,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match result {
                Ok(updates) => {
                    failures = 0;
                    self.dispatch_updates(updates);
                }
                Err(poll_error) => {
                    failures = failures.saturating_add(1);
                    let delay_ms = retry_delay_ms(
                        self.config.retry_base_delay_ms,
                        failures,
                        self.config.retry_max_delay_ms,
                    );
                    warn!(
                        error = %poll_error,
                        failures,
                        delay_ms,
                        "telegram getUpdates failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("telegram polling stopped");
        Ok(())
    }

    /// Advances the offset past every update and spawns a handler per message.
    pub fn dispatch_updates(&mut self, updates: Vec<TelegramUpdate>) -> usize {
        let mut dispatched = 0_usize;
        for update in updates {
            self.next_offset = self.next_offset.max(update.update_id.saturating_add(1));
            let Some(message) = inbound_message(update) else {
                continue;
            };
            let client = self.client.clone();
            let router = Arc::clone(&self.router);
            tokio::spawn(async move {
                handle_inbound_message(&client, &router, message).await;
            });
            dispatched += 1;
        }
        dispatched
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }
}

fn inbound_message(update: TelegramUpdate) -> Option<InboundMessage> {
    let message = update.message?;
    let user = message.from?;
    Some(InboundMessage {
        chat_id: message.chat.id,
        user_id: user.id,
        username: user.username,
        text: message.text?,
    })
}

async fn handle_inbound_message(
    client: &TelegramApiClient,
    router: &BotCommandRouter,
    message: InboundMessage,
) {
    let Some(reply) = router.handle(&message).await else {
        return;
    };
    if let Err(send_error) = client
        .send_message(message.chat_id, &bound_telegram_message(&reply.text))
        .await
    {
        error!(
            chat_id = message.chat_id,
            error = %send_error,
            "telegram reply delivery failed"
        );
    }
    if let Some(job_id) = reply.deferred_job_id {
        let transition = router.start_deferred_job(&job_id).await;
        debug!(job_id = %job_id, ?transition, "deferred job start");
    }
}

fn retry_delay_ms(base_delay_ms: u64, attempt: usize, max_delay_ms: u64) -> u64 {
    if base_delay_ms == 0 {
        return 0;
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    base_delay_ms
        .saturating_mul(1_u64 << exponent)
        .min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use kubot_jobs::{
        DispatchError, ExecDispatcher, ExecTarget, InMemoryJobStore, JobRunner, JobRunnerConfig,
        JobStore,
    };
    use serde_json::json;

    use super::*;
    use crate::bot_access::AuthorizedUsers;
    use crate::bot_commands::BotCommandRouterConfig;
    use crate::telegram_api_client::TelegramApiConfig;
    use crate::telegram_notifier::TelegramNotifier;

    struct EchoDispatcher;

    #[async_trait]
    impl ExecDispatcher for EchoDispatcher {
        async fn execute(&self, target: &ExecTarget) -> Result<String, DispatchError> {
            Ok(target.command().join(" "))
        }
    }

    fn runtime_for(server: &MockServer) -> (TelegramPollingRuntime, Arc<InMemoryJobStore>) {
        let client = TelegramApiClient::new(TelegramApiConfig {
            api_base: server.base_url(),
            bot_token: "telegram-token".to_string(),
            request_timeout_ms: 2_000,
        })
        .expect("client");
        let store = Arc::new(InMemoryJobStore::new());
        let dispatcher: Arc<dyn ExecDispatcher> = Arc::new(EchoDispatcher);
        let runner = JobRunner::new(
            store.clone(),
            dispatcher.clone(),
            Arc::new(TelegramNotifier::new(client.clone())),
            JobRunnerConfig::default(),
        )
        .expect("runner");
        let router = BotCommandRouter::new(
            runner,
            dispatcher,
            AuthorizedUsers::new([42]),
            BotCommandRouterConfig::default(),
        )
        .expect("router");
        let runtime = TelegramPollingRuntime::new(
            client,
            Arc::new(router),
            TelegramPollingConfig {
                poll_timeout_secs: 0,
                retry_base_delay_ms: 5,
                retry_max_delay_ms: 20,
            },
        )
        .expect("runtime");
        (runtime, store)
    }

    fn update(update_id: i64, user_id: i64, text: &str) -> TelegramUpdate {
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "chat": {"id": 900},
                "from": {"id": user_id},
                "text": text
            }
        }))
        .expect("update")
    }

    #[test]
    fn unit_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay_ms(100, 1, 1_000), 100);
        assert_eq!(retry_delay_ms(100, 3, 1_000), 400);
        assert_eq!(retry_delay_ms(100, 8, 1_000), 1_000);
        assert_eq!(retry_delay_ms(0, 4, 1_000), 0);
    }

    #[test]
    fn unit_config_rejects_inverted_retry_bounds() {
        let config = TelegramPollingConfig {
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 5,
            ..TelegramPollingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn functional_dispatch_advances_offset_and_skips_non_text_updates() {
        let server = MockServer::start();
        let (mut runtime, _) = runtime_for(&server);
        let non_text: TelegramUpdate =
            serde_json::from_value(json!({"update_id": 12})).expect("update");

        let dispatched = runtime.dispatch_updates(vec![update(10, 42, "hello"), non_text]);
        assert_eq!(dispatched, 1);
        assert_eq!(runtime.next_offset(), 13);
    }

    #[tokio::test]
    async fn integration_exec_notif_acknowledges_then_notifies() {
        let server = MockServer::start();
        let acknowledgement = server.mock(|when, then| {
            when.method(POST)
                .path("/bottelegram-token/sendMessage")
                .body_includes("Async exec started");
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"message_id": 1, "chat": {"id": 900}}
            }));
        });
        let completion = server.mock(|when, then| {
            when.method(POST)
                .path("/bottelegram-token/sendMessage")
                .body_includes("Async exec completed");
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"message_id": 2, "chat": {"id": 900}}
            }));
        });
        let (mut runtime, store) = runtime_for(&server);

        runtime.dispatch_updates(vec![update(1, 42, "/exec_notif web-0 default echo ok")]);
        for _ in 0..200 {
            if completion.calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        acknowledgement.assert();
        completion.assert();
        let jobs = store.list_for_user(42).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output.as_deref(), Some("echo ok"));
    }

    #[tokio::test]
    async fn integration_run_backs_off_on_poll_errors_and_stops_on_shutdown() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path("/bottelegram-token/getUpdates");
            then.status(502).body("bad gateway");
        });
        let (mut runtime, _) = runtime_for(&server);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move { runtime.run(shutdown_rx).await });
        for _ in 0..200 {
            if failing.calls() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failing.calls() >= 2);

        shutdown_tx.send(true).expect("signal shutdown");
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("runtime stops")
            .expect("join")
            .expect("run result");
    }
}
