mod bootstrap_helpers;
mod cli_args;
mod health_server;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kubot_jobs::{start_job_reaper, InMemoryJobStore, JobRunner, JobStore};
use kubot_kube::KubectlDispatcher;
use kubot_telegram::{
    BotCommandRouter, TelegramApiClient, TelegramNotifier, TelegramPollingRuntime,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::health_server::start_health_server;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_bot(cli).await
}

async fn run_bot(cli: Cli) -> Result<()> {
    let client = TelegramApiClient::new(cli.telegram_api_config())?;
    let dispatcher = Arc::new(KubectlDispatcher::new(cli.kubectl_config())?);
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let runner = JobRunner::new(
        Arc::clone(&store),
        dispatcher.clone(),
        Arc::new(TelegramNotifier::new(client.clone())),
        cli.job_runner_config(),
    )?;
    let mut router_config = cli.router_config();
    if router_config.bot_username.is_none() {
        let me = client
            .get_me()
            .await
            .context("failed to resolve bot username with getMe")?;
        router_config.bot_username = me.username;
    }
    info!(
        bot_username = router_config.bot_username.as_deref().unwrap_or("unknown"),
        "resolved bot identity"
    );
    let router = BotCommandRouter::new(
        runner,
        dispatcher.clone(),
        cli.authorized_users.clone(),
        router_config,
    )?;
    let mut polling = TelegramPollingRuntime::new(client, Arc::new(router), cli.polling_config())?;

    let bind_addr = format!("{}:{}", cli.health_check_bind, cli.health_check_port)
        .parse::<SocketAddr>()
        .with_context(|| {
            format!(
                "invalid health server address '{}:{}'",
                cli.health_check_bind, cli.health_check_port
            )
        })?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_, health_task) =
        start_health_server(bind_addr, dispatcher.clone(), shutdown_rx.clone()).await?;
    let mut reaper = start_job_reaper(Arc::clone(&store), cli.reaper_config())?;
    let mut polling_task = tokio::spawn(async move { polling.run(shutdown_rx).await });
    info!(
        authorized_users = cli.authorized_users.len(),
        "kubot started"
    );

    let polling_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            (&mut polling_task).await
        }
        finished = &mut polling_task => {
            warn!("telegram polling ended before shutdown was requested");
            let _ = shutdown_tx.send(true);
            finished
        }
    };

    reaper.shutdown().await;
    health_task
        .await
        .context("health server task panicked")??;
    polling_result.context("telegram polling task panicked")??;

    let counts = store.counts().await;
    info!(
        pending = counts.pending,
        running = counts.running,
        "kubot stopped"
    );
    Ok(())
}
