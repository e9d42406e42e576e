use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod bot;
mod config;
mod dashboard;
mod ledger;
mod live_scores;
mod notify;

use bot::retry::RetryPolicy;
use bot::LifecycleEngine;
use config::Config;
use dashboard::AppState;
use ledger::{Ledger, SqliteLedger};
use live_scores::{SnapshotSource, SofascoreSource};
use notify::{LogNotifier, Notifier, TelegramNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    let settings = config.engine_settings()?;

    // Open ledger
    let ledger: Arc<dyn Ledger> = Arc::new(
        SqliteLedger::open(&config.database_path)
            .with_context(|| format!("Failed to open ledger at {}", config.database_path))?,
    );
    let open_now = ledger.list_open_alerts()?;
    info!(
        "Ledger opened: {} ({} open alert(s))",
        config.database_path,
        open_now.len()
    );

    // Snapshot source; an unreachable feed at startup is fatal
    let source = SofascoreSource::new(
        &config.scores_api_url,
        Duration::from_secs(config.scores_timeout_secs),
    )?;
    let live = source
        .list_live()
        .await
        .with_context(|| format!("Scores API unreachable at {}", config.scores_api_url))?;
    info!("{} reachable, {} live match(es)", source.name(), live.len());

    let notifier: Arc<dyn Notifier> = match (&config.telegram_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Arc::new(TelegramNotifier::new(
            token,
            chat_id,
            RetryPolicy::new(config.notify_max_retries, config.backoff_unit()),
        )?),
        _ => {
            warn!("Telegram not configured; notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };
    info!("Notifications via {}", notifier.name());

    // Optional status API
    if let Some(addr) = &config.dashboard_addr {
        let addr: SocketAddr = addr.parse()?;
        let app = dashboard::router(AppState {
            ledger: ledger.clone(),
            staking: settings.staking,
        });
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Status API listening on http://{}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Status API stopped: {}", e);
            }
        });
    }

    info!(
        "Trigger minutes {:?}, qualifying scores {:?}, base stake {:.2}, max chase level {}",
        config.trigger_minutes, config.qualifying_scores, config.base_stake, config.max_chase_level
    );
    notifier.send(&notify::messages::startup()).await;

    let mut engine = LifecycleEngine::new(ledger, Box::new(source), notifier, settings);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Cannot listen for shutdown signal: {}", e);
                // Keep the sender alive so the loop never sees a closed channel
                std::future::pending::<()>().await;
            }
        }
    });

    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    loop {
        let report = engine.run_cycle().await;
        if report.opened + report.resolved + report.sweep.resolved > 0 || report.errors > 0 {
            info!(
                "Cycle: {} live, {} opened, {} resolved, {} swept, {} error(s)",
                report.live, report.opened, report.resolved, report.sweep.resolved, report.errors
            );
        }

        // Only the sleep between cycles is interruptible
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    engine.shutdown().await?;
    info!("Ledger flushed, bye");
    Ok(())
}
