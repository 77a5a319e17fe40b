//! lodestone-relay daemon entrypoint.
//! Loads config, restores the category stores, starts the polling scheduler
//! and the optional metrics endpoint, and stops cleanly on Ctrl-C/SIGTERM.

use std::sync::Arc;

use lodestone_relay::config::load_config_default;
use lodestone_relay::dispatch::{discord::DiscordSender, LogSender, Sender};
use lodestone_relay::ingest::providers::lodestone::LodestoneProvider;
use lodestone_relay::metrics::Metrics;
use lodestone_relay::routes::FileRoutes;
use lodestone_relay::{build_relay, init_tracing, spawn_scheduler};
use tokio::sync::watch;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, initiating graceful shutdown"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default()?;
    tracing::info!(?cfg, "config loaded");

    let sender: Arc<dyn Sender> = match DiscordSender::from_env() {
        Some(d) => Arc::new(d.with_timeout(cfg.send_timeout_secs)),
        None => {
            tracing::warn!("DISCORD_BOT_TOKEN not set, notifications go to the log");
            Arc::new(LogSender)
        }
    };
    let source = Arc::new(LodestoneProvider::from_url(cfg.source_url.clone()).with_page_size(cfg.page_size));
    let routes = Arc::new(FileRoutes::new(cfg.routes_path.clone()));

    let relay = build_relay(&cfg, source, routes, sender).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_task = match cfg.metrics_addr.clone() {
        Some(addr) => {
            let metrics = Metrics::init(cfg.poll_interval_secs, cfg.reminder_lead_secs)?;
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = metrics.serve(&addr, rx).await {
                    tracing::error!(error = ?e, "metrics endpoint stopped");
                }
            }))
        }
        None => None,
    };

    let scheduler = spawn_scheduler(relay, cfg.poll_interval(), shutdown_rx);

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "scheduler task failed");
    }
    if let Some(t) = metrics_task {
        let _ = t.await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}
