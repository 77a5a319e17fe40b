// src/dispatch/mod.rs
pub mod discord;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::routes::RouteRegistry;
use crate::tracker::Signal;
pub use render::{render, RenderedPayload};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivered {
    pub message_id: Option<String>,
}

/// Destination platform client. Rate limiting and retries live below this.
#[async_trait::async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, channel_id: u64, payload: &RenderedPayload) -> Result<Delivered>;
    fn name(&self) -> &'static str;
}

/// Logs payloads instead of delivering them (staging, demos).
#[derive(Debug, Default, Clone)]
pub struct LogSender;

#[async_trait::async_trait]
impl Sender for LogSender {
    async fn send(&self, channel_id: u64, payload: &RenderedPayload) -> Result<Delivered> {
        tracing::info!(
            channel_id,
            kind = payload.kind.as_str(),
            category = %payload.category,
            headline = %payload.headline,
            title = %payload.title,
            url = %payload.url,
            "notification (log sender)"
        );
        Ok(Delivered::default())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub signals: usize,
    pub sent: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Signals dropped because dispatch is disabled or routes could not be read.
    pub skipped: usize,
    pub abandoned: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, o: DispatchReport) {
        self.signals += o.signals;
        self.sent += o.sent;
        self.failed += o.failed;
        self.timed_out += o.timed_out;
        self.skipped += o.skipped;
        self.abandoned += o.abandoned;
    }
}

enum SendOutcome {
    Sent,
    Failed,
    TimedOut,
}

pub struct Dispatcher {
    routes: Arc<dyn RouteRegistry>,
    sender: Arc<dyn Sender>,
    send_timeout: Duration,
    enabled: bool,
}

impl Dispatcher {
    pub fn new(routes: Arc<dyn RouteRegistry>, sender: Arc<dyn Sender>, send_timeout: Duration) -> Self {
        Self {
            routes,
            sender,
            send_timeout,
            enabled: true,
        }
    }

    /// With dispatch off, signals are logged and dropped.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deliver `signals` in order. Each signal fans out to the routes of
    /// its category concurrently; one failing destination never affects
    /// another or the next signal. Once `shutdown` flips to true the
    /// in-flight sends are abandoned and the rest is skipped.
    pub async fn dispatch(&self, signals: Vec<Signal>, shutdown: &watch::Receiver<bool>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for signal in signals {
            report.signals += 1;
            let item = signal.item();
            counter!("relay_signals_total", "kind" => signal.kind().as_str()).increment(1);

            if !self.enabled {
                tracing::debug!(
                    kind = signal.kind().as_str(),
                    category = %item.category,
                    source_key = %item.source_key,
                    "dispatch disabled, dropping signal"
                );
                report.skipped += 1;
                continue;
            }
            if *shutdown.borrow() {
                report.abandoned += 1;
                continue;
            }

            let routes = match self.routes.routes_for(item.category).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(
                        category = %item.category,
                        source_key = %item.source_key,
                        error = ?e,
                        "route lookup failed, skipping signal"
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            if routes.is_empty() {
                continue;
            }

            let payload = Arc::new(render(&signal));
            let mut set = JoinSet::new();
            for route in routes {
                let sender = self.sender.clone();
                let payload = payload.clone();
                let timeout = self.send_timeout;
                set.spawn(async move {
                    let res = tokio::time::timeout(timeout, sender.send(route.channel_id, &payload)).await;
                    match res {
                        Ok(Ok(_)) => SendOutcome::Sent,
                        Ok(Err(e)) => {
                            tracing::warn!(
                                guild_id = route.guild_id,
                                channel_id = route.channel_id,
                                url = %payload.url,
                                error = ?e,
                                "send failed"
                            );
                            SendOutcome::Failed
                        }
                        Err(_) => {
                            tracing::warn!(
                                guild_id = route.guild_id,
                                channel_id = route.channel_id,
                                url = %payload.url,
                                ?timeout,
                                "send timed out"
                            );
                            SendOutcome::TimedOut
                        }
                    }
                });
            }

            let mut stop = shutdown.clone();
            let interrupted = tokio::select! {
                _ = collect(&mut set, &mut report) => false,
                _ = wait_for_shutdown(&mut stop) => true,
            };
            if interrupted {
                report.abandoned += set.len();
                set.abort_all();
                tracing::info!(source_key = %item.source_key, "shutdown, abandoning in-flight sends");
            }
        }

        counter!("relay_send_ok_total").increment(report.sent as u64);
        counter!("relay_send_failed_total").increment((report.failed + report.timed_out) as u64);
        report
    }
}

async fn collect(set: &mut JoinSet<SendOutcome>, report: &mut DispatchReport) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(SendOutcome::Sent) => report.sent += 1,
            Ok(SendOutcome::Failed) => report.failed += 1,
            Ok(SendOutcome::TimedOut) => report.timed_out += 1,
            Err(e) => {
                tracing::warn!(error = %e, "send task panicked");
                report.failed += 1;
            }
        }
    }
}

/// Resolves once shutdown is requested; never resolves if the sender side is gone.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
