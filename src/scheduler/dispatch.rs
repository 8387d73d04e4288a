//! Notification worker
//!
//! Receives alert events from the pipeline and delivers each one on its own
//! task so a slow channel never holds up the next event.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::alerts::{AlertEvent, AlertTracker};
use crate::notify::{ChannelConfig, Dispatcher, Notification};

#[derive(Clone)]
pub struct DispatchContext {
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Swapped on reload
    pub channels: Arc<RwLock<Vec<ChannelConfig>>>,
    pub tracker: Arc<AlertTracker>,
    pub hostname: String,
}

/// Run until every event sender is dropped and in-flight sends finish
pub async fn run(mut events: mpsc::Receiver<AlertEvent>, ctx: DispatchContext) {
    let mut inflight = JoinSet::new();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Some(event) => {
                    inflight.spawn(deliver(ctx.clone(), event));
                }
                None => break,
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                log_join(joined);
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        log_join(joined);
    }
    tracing::debug!("Dispatch worker stopped");
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Notification task panicked");
    }
}

/// Send one event to every enabled channel
pub async fn deliver(ctx: DispatchContext, event: AlertEvent) {
    let notification = Notification::from_event(&event, &ctx.hostname);
    let channels = ctx.channels.read().clone();

    let report = ctx.dispatcher.send(&notification, &channels).await;
    let failed = report.failures().count();

    if report.any_succeeded() {
        if event.is_fired() {
            let alert = event.alert();
            ctx.tracker.mark_notified(&alert.key, &alert.id);
        }
        tracing::info!(
            alert_id = %event.alert().id,
            title = %notification.title,
            delivered = report.outcomes.len() - failed,
            failed,
            "Notification sent"
        );
    } else if !report.is_empty() {
        tracing::error!(
            alert_id = %event.alert().id,
            title = %notification.title,
            failed,
            "Notification failed on every channel"
        );
    }
}
