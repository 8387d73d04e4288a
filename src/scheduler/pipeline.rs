//! Sample -> evaluate -> track -> persist -> dispatch

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::alerts::{AlertEvent, AlertRecord, AlertTracker};
use crate::config::MonitorConfig;
use crate::monitors::{MetricSource, Sample};
use crate::store::queue::PersistOutcome;
use crate::store::PersistQueue;

/// Everything a tick needs, shared by all monitor tasks and the sweeper
pub struct Pipeline {
    source: Arc<dyn MetricSource>,
    tracker: Arc<AlertTracker>,
    queue: Arc<PersistQueue>,
    events: mpsc::Sender<AlertEvent>,
    hostname: String,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MetricSource>,
        tracker: Arc<AlertTracker>,
        queue: Arc<PersistQueue>,
        events: mpsc::Sender<AlertEvent>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            source,
            tracker,
            queue,
            events,
            hostname: hostname.into(),
        }
    }

    /// Sample every target of `monitor` in order and act on the transitions
    pub async fn run_tick(&self, monitor: &MonitorConfig) -> Vec<AlertEvent> {
        let mut emitted = Vec::new();

        for target in monitor.targets() {
            let result = self.source.sample(monitor, target.as_deref()).await;
            let now = Utc::now();

            let events = match result {
                Ok(value) => {
                    let sample = Sample::new(monitor.kind, target.clone(), value, now);
                    self.tracker.observe(monitor, &sample, now)
                }
                Err(e) => {
                    tracing::warn!(
                        monitor = %monitor.kind,
                        target = target.as_deref().unwrap_or("-"),
                        error = %e,
                        "Metric collection failed"
                    );
                    self.tracker
                        .record_failure(monitor.kind, target.as_deref(), now)
                        .into_iter()
                        .collect()
                }
            };

            // Finish this target's side effects before sampling the next one
            self.publish(&events).await;
            emitted.extend(events);
        }

        emitted
    }

    /// Auto-resolve silent alerts
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let events = self.tracker.sweep(now);
        self.publish(&events).await;
        events
    }

    /// Persist each event, then hand it to the dispatch worker
    pub async fn publish(&self, events: &[AlertEvent]) {
        for event in events {
            self.persist(event).await;

            if self.events.send(event.clone()).await.is_err() {
                tracing::debug!(
                    alert_id = %event.alert().id,
                    "Dispatch worker gone, notification skipped"
                );
            }
        }
    }

    async fn persist(&self, event: &AlertEvent) {
        let record = AlertRecord::from_event(event, &self.hostname);
        let alert_id = record.alert_id.clone();
        let queue = Arc::clone(&self.queue);

        // Awaited, never cancelled: the tick does not move on until the write is done
        match tokio::task::spawn_blocking(move || queue.persist(record)).await {
            Ok(PersistOutcome::Saved) => {
                tracing::debug!(alert_id = %alert_id, "Alert record persisted");
            }
            Ok(PersistOutcome::Deferred { buffered }) => {
                tracing::debug!(alert_id = %alert_id, buffered, "Alert record buffered for retry");
            }
            Err(e) => {
                tracing::error!(alert_id = %alert_id, error = %e, "Persistence task failed");
            }
        }
    }
}
