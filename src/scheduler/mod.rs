//! Monitor scheduling
//!
//! One task per enabled monitor samples on the monitor's interval. A sweeper
//! auto-resolves silent alerts, a dispatch worker delivers notifications and
//! an optional prune worker trims history. All of them stop cooperatively.

pub mod dispatch;
pub mod pipeline;
pub mod prune;

pub use pipeline::Pipeline;
pub use prune::PruneWorker;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::alerts::AlertTracker;
use crate::config::{AppConfig, MonitorConfig};
use crate::monitors::MetricSource;
use crate::notify::{ChannelConfig, Dispatcher};
use crate::store::{AlertStore, HistoryFilter, PersistQueue, StoreError};
use dispatch::DispatchContext;

/// Events buffered between the pipeline and the dispatch worker
const EVENT_BUFFER: usize = 256;

/// Running monitor tasks of one configuration generation
struct MonitorSet {
    stop: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl MonitorSet {
    fn spawn(pipeline: &Arc<Pipeline>, monitors: &[MonitorConfig]) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for monitor in monitors.iter().filter(|m| m.enabled) {
            tasks.spawn(run_monitor(Arc::clone(pipeline), monitor.clone(), stop_rx.clone()));
        }

        Self { stop, tasks }
    }

    /// Signal every task and wait for in-flight ticks, up to `deadline`
    async fn stop(mut self, deadline: Option<Instant>) {
        let _ = self.stop.send(true);

        let drain = async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Monitor task panicked");
                }
            }
        };

        match deadline {
            Some(deadline) => {
                if time::timeout_at(deadline, drain).await.is_err() {
                    tracing::warn!(
                        remaining = self.tasks.len(),
                        "Monitor tasks still busy at shutdown deadline, aborting"
                    );
                    self.tasks.shutdown().await;
                }
            }
            None => drain.await,
        }
    }
}

async fn run_monitor(pipeline: Arc<Pipeline>, monitor: MonitorConfig, mut stop: watch::Receiver<bool>) {
    let mut ticker = time::interval(monitor.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        monitor = %monitor.kind,
        interval_secs = monitor.interval.as_secs(),
        threshold = monitor.threshold,
        alert_count = monitor.alert_count,
        "Monitor started"
    );

    while !*stop.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                // A started tick always runs to completion
                pipeline.run_tick(&monitor).await;
            }
            _ = stop.changed() => break,
        }
    }

    tracing::info!(monitor = %monitor.kind, "Monitor stopped");
}

async fn run_sweeper(pipeline: Arc<Pipeline>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = pipeline.sweep(Utc::now()).await;
                if !events.is_empty() {
                    tracing::debug!(resolved = events.len(), "Sweep auto-resolved alerts");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Owns every background task of a running daemon
pub struct Scheduler {
    config: Arc<RwLock<AppConfig>>,
    pipeline: Arc<Pipeline>,
    tracker: Arc<AlertTracker>,
    queue: Arc<PersistQueue>,
    channels: Arc<RwLock<Vec<ChannelConfig>>>,
    monitors: Mutex<Option<MonitorSet>>,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
    prune: Option<Arc<PruneWorker>>,
    dispatch: JoinHandle<()>,
}

impl Scheduler {
    /// Restore tracked alerts from `store` and start every task
    pub async fn start(
        config: AppConfig,
        source: Arc<dyn MetricSource>,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<dyn AlertStore>,
        hostname: String,
    ) -> Result<Self, StoreError> {
        let tracker = Arc::new(AlertTracker::new(&config.monitors));

        let history = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || store.list(&HistoryFilter::all()))
                .await
                .map_err(|e| StoreError::Worker(e.to_string()))??
        };
        let restored = tracker.restore(&history, Utc::now());
        if restored > 0 {
            tracing::info!(restored, "Restored active alerts from history");
        }

        let queue = Arc::new(PersistQueue::new(Arc::clone(&store)));
        let channels = Arc::new(RwLock::new(config.active_channels()));
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let dispatch = tokio::spawn(dispatch::run(
            events_rx,
            DispatchContext {
                dispatcher,
                channels: Arc::clone(&channels),
                tracker: Arc::clone(&tracker),
                hostname: hostname.clone(),
            },
        ));

        let pipeline = Arc::new(Pipeline::new(
            source,
            Arc::clone(&tracker),
            Arc::clone(&queue),
            events_tx,
            hostname,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut background = vec![tokio::spawn(run_sweeper(
            Arc::clone(&pipeline),
            config.scheduler.sweep_interval,
            shutdown_rx.clone(),
        ))];

        let prune = config.storage.pruning.enabled.then(|| {
            let worker = Arc::new(PruneWorker::new(Arc::clone(&store), &config.storage.pruning));
            background.push(Arc::clone(&worker).start(shutdown_rx));
            worker
        });

        let monitors = MonitorSet::spawn(&pipeline, &config.monitors);
        tracing::info!(
            monitors = monitors.tasks.len(),
            channels = channels.read().len(),
            pruning = prune.is_some(),
            "Scheduler started"
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            pipeline,
            tracker,
            queue,
            channels,
            monitors: Mutex::new(Some(monitors)),
            shutdown_tx,
            background,
            prune,
            dispatch,
        })
    }

    pub fn tracker(&self) -> Arc<AlertTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn store(&self) -> Arc<dyn AlertStore> {
        Arc::clone(self.queue.store())
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Shared view of the live configuration, updated on reload
    pub fn config_handle(&self) -> Arc<RwLock<AppConfig>> {
        Arc::clone(&self.config)
    }

    /// Swap in a new configuration.
    ///
    /// Monitor tasks finish their current tick and restart with the new
    /// settings. Storage and API settings only take effect after a restart.
    pub async fn reload(&self, config: AppConfig) {
        let mut monitors = self.monitors.lock().await;
        if let Some(current) = monitors.take() {
            current.stop(None).await;
        }

        {
            let previous = self.config.read();
            if previous.storage != config.storage || previous.api != config.api {
                tracing::warn!("Storage and API changes apply after a restart");
            }
        }

        self.tracker.apply_config(&config.monitors);
        *self.channels.write() = config.active_channels();

        let next = MonitorSet::spawn(&self.pipeline, &config.monitors);
        tracing::info!(monitors = next.tasks.len(), "Configuration reloaded");
        *monitors = Some(next);
        *self.config.write() = config;
    }

    /// Stop everything, waiting at most `grace` for in-flight work.
    ///
    /// Persistence writes already started always complete; buffered records
    /// get a final flush.
    pub async fn shutdown(self, grace: Duration) {
        let deadline = Instant::now() + grace;
        tracing::info!(grace_secs = grace.as_secs(), "Scheduler shutting down");

        if let Some(prune) = &self.prune {
            prune.stop();
        }
        let _ = self.shutdown_tx.send(true);

        if let Some(monitors) = self.monitors.lock().await.take() {
            monitors.stop(Some(deadline)).await;
        }

        for handle in self.background {
            let abort = handle.abort_handle();
            if time::timeout_at(deadline, handle).await.is_err() {
                abort.abort();
            }
        }

        // Last sender goes away with the pipeline; the worker then drains
        drop(self.pipeline);
        let abort = self.dispatch.abort_handle();
        if time::timeout_at(deadline, self.dispatch).await.is_err() {
            tracing::warn!("Notifications still in flight at shutdown deadline, dropped");
            abort.abort();
        }

        let queue = Arc::clone(&self.queue);
        match tokio::task::spawn_blocking(move || queue.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(
                error = %e,
                buffered = self.queue.buffered(),
                "Alert records could not be flushed"
            ),
            Err(e) => tracing::error!(error = %e, "Flush task failed"),
        }

        self.tracker.clear();
        tracing::info!("Scheduler stopped");
    }
}
