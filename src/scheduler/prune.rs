use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time;

use crate::config::PruningConfig;
use crate::store::{AlertStore, RetentionPolicy, StoreError};

/// Retention worker that periodically trims alert history
pub struct PruneWorker {
    store: Arc<dyn AlertStore>,
    policy: RetentionPolicy,
    interval: Duration,
    running: AtomicBool,
}

impl PruneWorker {
    pub fn new(store: Arc<dyn AlertStore>, config: &PruningConfig) -> Self {
        Self {
            store,
            policy: RetentionPolicy::from(config),
            interval: config.interval,
            running: AtomicBool::new(false),
        }
    }

    /// Prune once; also used by the `prune` command
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.store.prune(&self.policy, now)?;
        if removed > 0 {
            tracing::info!(
                removed,
                max_age_days = self.policy.max_age.num_days(),
                max_alerts = self.policy.max_count,
                "Pruned alert history"
            );
        } else {
            tracing::debug!("Alert history within retention limits");
        }
        Ok(removed)
    }

    /// Start the background worker; the first pass runs immediately
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Prune worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {
                        let worker = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || worker.run_once(Utc::now())).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!(error = %e, "Pruning failed"),
                            Err(e) => tracing::error!(error = %e, "Pruning task failed"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            self.running.store(false, Ordering::SeqCst);
            tracing::info!("Prune worker stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
