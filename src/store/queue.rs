//! Retry buffer in front of an [`AlertStore`]
//!
//! A failed save never drops the record: it stays buffered and is retried, in
//! order, on the next persisted event once the backoff has elapsed, and
//! unconditionally on [`PersistQueue::flush`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use super::{AlertStore, StoreError};
use crate::alerts::AlertRecord;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Consecutive failures at which logging escalates to `error!`
pub const ESCALATE_AFTER: u32 = 3;

/// Oldest records are dropped past this many buffered entries
const MAX_BUFFERED: usize = 10_000;

/// Result of handing a record to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The record and everything buffered before it reached the store
    Saved,
    /// The record is buffered for a later retry
    Deferred { buffered: usize },
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<AlertRecord>,
    failures: u32,
    retry_at: Option<Instant>,
}

pub struct PersistQueue {
    store: Arc<dyn AlertStore>,
    state: Mutex<QueueState>,
}

/// Delay before the next attempt after `failures` consecutive failures
pub fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    BASE_BACKOFF.saturating_mul(1 << exp).min(MAX_BACKOFF)
}

fn jittered(delay: Duration) -> Duration {
    let spread = (delay.as_millis() / 10) as u64;
    let jitter = rand::thread_rng().gen_range(0..=spread);
    (delay + Duration::from_millis(jitter)).min(MAX_BACKOFF)
}

impl PersistQueue {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Persist one record, retrying anything buffered first
    pub fn persist(&self, record: AlertRecord) -> PersistOutcome {
        self.persist_at(record, Instant::now())
    }

    pub fn persist_at(&self, record: AlertRecord, now: Instant) -> PersistOutcome {
        let mut state = self.state.lock();

        if state.pending.len() >= MAX_BUFFERED {
            if let Some(dropped) = state.pending.pop_front() {
                tracing::error!(
                    record_id = %dropped.record_id,
                    alert_id = %dropped.alert_id,
                    "Persist buffer full, dropping oldest alert record"
                );
            }
        }
        state.pending.push_back(record);

        if state.retry_at.map_or(false, |at| now < at) {
            return PersistOutcome::Deferred {
                buffered: state.pending.len(),
            };
        }

        match self.drain(&mut state, now) {
            Ok(()) => PersistOutcome::Saved,
            Err(_) => PersistOutcome::Deferred {
                buffered: state.pending.len(),
            },
        }
    }

    fn drain(&self, state: &mut QueueState, now: Instant) -> Result<(), StoreError> {
        while let Some(record) = state.pending.front() {
            match self.store.save(record) {
                Ok(()) => {
                    if state.failures > 0 {
                        tracing::info!(
                            failures = state.failures,
                            "Alert store recovered"
                        );
                    }
                    state.pending.pop_front();
                    state.failures = 0;
                    state.retry_at = None;
                }
                Err(e) => {
                    state.failures = state.failures.saturating_add(1);
                    let delay = jittered(backoff(state.failures));
                    state.retry_at = Some(now + delay);

                    if state.failures >= ESCALATE_AFTER {
                        tracing::error!(
                            error = %e,
                            failures = state.failures,
                            buffered = state.pending.len(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Alert store keeps failing"
                        );
                    } else {
                        tracing::warn!(
                            error = %e,
                            failures = state.failures,
                            buffered = state.pending.len(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Failed to persist alert record, will retry"
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Retry everything now, ignoring backoff, then flush the store
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.drain(&mut state, Instant::now())?;
        drop(state);
        self.store.flush()
    }

    pub fn buffered(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().failures
    }
}
