//! Per-key alert state machine
//!
//! Every `(monitor kind, sub-target)` pair owns one slot. A slot moves
//! NONE -> PENDING -> ACTIVE -> RESOLVED -> NONE as samples arrive:
//!
//! - a breach opens a PENDING alert, and `alert_count` consecutive breaches
//!   promote it to ACTIVE, emitting [`AlertEvent::Fired`] exactly once;
//! - a non-breach discards a PENDING alert silently, or resolves an ACTIVE one
//!   with [`AlertEvent::Resolved`];
//! - [`AlertTracker::sweep`] resolves ACTIVE alerts that stopped receiving
//!   samples for longer than the monitor's `resolve_after` window.
//!
//! The tracker never performs I/O. Callers persist and dispatch the returned
//! events. Every method takes `now` so transitions are reproducible.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::evaluator;
use super::model::{Alert, AlertEvent, AlertKey, AlertRecord, AlertSource, AlertStatus, ResolveReason};
use crate::config::monitor::DEFAULT_RESOLVE_INTERVALS;
use crate::config::MonitorConfig;
use crate::monitors::{MonitorKind, Sample};

/// Consecutive collection failures before a collector alert fires
pub const COLLECTOR_FAILURE_LIMIT: u32 = 3;

const FALLBACK_RESOLVE_AFTER: Duration = Duration::from_secs(60 * DEFAULT_RESOLVE_INTERVALS as u64);

type TargetId = (MonitorKind, Option<String>);

#[derive(Debug, Clone, Copy)]
struct FailureStreak {
    count: u32,
    since: DateTime<Utc>,
}

/// Owns every in-memory alert for the lifetime of a scheduler session
pub struct AlertTracker {
    alerts: DashMap<AlertKey, Alert>,
    failures: DashMap<TargetId, FailureStreak>,
    /// Latest configuration per monitor kind
    monitors: RwLock<HashMap<MonitorKind, MonitorConfig>>,
}

impl AlertTracker {
    pub fn new(monitors: &[MonitorConfig]) -> Self {
        Self {
            alerts: DashMap::new(),
            failures: DashMap::new(),
            monitors: RwLock::new(monitors.iter().map(|m| (m.kind, m.clone())).collect()),
        }
    }

    /// Feed one successful sample through the state machine
    pub fn observe(&self, monitor: &MonitorConfig, sample: &Sample, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        if let Some(event) = self.record_success(sample.kind, sample.target.as_deref(), now) {
            events.push(event);
        }

        let breached = evaluator::breached(sample.value, monitor.threshold, monitor.kind);
        let key = AlertKey::threshold(sample.kind, sample.target.clone());

        tracing::trace!(
            alert = %key,
            value = sample.value,
            threshold = monitor.threshold,
            breached,
            "Observed sample"
        );

        if let Some(event) = self.transition(key, monitor, sample.value, breached, now) {
            events.push(event);
        }

        events
    }

    fn transition(
        &self,
        key: AlertKey,
        monitor: &MonitorConfig,
        value: f64,
        breached: bool,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        match self.alerts.entry(key) {
            Entry::Vacant(slot) => {
                if !breached {
                    return None;
                }

                let mut alert = Alert::pending(slot.key().clone(), value, monitor.threshold, now);
                if monitor.alert_count <= 1 {
                    alert.activate(now);
                    tracing::warn!(alert = %alert.key, value, "Alert fired");
                    let event = AlertEvent::Fired(alert.clone());
                    slot.insert(alert);
                    return Some(event);
                }

                tracing::debug!(
                    alert = %alert.key,
                    value,
                    required = monitor.alert_count,
                    "Threshold breached, alert pending"
                );
                slot.insert(alert);
                None
            }
            Entry::Occupied(mut slot) => {
                let alert = slot.get_mut();
                alert.last_seen_at = now;
                if value.is_finite() {
                    alert.last_value = value;
                }

                match (alert.status, breached) {
                    (AlertStatus::Pending, true) => {
                        alert.consecutive_breaches += 1;
                        alert.threshold = monitor.threshold;

                        if alert.consecutive_breaches >= monitor.alert_count {
                            alert.activate(now);
                            tracing::warn!(
                                alert = %alert.key,
                                value,
                                breaches = alert.consecutive_breaches,
                                "Alert fired"
                            );
                            Some(AlertEvent::Fired(alert.clone()))
                        } else {
                            tracing::debug!(
                                alert = %alert.key,
                                breaches = alert.consecutive_breaches,
                                required = monitor.alert_count,
                                "Threshold breached, alert pending"
                            );
                            None
                        }
                    }
                    (AlertStatus::Pending, false) => {
                        let alert = slot.remove();
                        tracing::debug!(
                            alert = %alert.key,
                            breaches = alert.consecutive_breaches,
                            "Pending alert cleared before firing"
                        );
                        None
                    }
                    (AlertStatus::Active, true) => None,
                    (AlertStatus::Active, false) => {
                        let mut alert = slot.remove();
                        alert.resolve(now);
                        tracing::info!(alert = %alert.key, value, "Alert resolved");
                        Some(AlertEvent::Resolved {
                            alert,
                            reason: ResolveReason::Recovered,
                        })
                    }
                    (AlertStatus::Resolved, _) => {
                        // Resolved alerts leave the table immediately; treat a
                        // leftover as a free slot.
                        let key = slot.key().clone();
                        slot.remove();
                        self.transition(key, monitor, value, breached, now)
                    }
                }
            }
        }
    }

    /// Count a collection failure. The threshold slot is left untouched.
    pub fn record_failure(
        &self,
        kind: MonitorKind,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let streak = {
            let mut entry = self
                .failures
                .entry((kind, target.map(str::to_string)))
                .or_insert(FailureStreak { count: 0, since: now });
            entry.count = entry.count.saturating_add(1);
            *entry
        };

        if streak.count < COLLECTOR_FAILURE_LIMIT {
            return None;
        }

        let key = AlertKey::collector(kind, target.map(str::to_string));
        match self.alerts.entry(key) {
            Entry::Vacant(slot) => {
                let mut alert = Alert::pending(
                    slot.key().clone(),
                    streak.count as f64,
                    COLLECTOR_FAILURE_LIMIT as f64,
                    streak.since,
                );
                alert.consecutive_breaches = streak.count;
                alert.last_seen_at = now;
                alert.activate(now);
                tracing::error!(
                    alert = %alert.key,
                    failures = streak.count,
                    "Collector failing repeatedly"
                );
                let event = AlertEvent::Fired(alert.clone());
                slot.insert(alert);
                Some(event)
            }
            Entry::Occupied(mut slot) => {
                let alert = slot.get_mut();
                alert.consecutive_breaches = streak.count;
                alert.last_value = streak.count as f64;
                alert.last_seen_at = now;
                None
            }
        }
    }

    /// Reset the failure streak and resolve any collector alert for the target
    fn record_success(&self, kind: MonitorKind, target: Option<&str>, now: DateTime<Utc>) -> Option<AlertEvent> {
        let id = (kind, target.map(str::to_string));
        // A collector alert may exist without a streak after reload or restore
        self.failures.remove(&id);

        let (_, mut alert) = self.alerts.remove(&AlertKey::collector(id.0, id.1))?;
        alert.last_value = 0.0;
        alert.resolve(now);
        tracing::info!(alert = %alert.key, "Collector recovered");
        Some(AlertEvent::Resolved {
            alert,
            reason: ResolveReason::Recovered,
        })
    }

    /// End of the alert's resolution window
    fn deadline(&self, alert: &Alert) -> DateTime<Utc> {
        chrono::Duration::from_std(self.resolve_after(alert.key.kind))
            .ok()
            .and_then(|window| alert.last_seen_at.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn expired(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        now > self.deadline(alert)
    }

    fn resolve_after(&self, kind: MonitorKind) -> Duration {
        self.monitors
            .read()
            .get(&kind)
            .map(|m| m.resolve_after)
            .unwrap_or(FALLBACK_RESOLVE_AFTER)
    }

    /// Auto-resolve ACTIVE alerts whose samples stopped arriving.
    ///
    /// The alert's `resolved_at` is the moment its window expired, i.e. the
    /// last observation plus `resolve_after`. Stale PENDING alerts are dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let expired: Vec<AlertKey> = self
            .alerts
            .iter()
            .filter(|entry| self.expired(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut events = Vec::new();
        for key in expired {
            // Re-check under the shard lock: a sample may have arrived meanwhile
            let removed = self
                .alerts
                .remove_if(&key, |_, alert| self.expired(alert, now));

            let Some((_, mut alert)) = removed else {
                continue;
            };
            let deadline = self.deadline(&alert);

            match alert.status {
                AlertStatus::Active => {
                    alert.resolve(deadline);
                    tracing::info!(
                        alert = %alert.key,
                        last_seen = %alert.last_seen_at,
                        "Alert auto-resolved, no samples within resolution window"
                    );
                    if alert.key.source == AlertSource::Collector {
                        self.failures.remove(&(alert.key.kind, alert.key.target.clone()));
                    }
                    events.push(AlertEvent::Resolved {
                        alert,
                        reason: ResolveReason::TimedOut,
                    });
                }
                AlertStatus::Pending | AlertStatus::Resolved => {
                    tracing::debug!(alert = %alert.key, "Dropped stale pending alert");
                }
            }
        }

        events
    }

    /// Adopt a new configuration.
    ///
    /// PENDING alerts of monitors whose detection settings changed are
    /// discarded so their counters restart; ACTIVE alerts keep their identity.
    pub fn apply_config(&self, monitors: &[MonitorConfig]) {
        let mut current = self.monitors.write();
        let mut changed = HashSet::new();

        let configured: HashSet<TargetId> = monitors
            .iter()
            .flat_map(|m| m.targets().into_iter().map(move |t| (m.kind, t)))
            .collect();
        self.failures.retain(|id, _| configured.contains(id));

        for monitor in monitors {
            if let Some(previous) = current.get(&monitor.kind) {
                if previous.detection_changed(monitor) {
                    changed.insert(monitor.kind);
                }
            }
            current.insert(monitor.kind, monitor.clone());
        }
        drop(current);

        if changed.is_empty() {
            return;
        }

        let before = self.alerts.len();
        self.alerts
            .retain(|key, alert| !(changed.contains(&key.kind) && alert.status == AlertStatus::Pending));
        self.failures.retain(|(kind, _), _| !changed.contains(kind));

        tracing::info!(
            monitors = ?changed,
            discarded = before - self.alerts.len(),
            "Configuration changed, pending alerts reset"
        );
    }

    /// Re-adopt ACTIVE alerts from persisted history (records newest first).
    ///
    /// Returns the number of alerts restored.
    pub fn restore(&self, records: &[AlertRecord], now: DateTime<Utc>) -> usize {
        let mut seen = HashSet::new();
        let mut restored = 0;

        for record in records {
            let key = record.key();
            if !seen.insert(key.clone()) || record.status != AlertStatus::Active {
                continue;
            }

            if let Entry::Vacant(slot) = self.alerts.entry(key) {
                slot.insert(Alert {
                    id: record.alert_id.clone(),
                    key: record.key(),
                    status: AlertStatus::Active,
                    first_breach_at: record.first_breach_at,
                    triggered_at: record.triggered_at,
                    resolved_at: None,
                    consecutive_breaches: record.consecutive_breaches,
                    last_value: record.last_value,
                    threshold: record.threshold,
                    notified: true,
                    last_seen_at: now,
                });
                restored += 1;
            }
        }

        restored
    }

    /// Record that a notification went out for this alert's episode
    pub fn mark_notified(&self, key: &AlertKey, alert_id: &str) -> bool {
        match self.alerts.get_mut(key) {
            Some(mut alert) if alert.id == alert_id => {
                alert.notified = true;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &AlertKey) -> Option<Alert> {
        self.alerts.get(key).map(|a| a.clone())
    }

    /// ACTIVE alerts, oldest trigger first
    pub fn active(&self) -> Vec<Alert> {
        self.with_status(AlertStatus::Active)
    }

    pub fn pending(&self) -> Vec<Alert> {
        self.with_status(AlertStatus::Pending)
    }

    fn with_status(&self, status: AlertStatus) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.status == status)
            .map(|a| a.clone())
            .collect();
        alerts.sort_by(|a, b| {
            a.triggered_at
                .cmp(&b.triggered_at)
                .then(a.first_breach_at.cmp(&b.first_breach_at))
                .then(a.key.cmp(&b.key))
        });
        alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Drop all state at the end of a session
    pub fn clear(&self) {
        self.alerts.clear();
        self.failures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cpu_config(threshold: f64, alert_count: u32) -> MonitorConfig {
        let mut config = MonitorConfig::defaults(MonitorKind::Cpu);
        config.threshold = threshold;
        config.alert_count = alert_count;
        config.interval = Duration::from_secs(60);
        config.resolve_after = Duration::from_secs(300);
        config
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(kind: MonitorKind, target: Option<&str>, value: f64, t: DateTime<Utc>) -> Sample {
        Sample::new(kind, target.map(str::to_string), value, t)
    }

    /// Feed values one minute apart; returns (sample index, event) pairs
    fn feed(tracker: &AlertTracker, config: &MonitorConfig, values: &[f64]) -> Vec<(usize, AlertEvent)> {
        values
            .iter()
            .enumerate()
            .flat_map(|(i, v)| {
                let t = at(i as i64 * 60);
                tracker
                    .observe(config, &sample(config.kind, None, *v, t), t)
                    .into_iter()
                    .map(move |e| (i, e))
            })
            .collect()
    }

    #[test]
    fn test_fires_after_exactly_n_breaches() {
        let config = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[config.clone()]);

        let events = feed(&tracker, &config, &[85.0, 85.0, 85.0]);

        assert_eq!(events.len(), 1);
        let (index, event) = &events[0];
        assert_eq!(*index, 2);
        assert!(event.is_fired());
        assert_eq!(event.alert().consecutive_breaches, 3);
        assert_eq!(event.alert().triggered_at, Some(at(120)));
        assert_eq!(event.alert().first_breach_at, at(0));
    }

    #[test]
    fn test_blip_resets_counter() {
        let config = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[config.clone()]);

        let events = feed(&tracker, &config, &[85.0, 85.0, 70.0, 85.0, 85.0, 85.0]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 5);
        assert!(events[0].1.is_fired());
        assert_eq!(events[0].1.alert().first_breach_at, at(180));
    }

    #[test]
    fn test_n_minus_one_then_clear_emits_nothing() {
        let config = cpu_config(80.0, 4);
        let tracker = AlertTracker::new(&[config.clone()]);

        let events = feed(&tracker, &config, &[90.0, 90.0, 90.0, 10.0]);

        assert!(events.is_empty());
        assert!(tracker.is_empty(), "pending slot must be freed");
    }

    #[test]
    fn test_sustained_breach_fires_once_and_resolves_once() {
        let config = cpu_config(80.0, 2);
        let tracker = AlertTracker::new(&[config.clone()]);

        let mut values = vec![95.0; 20];
        values.extend([50.0, 50.0, 50.0]);
        let events = feed(&tracker, &config, &values);

        let fired: Vec<_> = events.iter().filter(|(_, e)| e.is_fired()).collect();
        let resolved: Vec<_> = events.iter().filter(|(_, e)| !e.is_fired()).collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, 20);

        match &resolved[0].1 {
            AlertEvent::Resolved { alert, reason } => {
                assert_eq!(*reason, ResolveReason::Recovered);
                assert_eq!(alert.resolved_at, Some(at(20 * 60)));
                assert_eq!(alert.id, fired[0].1.alert().id);
                assert_eq!(alert.last_value, 50.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_alert_count_one_fires_immediately() {
        let config = cpu_config(80.0, 1);
        let tracker = AlertTracker::new(&[config.clone()]);

        let events = feed(&tracker, &config, &[81.0]);
        assert_eq!(events.len(), 1);
        assert!(events[0].1.is_fired());
        assert!(tracker.pending().is_empty());
        assert_eq!(tracker.active().len(), 1);
    }

    #[test]
    fn test_new_episode_gets_new_identity() {
        let config = cpu_config(80.0, 1);
        let tracker = AlertTracker::new(&[config.clone()]);

        let events = feed(&tracker, &config, &[90.0, 10.0, 90.0]);
        assert_eq!(events.len(), 3);
        assert_ne!(events[0].1.alert().id, events[2].1.alert().id);
    }

    #[test]
    fn test_sweep_auto_resolves_silent_alert() {
        let config = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[config.clone()]);
        feed(&tracker, &config, &[85.0, 85.0, 85.0]);
        let last_seen = at(120);

        // Inside the window nothing happens
        assert!(tracker.sweep(last_seen + chrono::Duration::seconds(300)).is_empty());

        let events = tracker.sweep(last_seen + chrono::Duration::seconds(301));
        assert_eq!(events.len(), 1);
        match &events[0] {
            AlertEvent::Resolved { alert, reason } => {
                assert_eq!(*reason, ResolveReason::TimedOut);
                assert_eq!(alert.resolved_at, Some(last_seen + chrono::Duration::seconds(300)));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Exactly once
        assert!(tracker.sweep(last_seen + chrono::Duration::seconds(900)).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_sweep_drops_stale_pending_silently() {
        let config = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[config.clone()]);
        feed(&tracker, &config, &[85.0]);

        assert!(tracker.sweep(at(3600)).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_sub_targets_tracked_independently() {
        let mut config = MonitorConfig::defaults(MonitorKind::Ping);
        config.threshold = 200.0;
        config.alert_count = 2;
        let tracker = AlertTracker::new(&[config.clone()]);

        let mut events = Vec::new();
        for i in 0..2 {
            let t = at(i * 60);
            events.extend(tracker.observe(&config, &sample(MonitorKind::Ping, Some("a.test"), 300.0, t), t));
            events.extend(tracker.observe(&config, &sample(MonitorKind::Ping, Some("b.test"), 20.0, t), t));
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key().target.as_deref(), Some("a.test"));
        assert!(tracker
            .get(&AlertKey::threshold(MonitorKind::Ping, Some("b.test".to_string())))
            .is_none());
    }

    #[test]
    fn test_collection_failures_leave_state_and_escalate() {
        let config = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[config.clone()]);
        feed(&tracker, &config, &[85.0, 85.0]);

        assert!(tracker.record_failure(MonitorKind::Cpu, None, at(180)).is_none());
        assert!(tracker.record_failure(MonitorKind::Cpu, None, at(240)).is_none());
        let fired = tracker.record_failure(MonitorKind::Cpu, None, at(300)).unwrap();
        assert!(fired.is_fired());
        assert_eq!(fired.key().source, AlertSource::Collector);
        assert_eq!(fired.alert().first_breach_at, at(180));
        assert!(tracker.record_failure(MonitorKind::Cpu, None, at(360)).is_none());

        // The threshold slot kept its count through the failures
        let pending = tracker.get(&AlertKey::threshold(MonitorKind::Cpu, None)).unwrap();
        assert_eq!(pending.consecutive_breaches, 2);

        // Next success resolves the collector alert and completes the breach run
        let t = at(420);
        let events = tracker.observe(&config, &sample(MonitorKind::Cpu, None, 90.0, t), t);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            AlertEvent::Resolved { alert, reason: ResolveReason::Recovered } if alert.key.source == AlertSource::Collector
        ));
        assert!(events[1].is_fired());
    }

    fn fail_until_fired(tracker: &AlertTracker, kind: MonitorKind, target: Option<&str>) -> AlertEvent {
        (0..COLLECTOR_FAILURE_LIMIT)
            .filter_map(|i| tracker.record_failure(kind, target, at(i as i64 * 60)))
            .next()
            .unwrap()
    }

    #[test]
    fn test_collector_alert_resolves_after_reload() {
        let config = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[config.clone()]);
        let fired = fail_until_fired(&tracker, MonitorKind::Cpu, None);

        let mut changed = config.clone();
        changed.threshold = 90.0;
        tracker.apply_config(&[changed.clone()]);

        let t = at(600);
        let events = tracker.observe(&changed, &sample(MonitorKind::Cpu, None, 10.0, t), t);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert().id, fired.alert().id);
        assert!(matches!(
            &events[0],
            AlertEvent::Resolved { reason: ResolveReason::Recovered, .. }
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_restored_collector_alert_resolves_on_success() {
        let config = cpu_config(80.0, 3);
        let source = AlertTracker::new(&[config.clone()]);
        let fired = fail_until_fired(&source, MonitorKind::Cpu, None);
        let record = AlertRecord::from_event(&fired, "host");

        let tracker = AlertTracker::new(&[config.clone()]);
        assert_eq!(tracker.restore(&[record.clone()], at(600)), 1);

        let t = at(660);
        let events = tracker.observe(&config, &sample(MonitorKind::Cpu, None, 10.0, t), t);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert().id, record.alert_id);
        assert_eq!(events[0].key().source, AlertSource::Collector);
        assert!(!events[0].is_fired());
    }

    #[test]
    fn test_removed_target_forgets_failure_streak() {
        let mut ping = MonitorConfig::defaults(MonitorKind::Ping);
        if let crate::config::MonitorParams::Ping { targets, .. } = &mut ping.params {
            *targets = vec!["a.test".to_string(), "b.test".to_string()];
        }
        let tracker = AlertTracker::new(&[ping.clone()]);
        for i in 0..2 {
            assert!(tracker.record_failure(MonitorKind::Ping, Some("b.test"), at(i * 60)).is_none());
        }

        let mut narrowed = ping.clone();
        if let crate::config::MonitorParams::Ping { targets, .. } = &mut narrowed.params {
            *targets = vec!["a.test".to_string()];
        }
        tracker.apply_config(&[narrowed.clone()]);
        tracker.apply_config(&[ping]);

        // The old streak is gone: two more failures are not enough
        for i in 2..4 {
            assert!(tracker.record_failure(MonitorKind::Ping, Some("b.test"), at(i * 60)).is_none());
        }
    }

    #[test]
    fn test_config_change_resets_pending_keeps_active() {
        let cpu = cpu_config(80.0, 3);
        let mut memory = MonitorConfig::defaults(MonitorKind::Memory);
        memory.alert_count = 1;
        let tracker = AlertTracker::new(&[cpu.clone(), memory.clone()]);

        feed(&tracker, &cpu, &[85.0, 85.0]);
        let t = at(0);
        let fired = tracker.observe(&memory, &sample(MonitorKind::Memory, None, 99.0, t), t);
        let active_id = fired[0].alert().id.clone();

        let mut cpu_changed = cpu.clone();
        cpu_changed.alert_count = 2;
        let mut memory_changed = memory.clone();
        memory_changed.threshold = 95.0;
        tracker.apply_config(&[cpu_changed.clone(), memory_changed]);

        assert!(tracker.pending().is_empty());
        let active = tracker.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, active_id);

        // The pending counter restarted: one breach is not enough for count 2
        let t = at(600);
        assert!(tracker
            .observe(&cpu_changed, &sample(MonitorKind::Cpu, None, 85.0, t), t)
            .is_empty());
    }

    #[test]
    fn test_unchanged_config_keeps_pending() {
        let cpu = cpu_config(80.0, 3);
        let tracker = AlertTracker::new(&[cpu.clone()]);
        feed(&tracker, &cpu, &[85.0]);

        tracker.apply_config(&[cpu]);
        assert_eq!(tracker.pending().len(), 1);
    }

    #[test]
    fn test_restore_active_from_history() {
        let config = cpu_config(80.0, 1);
        let source = AlertTracker::new(&[config.clone()]);
        let fired = feed(&source, &config, &[90.0]);
        let record = AlertRecord::from_event(&fired[0].1, "host");

        let tracker = AlertTracker::new(&[config.clone()]);
        assert_eq!(tracker.restore(&[record.clone()], at(60)), 1);
        let restored = tracker.get(&record.key()).unwrap();
        assert_eq!(restored.id, record.alert_id);
        assert!(restored.notified);

        // A breach does not re-fire, a recovery resolves the restored identity
        let events = feed(&tracker, &config, &[95.0, 10.0]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.alert().id, record.alert_id);
        assert!(!events[0].1.is_fired());
    }

    #[test]
    fn test_restore_skips_keys_resolved_later() {
        let config = cpu_config(80.0, 1);
        let source = AlertTracker::new(&[config.clone()]);
        let events = feed(&source, &config, &[90.0, 10.0]);
        let mut records: Vec<AlertRecord> = events
            .iter()
            .map(|(_, e)| AlertRecord::from_event(e, "host"))
            .collect();
        records.reverse();

        let tracker = AlertTracker::new(&[config]);
        assert_eq!(tracker.restore(&records, at(600)), 0);
    }

    #[test]
    fn test_mark_notified_matches_episode() {
        let config = cpu_config(80.0, 1);
        let tracker = AlertTracker::new(&[config.clone()]);
        let events = feed(&tracker, &config, &[90.0]);
        let alert = events[0].1.alert();

        assert!(!tracker.mark_notified(&alert.key, "other-id"));
        assert!(tracker.mark_notified(&alert.key, &alert.id));
        assert!(tracker.get(&alert.key).unwrap().notified);

        tracker.clear();
        assert!(tracker.is_empty());
    }
}
