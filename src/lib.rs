//! hostwatch: lightweight host monitoring with debounced alerts
//!
//! Periodically samples CPU, memory, disk usage and ping latency, compares
//! every sample against its monitor's threshold and turns breach streaks into
//! alerts.
//!
//! # Features
//!
//! - **Hysteresis**: an alert fires only after `alert_count` consecutive breaches
//! - **Auto-resolution**: alerts whose samples stop arriving resolve after a quiet window
//! - **Collector alerts**: repeated collection failures raise their own alert
//! - **History**: fire and resolve records in a JSON file or SQLite, with pruning
//! - **Notifications**: console, Discord, Slack, Telegram and generic webhooks
//! - **Status API**: read-only HTTP view of active alerts, history and monitors
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use hostwatch::alerts::AlertTracker;
//! use hostwatch::config::MonitorConfig;
//! use hostwatch::monitors::{MonitorKind, Sample};
//!
//! let mut cpu = MonitorConfig::defaults(MonitorKind::Cpu);
//! cpu.alert_count = 2;
//! let tracker = AlertTracker::new(&[cpu.clone()]);
//!
//! for value in [91.0, 93.5] {
//!     let now = Utc::now();
//!     let sample = Sample::new(MonitorKind::Cpu, None, value, now);
//!     for event in tracker.observe(&cpu, &sample, now) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod monitors;
pub mod notify;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use alerts::{Alert, AlertEvent, AlertKey, AlertRecord, AlertStatus, AlertTracker};
pub use config::{AppConfig, ConfigError, MonitorConfig};
pub use monitors::{MetricSource, MonitorKind, Sample};
pub use scheduler::Scheduler;
pub use store::{open_store, AlertStore, StoreError};
