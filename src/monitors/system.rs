//! Host metrics collected through `sysinfo`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Disks, System};

use super::{ping, CollectionError, MetricSource, MonitorKind};
use crate::config::{MonitorConfig, MonitorParams};

/// Metric source backed by the local operating system
pub struct SystemSource {
    system: Arc<Mutex<System>>,
}

impl SystemSource {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    /// Hostname reported in notifications and persisted records
    pub fn hostname() -> String {
        System::host_name().unwrap_or_else(|| "localhost".to_string())
    }

    async fn blocking<F>(&self, kind: MonitorKind, f: F) -> Result<f64, CollectionError>
    where
        F: FnOnce(&mut System) -> Result<f64, CollectionError> + Send + 'static,
    {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut system = system.lock();
            f(&mut system)
        })
        .await
        .map_err(|e| CollectionError::Unavailable {
            kind,
            message: e.to_string(),
        })?
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

/// CPU usage needs two refreshes separated by the sysinfo minimum interval
fn cpu_percent(system: &mut System) -> Result<f64, CollectionError> {
    system.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(500)));
    system.refresh_cpu();

    let usage = system.global_cpu_info().cpu_usage() as f64;
    if usage.is_finite() {
        Ok(usage)
    } else {
        Err(CollectionError::Unavailable {
            kind: MonitorKind::Cpu,
            message: "cpu usage not reported".to_string(),
        })
    }
}

fn memory_percent(system: &mut System) -> Result<f64, CollectionError> {
    system.refresh_memory();

    let total = system.total_memory();
    if total == 0 {
        return Err(CollectionError::Unavailable {
            kind: MonitorKind::Memory,
            message: "total memory reported as zero".to_string(),
        });
    }

    Ok(system.used_memory() as f64 / total as f64 * 100.0)
}

/// Usage of the filesystem whose mount point is the longest prefix of `path`
fn disk_percent(path: &str) -> Result<f64, CollectionError> {
    let disks = Disks::new_with_refreshed_list();
    let target = Path::new(path);

    let disk = disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .ok_or_else(|| CollectionError::TargetNotFound(path.to_string()))?;

    let total = disk.total_space();
    if total == 0 {
        return Err(CollectionError::Unavailable {
            kind: MonitorKind::Disk,
            message: format!("{} reports zero capacity", disk.mount_point().display()),
        });
    }

    let used = total.saturating_sub(disk.available_space());
    Ok(used as f64 / total as f64 * 100.0)
}

#[async_trait]
impl MetricSource for SystemSource {
    async fn sample(
        &self,
        monitor: &MonitorConfig,
        target: Option<&str>,
    ) -> Result<f64, CollectionError> {
        match (monitor.kind, &monitor.params) {
            (MonitorKind::Cpu, _) => self.blocking(MonitorKind::Cpu, cpu_percent).await,
            (MonitorKind::Memory, _) => self.blocking(MonitorKind::Memory, memory_percent).await,
            (MonitorKind::Disk, _) => {
                let path = target.unwrap_or("/").to_string();
                self.blocking(MonitorKind::Disk, move |_| disk_percent(&path)).await
            }
            (MonitorKind::Ping, MonitorParams::Ping { timeout, .. }) => {
                let host = target.ok_or_else(|| CollectionError::TargetNotFound("ping host".to_string()))?;
                ping::ping(host, *timeout).await
            }
            (MonitorKind::Ping, _) => Err(CollectionError::Unavailable {
                kind: MonitorKind::Ping,
                message: "ping monitor configured without targets".to_string(),
            }),
        }
    }
}
