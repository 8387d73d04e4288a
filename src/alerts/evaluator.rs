//! Threshold evaluation

use crate::monitors::MonitorKind;

/// Which side of the threshold is unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Usage percentages and latency: higher values are worse
    LowerIsBetter,
}

pub fn direction(kind: MonitorKind) -> Direction {
    match kind {
        MonitorKind::Cpu | MonitorKind::Memory | MonitorKind::Disk | MonitorKind::Ping => {
            Direction::LowerIsBetter
        }
    }
}

/// Whether `value` crosses `threshold` in the unfavorable direction.
///
/// Non-finite values never breach.
pub fn breached(value: f64, threshold: f64, kind: MonitorKind) -> bool {
    if !value.is_finite() {
        return false;
    }

    match direction(kind) {
        Direction::LowerIsBetter => value > threshold,
    }
}

/// Human-readable comparison, e.g. `"cpu = 91.20% > threshold 80.00%"`
pub fn describe(value: f64, threshold: f64, kind: MonitorKind) -> String {
    let unit = kind.unit();
    let op = if breached(value, threshold, kind) { ">" } else { "<=" };
    format!(
        "{} = {:.2}{} {} threshold {:.2}{}",
        kind, value, unit, op, threshold, unit
    )
}
