use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete memory-pressure band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

impl PressureLevel {
    /// Classify a usage ratio without hysteresis
    pub fn classify(ratio: f64, thresholds: &Thresholds) -> Self {
        if ratio >= thresholds.critical {
            PressureLevel::Critical
        } else if ratio >= thresholds.warning {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
        }
    }

    pub(crate) fn gauge_value(&self) -> i64 {
        match self {
            PressureLevel::Normal => 0,
            PressureLevel::Warning => 1,
            PressureLevel::Critical => 2,
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When pressure callbacks fire.
///
/// `Edge` notifies once per upward band crossing, re-arming only after usage
/// falls below the band minus the recovery margin. `Level` notifies on every
/// check while above a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    #[default]
    Edge,
    Level,
}

/// Warning/critical fractions of the memory limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
    pub recovery_margin: f64,
}

/// One memory reading
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub memory_bytes: u64,
    /// Fraction of the configured limit, `memory_bytes / limit`
    pub usage_ratio: f64,
    pub level: PressureLevel,
}

/// Outcome of a reclamation run
#[derive(Debug, Clone, Serialize)]
pub struct ReclaimEvent {
    pub timestamp: DateTime<Utc>,
    pub aggressive: bool,
    pub passes: u32,
    /// Sum of what the registered reclaimers reported
    pub bytes_reclaimed: u64,
    pub memory_before: Option<u64>,
    pub memory_after: Option<u64>,
    pub duration_ms: f64,
}

/// Snapshot returned by `ResourceMonitor::report`
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub monitoring_active: bool,
    pub memory_limit_bytes: u64,
    pub trigger_mode: TriggerMode,
    pub thresholds: Thresholds,
    pub pressure_level: PressureLevel,
    pub current: Option<ResourceSample>,
    pub recent_samples: Vec<ResourceSample>,
    pub recent_reclaim_events: Vec<ReclaimEvent>,
    /// Last retained sample minus first retained sample, in bytes
    pub memory_trend_bytes: i64,
    pub samples_taken: u64,
    pub samples_failed: u64,
    pub callbacks_failed: u64,
}
