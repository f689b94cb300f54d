use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::{validate_thresholds, MemoryConfig};
use crate::error::DeliveryError;
use crate::metrics::MemoryMetrics;
use crate::tasks::PeriodicTask;

use super::{
    MemorySampler, MonitorReport, PressureLevel, ReclaimEvent, ResourceSample, Thresholds,
    TriggerMode,
};

/// Upper bound on reclamation passes in aggressive mode
pub const AGGRESSIVE_RECLAIM_PASSES: u32 = 3;

/// Samples included in a report
const REPORT_SAMPLES: usize = 10;
/// Reclaim events included in a report
const REPORT_RECLAIMS: usize = 5;

/// Invoked with the sample that crossed a threshold
pub type PressureCallback = Arc<dyn Fn(&ResourceSample) -> anyhow::Result<()> + Send + Sync>;

/// Releases cached memory and reports an estimate of bytes freed
pub type Reclaimer = Arc<dyn Fn() -> usize + Send + Sync>;

#[derive(Default)]
struct History {
    samples: VecDeque<ResourceSample>,
    reclaims: VecDeque<ReclaimEvent>,
}

#[derive(Default)]
struct Callbacks {
    warning: Vec<PressureCallback>,
    critical: Vec<PressureCallback>,
}

#[derive(Debug, Default)]
struct MonitorCounters {
    samples_taken: AtomicU64,
    samples_failed: AtomicU64,
    callbacks_failed: AtomicU64,
}

/// Samples process memory, classifies it against the configured thresholds
/// and notifies registered callbacks on pressure.
///
/// Sample and reclaim histories are fixed-capacity rings.
pub struct ResourceMonitor {
    sampler: Arc<dyn MemorySampler>,
    memory_limit_bytes: u64,
    trigger_mode: TriggerMode,
    check_interval: Duration,
    sample_capacity: usize,
    reclaim_capacity: usize,
    thresholds: RwLock<Thresholds>,
    level: Mutex<PressureLevel>,
    history: Mutex<History>,
    callbacks: RwLock<Callbacks>,
    reclaimers: RwLock<Vec<(String, Reclaimer)>>,
    counters: MonitorCounters,
    task: Mutex<Option<PeriodicTask>>,
}

impl ResourceMonitor {
    pub fn new(
        config: &MemoryConfig,
        sampler: Arc<dyn MemorySampler>,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;

        Ok(Self {
            sampler,
            memory_limit_bytes: config.limit_bytes,
            trigger_mode: config.trigger_mode,
            check_interval: Duration::from_secs(config.check_interval_seconds),
            sample_capacity: config.sample_history_size,
            reclaim_capacity: config.reclaim_history_size,
            thresholds: RwLock::new(Thresholds {
                warning: config.warning_threshold,
                critical: config.critical_threshold,
                recovery_margin: config.recovery_margin,
            }),
            level: Mutex::new(PressureLevel::Normal),
            history: Mutex::new(History::default()),
            callbacks: RwLock::new(Callbacks::default()),
            reclaimers: RwLock::new(Vec::new()),
            counters: MonitorCounters::default(),
            task: Mutex::new(None),
        })
    }

    /// Override the sampling period (sub-second periods are allowed here)
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
    }

    pub fn thresholds(&self) -> Thresholds {
        match self.thresholds.read() {
            Ok(thresholds) => *thresholds,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn pressure_level(&self) -> PressureLevel {
        match self.level.lock() {
            Ok(level) => *level,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Called when usage enters the warning band
    pub fn register_pressure_callback<F>(&self, callback: F)
    where
        F: Fn(&ResourceSample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.callbacks.write() {
            Ok(mut callbacks) => callbacks.warning.push(Arc::new(callback)),
            Err(_) => tracing::error!("Callback registry lock poisoned, pressure callback dropped"),
        }
    }

    /// Called when usage enters the critical band
    pub fn register_critical_callback<F>(&self, callback: F)
    where
        F: Fn(&ResourceSample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.callbacks.write() {
            Ok(mut callbacks) => callbacks.critical.push(Arc::new(callback)),
            Err(_) => tracing::error!("Callback registry lock poisoned, critical callback dropped"),
        }
    }

    /// Register a hook run by `force_reclaim`
    pub fn register_reclaimer<F>(&self, name: impl Into<String>, reclaimer: F)
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        match self.reclaimers.write() {
            Ok(mut reclaimers) => reclaimers.push((name.into(), Arc::new(reclaimer))),
            Err(_) => tracing::error!("Reclaimer registry lock poisoned, reclaimer dropped"),
        }
    }

    /// Read memory from the sampler without recording a sample
    pub fn current_memory(&self) -> Result<u64, DeliveryError> {
        self.sampler.sample_memory()
    }

    /// Current memory as a fraction of the limit
    pub fn usage_ratio(&self) -> Result<f64, DeliveryError> {
        self.current_memory().map(|bytes| self.ratio(bytes))
    }

    /// Take one sample, record it and dispatch callbacks.
    ///
    /// Returns `None` when sampling fails; the failure is logged and counted
    /// and the previous level is kept.
    pub fn check_now(&self) -> Option<ResourceSample> {
        let memory_bytes = match self.sampler.sample_memory() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.samples_failed.fetch_add(1, Ordering::Relaxed);
                MemoryMetrics::record_sample_failure();
                tracing::warn!(error = %e, "Memory sample failed");
                return None;
            }
        };
        self.counters.samples_taken.fetch_add(1, Ordering::Relaxed);

        let usage_ratio = self.ratio(memory_bytes);
        let thresholds = self.thresholds();

        let (level, fire) = {
            let mut current = match self.level.lock() {
                Ok(level) => level,
                Err(poisoned) => poisoned.into_inner(),
            };
            let next = match self.trigger_mode {
                TriggerMode::Edge => next_level(*current, usage_ratio, &thresholds),
                TriggerMode::Level => PressureLevel::classify(usage_ratio, &thresholds),
            };
            let fire = match self.trigger_mode {
                TriggerMode::Edge if next > *current => Some(next),
                TriggerMode::Edge => None,
                TriggerMode::Level if next > PressureLevel::Normal => Some(next),
                TriggerMode::Level => None,
            };
            let previous = *current;
            if next != previous {
                tracing::info!(
                    from = %previous,
                    to = %next,
                    usage_ratio = usage_ratio,
                    memory_bytes = memory_bytes,
                    "Memory pressure level changed"
                );
            }
            *current = next;
            (next, fire)
        };

        let sample = ResourceSample {
            timestamp: Utc::now(),
            memory_bytes,
            usage_ratio,
            level,
        };

        if let Ok(mut history) = self.history.lock() {
            push_bounded(&mut history.samples, sample.clone(), self.sample_capacity);
        }

        MemoryMetrics::set_process_memory(memory_bytes);
        MemoryMetrics::set_pressure_level(level.gauge_value());

        if let Some(level) = fire {
            self.dispatch(level, &sample);
        }

        Some(sample)
    }

    /// Run every registered reclaimer, up to `AGGRESSIVE_RECLAIM_PASSES`
    /// times when `aggressive`, stopping early once a pass frees nothing.
    pub fn force_reclaim(&self, aggressive: bool) -> ReclaimEvent {
        let started = Instant::now();
        let memory_before = self.sampler.sample_memory().ok();

        let reclaimers: Vec<(String, Reclaimer)> = match self.reclaimers.read() {
            Ok(reclaimers) => reclaimers.clone(),
            Err(_) => {
                tracing::error!("Reclaimer registry lock poisoned");
                Vec::new()
            }
        };

        let max_passes = if aggressive { AGGRESSIVE_RECLAIM_PASSES } else { 1 };
        let mut passes = 0;
        let mut bytes_reclaimed: u64 = 0;

        while passes < max_passes {
            passes += 1;
            let mut freed_this_pass: u64 = 0;

            for (name, reclaimer) in &reclaimers {
                match catch_unwind(AssertUnwindSafe(|| reclaimer())) {
                    Ok(freed) => freed_this_pass += freed as u64,
                    Err(_) => tracing::error!(reclaimer = %name, "Reclaimer panicked"),
                }
            }

            bytes_reclaimed += freed_this_pass;
            if freed_this_pass == 0 {
                break;
            }
        }

        let memory_after = self.sampler.sample_memory().ok();
        let elapsed = started.elapsed();

        let event = ReclaimEvent {
            timestamp: Utc::now(),
            aggressive,
            passes,
            bytes_reclaimed,
            memory_before,
            memory_after,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
        };

        if let Ok(mut history) = self.history.lock() {
            push_bounded(&mut history.reclaims, event.clone(), self.reclaim_capacity);
        }
        MemoryMetrics::record_reclaim(aggressive, bytes_reclaimed, elapsed);

        tracing::info!(
            aggressive = aggressive,
            passes = passes,
            bytes_reclaimed = bytes_reclaimed,
            memory_before = ?memory_before,
            memory_after = ?memory_after,
            duration_ms = event.duration_ms,
            "Memory reclamation completed"
        );

        event
    }

    /// Replace thresholds at runtime. Invalid values leave the old ones in place.
    pub fn update_thresholds(&self, warning: f64, critical: f64) -> Result<(), DeliveryError> {
        let mut thresholds = self
            .thresholds
            .write()
            .map_err(|_| DeliveryError::poisoned("thresholds"))?;

        validate_thresholds(warning, critical, thresholds.recovery_margin)?;
        thresholds.warning = warning;
        thresholds.critical = critical;

        tracing::info!(warning = warning, critical = critical, "Memory thresholds updated");
        Ok(())
    }

    pub fn report(&self) -> MonitorReport {
        let (recent_samples, recent_reclaim_events, memory_trend_bytes) = match self.history.lock()
        {
            Ok(history) => {
                let trend = match (history.samples.front(), history.samples.back()) {
                    (Some(first), Some(last)) => last.memory_bytes as i64 - first.memory_bytes as i64,
                    _ => 0,
                };
                (
                    tail(&history.samples, REPORT_SAMPLES),
                    tail(&history.reclaims, REPORT_RECLAIMS),
                    trend,
                )
            }
            Err(_) => (Vec::new(), Vec::new(), 0),
        };

        MonitorReport {
            monitoring_active: self.is_monitoring(),
            memory_limit_bytes: self.memory_limit_bytes,
            trigger_mode: self.trigger_mode,
            thresholds: self.thresholds(),
            pressure_level: self.pressure_level(),
            current: recent_samples.last().cloned(),
            recent_samples,
            recent_reclaim_events,
            memory_trend_bytes,
            samples_taken: self.counters.samples_taken.load(Ordering::Relaxed),
            samples_failed: self.counters.samples_failed.load(Ordering::Relaxed),
            callbacks_failed: self.counters.callbacks_failed.load(Ordering::Relaxed),
        }
    }

    /// Start periodic sampling. Returns false if already running or no
    /// runtime is available.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let Ok(mut task) = self.task.lock() else {
            tracing::error!("Monitor task lock poisoned");
            return false;
        };
        if task.is_some() {
            return false;
        }

        let monitor = Arc::downgrade(self);
        let spawned = PeriodicTask::spawn("resource-monitor", self.check_interval, move || {
            let monitor = monitor.clone();
            async move {
                if let Some(monitor) = monitor.upgrade() {
                    monitor.check_now();
                }
            }
        });

        match spawned {
            Some(spawned) => {
                *task = Some(spawned);
                tracing::info!(
                    interval_ms = self.check_interval.as_millis() as u64,
                    limit_bytes = self.memory_limit_bytes,
                    "Resource monitoring started"
                );
                true
            }
            None => false,
        }
    }

    /// Stop periodic sampling and wait until the loop has exited
    pub async fn stop_monitoring(&self) {
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(task) = task {
            task.stop().await;
            tracing::info!("Resource monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    fn ratio(&self, memory_bytes: u64) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        memory_bytes as f64 / self.memory_limit_bytes as f64
    }

    fn dispatch(&self, level: PressureLevel, sample: &ResourceSample) {
        // Clone out so callbacks may register further callbacks
        let targets: Vec<PressureCallback> = match self.callbacks.read() {
            Ok(callbacks) => match level {
                PressureLevel::Warning => callbacks.warning.clone(),
                PressureLevel::Critical => callbacks.critical.clone(),
                PressureLevel::Normal => return,
            },
            Err(_) => {
                tracing::error!("Callback registry lock poisoned");
                return;
            }
        };

        MemoryMetrics::record_pressure_event(level.as_str());
        tracing::warn!(
            level = %level,
            usage_ratio = sample.usage_ratio,
            memory_bytes = sample.memory_bytes,
            callbacks = targets.len(),
            "Memory pressure detected"
        );

        for callback in targets {
            let failure = match catch_unwind(AssertUnwindSafe(|| callback(sample))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("callback panicked".to_string()),
            };

            if let Some(error) = failure {
                self.counters.callbacks_failed.fetch_add(1, Ordering::Relaxed);
                MemoryMetrics::record_callback_failure();
                tracing::error!(level = %level, error = %error, "Pressure callback failed");
            }
        }
    }
}

/// Edge-mode classification: rising is immediate, falling waits until usage
/// drops below the current band's threshold minus the recovery margin.
fn next_level(current: PressureLevel, ratio: f64, thresholds: &Thresholds) -> PressureLevel {
    let raw = PressureLevel::classify(ratio, thresholds);
    if raw >= current {
        return raw;
    }

    let margin = thresholds.recovery_margin;
    match current {
        PressureLevel::Critical if ratio >= thresholds.critical - margin => PressureLevel::Critical,
        PressureLevel::Critical | PressureLevel::Warning
            if ratio >= thresholds.warning - margin =>
        {
            PressureLevel::Warning
        }
        _ => PressureLevel::Normal,
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

fn tail<T: Clone>(ring: &VecDeque<T>, count: usize) -> Vec<T> {
    ring.iter()
        .skip(ring.len().saturating_sub(count))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StaticMemorySampler;
    use std::sync::atomic::AtomicUsize;

    fn config(limit: u64) -> MemoryConfig {
        MemoryConfig {
            limit_bytes: limit,
            warning_threshold: 0.8,
            critical_threshold: 0.95,
            recovery_margin: 0.05,
            ..MemoryConfig::default()
        }
    }

    fn monitor_with(
        config: MemoryConfig,
        memory: u64,
    ) -> (Arc<StaticMemorySampler>, ResourceMonitor) {
        let sampler = Arc::new(StaticMemorySampler::new(memory));
        let monitor = ResourceMonitor::new(&config, sampler.clone()).unwrap();
        (sampler, monitor)
    }

    fn counting_callbacks(monitor: &ResourceMonitor) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let warnings = Arc::new(AtomicUsize::new(0));
        let criticals = Arc::new(AtomicUsize::new(0));

        let w = warnings.clone();
        monitor.register_pressure_callback(move |_| {
            w.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c = criticals.clone();
        monitor.register_critical_callback(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        (warnings, criticals)
    }

    #[test]
    fn test_warning_fires_once_per_crossing() {
        let (sampler, monitor) = monitor_with(config(1000), 850);
        let (warnings, criticals) = counting_callbacks(&monitor);

        let sample = monitor.check_now().unwrap();
        assert_eq!(sample.level, PressureLevel::Warning);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(criticals.load(Ordering::SeqCst), 0);

        // Still above the threshold: no repeat in edge mode
        monitor.check_now();
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        // Inside the hysteresis band: still armed-off
        sampler.set(770);
        monitor.check_now();
        assert_eq!(monitor.pressure_level(), PressureLevel::Warning);
        sampler.set(850);
        monitor.check_now();
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        // Below warning - margin re-arms
        sampler.set(700);
        monitor.check_now();
        assert_eq!(monitor.pressure_level(), PressureLevel::Normal);
        sampler.set(850);
        monitor.check_now();
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jump_to_critical_fires_critical_only() {
        let (_sampler, monitor) = monitor_with(config(1000), 990);
        let (warnings, criticals) = counting_callbacks(&monitor);

        monitor.check_now();
        assert_eq!(criticals.load(Ordering::SeqCst), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_critical_then_warning_then_critical() {
        let (sampler, monitor) = monitor_with(config(1000), 850);
        let (warnings, criticals) = counting_callbacks(&monitor);

        monitor.check_now();
        sampler.set(960);
        monitor.check_now();
        assert_eq!((warnings.load(Ordering::SeqCst), criticals.load(Ordering::SeqCst)), (1, 1));

        // Fall to warning band past the critical margin, then rise again
        sampler.set(850);
        monitor.check_now();
        assert_eq!(monitor.pressure_level(), PressureLevel::Warning);
        sampler.set(960);
        monitor.check_now();
        assert_eq!(criticals.load(Ordering::SeqCst), 2);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_level_mode_fires_every_check() {
        let mut cfg = config(1000);
        cfg.trigger_mode = TriggerMode::Level;
        let (_sampler, monitor) = monitor_with(cfg, 850);
        let (warnings, _) = counting_callbacks(&monitor);

        monitor.check_now();
        monitor.check_now();
        monitor.check_now();
        assert_eq!(warnings.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failing_callback_does_not_block_others() {
        let (_sampler, monitor) = monitor_with(config(1000), 850);
        monitor.register_pressure_callback(|_| Err(anyhow::anyhow!("boom")));
        monitor.register_pressure_callback(|_| panic!("callback panic"));
        let (warnings, _) = counting_callbacks(&monitor);

        monitor.check_now();
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.report().callbacks_failed, 2);
    }

    #[test]
    fn test_sampling_failure_keeps_level() {
        let (sampler, monitor) = monitor_with(config(1000), 850);
        monitor.check_now();

        sampler.set_failing(true);
        assert!(monitor.check_now().is_none());
        assert_eq!(monitor.pressure_level(), PressureLevel::Warning);

        let report = monitor.report();
        assert_eq!(report.samples_failed, 1);
        assert_eq!(report.samples_taken, 1);
    }

    #[test]
    fn test_sample_history_is_bounded() {
        let mut cfg = config(1000);
        cfg.sample_history_size = 3;
        let (sampler, monitor) = monitor_with(cfg, 100);

        for memory in [100, 200, 300, 400, 500] {
            sampler.set(memory);
            monitor.check_now();
        }

        let report = monitor.report();
        assert_eq!(report.recent_samples.len(), 3);
        assert_eq!(report.recent_samples[0].memory_bytes, 300);
        assert_eq!(report.memory_trend_bytes, 200);
        assert_eq!(report.current.unwrap().memory_bytes, 500);
    }

    #[test]
    fn test_aggressive_reclaim_runs_bounded_passes() {
        let (_sampler, monitor) = monitor_with(config(1000), 100);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        monitor.register_reclaimer("always", move || {
            c.fetch_add(1, Ordering::SeqCst);
            10
        });

        let event = monitor.force_reclaim(true);
        assert_eq!(event.passes, AGGRESSIVE_RECLAIM_PASSES);
        assert_eq!(event.bytes_reclaimed, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let event = monitor.force_reclaim(false);
        assert_eq!(event.passes, 1);
        assert_eq!(monitor.report().recent_reclaim_events.len(), 2);
    }

    #[test]
    fn test_reclaim_stops_when_nothing_freed() {
        let (_sampler, monitor) = monitor_with(config(1000), 100);
        monitor.register_reclaimer("noop", || 0);
        monitor.register_reclaimer("broken", || panic!("reclaimer panic"));

        let event = monitor.force_reclaim(true);
        assert_eq!(event.passes, 1);
        assert_eq!(event.bytes_reclaimed, 0);
        assert_eq!(event.memory_before, Some(100));
    }

    #[test]
    fn test_update_thresholds_rejects_invalid() {
        let (_sampler, monitor) = monitor_with(config(1000), 100);

        assert!(matches!(
            monitor.update_thresholds(0.9, 0.8),
            Err(DeliveryError::InvalidThresholds { .. })
        ));
        assert_eq!(monitor.thresholds().warning, 0.8);

        monitor.update_thresholds(0.6, 0.7).unwrap();
        assert_eq!(monitor.thresholds().critical, 0.7);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config(1000);
        cfg.warning_threshold = 1.5;
        let sampler = Arc::new(StaticMemorySampler::new(0));
        assert!(ResourceMonitor::new(&cfg, sampler).is_err());
    }

    #[test]
    fn test_zero_check_interval_rejected() {
        let mut cfg = config(1000);
        cfg.check_interval_seconds = 0;
        let sampler = Arc::new(StaticMemorySampler::new(0));
        assert!(matches!(
            ResourceMonitor::new(&cfg, sampler),
            Err(DeliveryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_stop_monitoring() {
        let (_sampler, monitor) = monitor_with(config(1000), 850);
        let monitor = Arc::new(monitor.with_check_interval(Duration::from_millis(10)));
        let (warnings, _) = counting_callbacks(&monitor);

        assert!(monitor.start_monitoring());
        assert!(!monitor.start_monitoring());
        assert!(monitor.is_monitoring());

        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop_monitoring().await;
        assert!(!monitor.is_monitoring());

        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        let taken = monitor.report().samples_taken;
        assert!(taken >= 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.report().samples_taken, taken);

        // Stopping twice is harmless
        monitor.stop_monitoring().await;
    }
}
