//! Broadcast coordinator - ties registry, buffer and resource monitor together

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;

use crate::buffer::BoundedMessageBuffer;
use crate::config::{BroadcastConfig, Settings};
use crate::connection_manager::{ConnectionLimits, ConnectionRegistry, TransportHandle};
use crate::error::DeliveryError;
use crate::metrics::{BroadcastMetrics, ConnectionMetrics};
use crate::monitor::{MemorySampler, PressureLevel, ResourceMonitor, ResourceSample};
use crate::tasks::PeriodicTask;

use super::{
    BroadcastResult, BroadcastStatus, CleanupOutcome, ComprehensiveStats, CoordinatorStats,
};

/// Fans messages out to registered connections under a memory budget.
///
/// Owns one registry and one buffer and subscribes to one resource monitor.
/// Pressure notifications clear the buffer, sweep stale connections and, when
/// critical, force an aggressive reclamation.
pub struct BroadcastCoordinator {
    registry: ConnectionRegistry,
    buffer: BoundedMessageBuffer,
    monitor: Arc<ResourceMonitor>,
    config: BroadcastConfig,
    cleanup_interval: Duration,
    stats: CoordinatorStats,
    cleanup_task: Mutex<Option<PeriodicTask>>,
    shut_down: AtomicBool,
}

impl BroadcastCoordinator {
    /// Build every component from settings
    pub fn new(
        settings: &Settings,
        sampler: Arc<dyn MemorySampler>,
    ) -> Result<Arc<Self>, DeliveryError> {
        settings.broadcast.validate()?;
        let monitor = Arc::new(ResourceMonitor::new(&settings.memory, sampler)?);
        let registry = ConnectionRegistry::with_limits(ConnectionLimits::from(settings.connections));
        let buffer = BoundedMessageBuffer::from_config(&settings.buffer);

        Ok(Self::with_components(
            registry,
            buffer,
            monitor,
            settings.broadcast.clone(),
            Duration::from_secs(settings.broadcast.cleanup_interval_seconds),
        ))
    }

    /// Assemble from pre-built parts and subscribe to the monitor
    pub fn with_components(
        registry: ConnectionRegistry,
        buffer: BoundedMessageBuffer,
        monitor: Arc<ResourceMonitor>,
        config: BroadcastConfig,
        cleanup_interval: Duration,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            registry,
            buffer,
            monitor,
            config,
            cleanup_interval,
            stats: CoordinatorStats::default(),
            cleanup_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        coordinator.subscribe();
        coordinator
    }

    /// Monitor hooks hold only a `Weak` so they never keep the coordinator alive
    fn subscribe(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.monitor.register_pressure_callback(move |sample| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.handle_pressure(PressureLevel::Warning, sample);
            }
            Ok(())
        });

        let weak = Arc::downgrade(self);
        self.monitor.register_critical_callback(move |sample| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.handle_pressure(PressureLevel::Critical, sample);
            }
            Ok(())
        });

        let weak = Arc::downgrade(self);
        self.monitor.register_reclaimer("connection_registry", move || {
            weak.upgrade()
                .map_or(0, |coordinator| coordinator.registry.reclaim())
        });

        let weak = Arc::downgrade(self);
        self.monitor.register_reclaimer("message_buffer", move || {
            weak.upgrade()
                .map_or(0, |coordinator| coordinator.buffer.reclaim())
        });
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> &BoundedMessageBuffer {
        &self.buffer
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Start the monitor and the cleanup loop
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_shut_down() {
            tracing::warn!("Coordinator already shut down, not starting");
            return false;
        }

        self.monitor.start_monitoring();

        let Ok(mut task) = self.cleanup_task.lock() else {
            tracing::error!("Cleanup task lock poisoned");
            return false;
        };
        if task.is_some() {
            return false;
        }

        let coordinator = Arc::downgrade(self);
        let spawned = PeriodicTask::spawn("broadcast-cleanup", self.cleanup_interval, move || {
            let coordinator = coordinator.clone();
            async move {
                if let Some(coordinator) = coordinator.upgrade() {
                    coordinator.run_cleanup_cycle();
                }
            }
        });

        *task = spawned;
        let started = task.is_some();
        if started {
            tracing::info!(
                cleanup_interval_ms = self.cleanup_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                "Broadcast coordinator started"
            );
        }
        started
    }

    /// Register a connection unless memory is at or above the admission ratio
    pub fn add_connection(&self, handle: &TransportHandle, user_id: Option<&str>) -> bool {
        self.add_connection_with_metadata(handle, user_id, HashMap::new())
    }

    pub fn add_connection_with_metadata(
        &self,
        handle: &TransportHandle,
        user_id: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> bool {
        if self.is_shut_down() {
            tracing::warn!(connection_id = %handle.connection_id(), "Coordinator shut down, connection refused");
            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if !self.admits_new_connection() {
            self.stats
                .connections_rejected_memory
                .fetch_add(1, Ordering::Relaxed);
            ConnectionMetrics::record_rejected("memory");
            tracing::warn!(
                connection_id = %handle.connection_id(),
                user_id = ?user_id,
                "Connection refused under memory pressure"
            );
            return false;
        }

        if self.registry.add(handle, user_id, metadata) {
            self.stats.connections_added.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn remove_connection(&self, handle: &TransportHandle, user_id: Option<&str>) -> bool {
        let removed = self.registry.remove(handle, user_id);
        if removed {
            self.stats.connections_removed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Transport "opened" notification
    pub fn notify_connected(&self, handle: &TransportHandle, user_id: Option<&str>) -> bool {
        self.add_connection(handle, user_id)
    }

    /// Transport "closed" notification
    pub fn notify_disconnected(&self, handle: &TransportHandle, user_id: Option<&str>) -> bool {
        self.remove_connection(handle, user_id)
    }

    /// Serialize `message` as JSON and fan it out.
    /// `None` targets every active connection.
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        message: &T,
        target_user_ids: Option<&[String]>,
    ) -> BroadcastResult {
        match serde_json::to_vec(message) {
            Ok(payload) => self.broadcast_bytes(payload, target_user_ids).await,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
                self.finish(Instant::now(), 0, 0, 0, BroadcastStatus::SerializationFailed)
            }
        }
    }

    /// Fan out an already-serialized payload
    #[tracing::instrument(
        skip(self, payload, target_user_ids),
        fields(
            payload_bytes = payload.len(),
            targets = target_user_ids.map(<[String]>::len)
        )
    )]
    pub async fn broadcast_bytes(
        &self,
        payload: Vec<u8>,
        target_user_ids: Option<&[String]>,
    ) -> BroadcastResult {
        let started = Instant::now();
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        let recipients = self.resolve_recipients(target_user_ids);
        let total_recipients = recipients.len();
        if recipients.is_empty() {
            tracing::debug!("No active recipients for broadcast");
            return self.finish(started, 0, 0, 0, BroadcastStatus::NoRecipients);
        }

        if !self.buffer.add_bytes(payload.clone(), true) {
            tracing::warn!(
                recipients = total_recipients,
                "Buffer refused broadcast message, nothing sent"
            );
            return self.finish(started, 0, 0, total_recipients, BroadcastStatus::BufferFull);
        }
        self.stats.messages_processed.fetch_add(1, Ordering::Relaxed);

        let (sent, failed) = self.send_in_batches(&recipients, &payload).await;

        tracing::debug!(
            sent = sent,
            failed = failed,
            recipients = total_recipients,
            "Broadcast complete"
        );
        self.finish(started, sent, failed, total_recipients, BroadcastStatus::Delivered)
    }

    /// Sweep stale connections and reclaim preventively when usage is high
    pub fn run_cleanup_cycle(&self) -> CleanupOutcome {
        self.stats.cleanup_cycles.fetch_add(1, Ordering::Relaxed);
        BroadcastMetrics::record_cleanup_cycle();

        let stale_removed = self.registry.sweep_stale();

        let reclaimed = match self.monitor.usage_ratio() {
            Ok(ratio) if ratio > self.config.preventive_reclaim_ratio => {
                tracing::info!(usage_ratio = ratio, "Memory above preventive threshold, reclaiming");
                self.monitor.force_reclaim(false);
                self.stats.forced_reclamations.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Memory sample failed during cleanup");
                false
            }
        };

        let registry_stats = self.registry.stats();
        ConnectionMetrics::set_active(registry_stats.total_connections, registry_stats.unique_users);

        if stale_removed > 0 || reclaimed {
            tracing::info!(
                stale_removed = stale_removed,
                reclaimed = reclaimed,
                "Cleanup cycle completed"
            );
        }

        CleanupOutcome {
            stale_removed,
            reclaimed,
        }
    }

    /// React to a monitor notification
    pub fn handle_pressure(&self, level: PressureLevel, sample: &ResourceSample) {
        self.stats.pressure_events.fetch_add(1, Ordering::Relaxed);

        let cleared = self.buffer.clear();
        let swept = self.registry.sweep_stale();

        tracing::warn!(
            level = %level,
            usage_ratio = sample.usage_ratio,
            buffer_cleared = cleared,
            stale_removed = swept,
            "Handled memory pressure"
        );

        if level == PressureLevel::Critical {
            self.monitor.force_reclaim(true);
            self.stats.forced_reclamations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain staged messages, oldest first
    pub fn drain_buffer(&self, count: Option<usize>) -> Vec<Vec<u8>> {
        self.buffer.get_messages(count, true)
    }

    pub fn get_comprehensive_stats(&self) -> ComprehensiveStats {
        let connections = self.registry.stats();
        ConnectionMetrics::set_active(connections.total_connections, connections.unique_users);

        let cleanup_running = self
            .cleanup_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false);

        ComprehensiveStats {
            connections,
            buffer: self.buffer.memory_usage(),
            memory: self.monitor.report(),
            coordinator: self.stats.snapshot(),
            cleanup_running,
            shut_down: self.is_shut_down(),
        }
    }

    /// Stop background work, clear the buffer and run a final reclamation.
    /// Calling it again only clears anything staged since.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("Coordinator already shut down");
            self.buffer.clear();
            return;
        }

        tracing::info!("Shutting down broadcast coordinator");

        self.monitor.stop_monitoring().await;

        let task = match self.cleanup_task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.stop().await;
        }

        let cleared = self.buffer.clear();
        self.monitor.force_reclaim(false);
        self.stats.forced_reclamations.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            buffer_cleared = cleared,
            connections = self.registry.len(),
            "Broadcast coordinator shut down"
        );
    }

    fn admits_new_connection(&self) -> bool {
        let limit = self.monitor.memory_limit_bytes();
        if limit == 0 {
            return true;
        }

        match self.monitor.current_memory() {
            Ok(memory) => (memory as f64) < limit as f64 * self.config.admission_ratio,
            Err(e) => {
                tracing::warn!(error = %e, "Memory sample failed, admitting connection unchecked");
                true
            }
        }
    }

    /// All active connections, or the de-duplicated union over the targets
    fn resolve_recipients(&self, target_user_ids: Option<&[String]>) -> Vec<TransportHandle> {
        let Some(user_ids) = target_user_ids else {
            return self.registry.list_active();
        };

        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        for user_id in user_ids {
            for handle in self.registry.list_active_for_user(user_id) {
                if seen.insert(handle.connection_id().to_string()) {
                    recipients.push(handle);
                }
            }
        }
        recipients
    }

    /// Batches run in order; sends inside a batch run concurrently
    async fn send_in_batches(&self, recipients: &[TransportHandle], payload: &[u8]) -> (usize, usize) {
        let batch_size = self.config.batch_size.max(1);
        let pause = Duration::from_millis(self.config.batch_pause_ms);
        let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
        let batch_count = recipients.len().div_ceil(batch_size);

        let mut sent = 0;
        let mut failed = 0;

        for (index, batch) in recipients.chunks(batch_size).enumerate() {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|handle| self.send_one(handle, payload, send_timeout)),
            )
            .await;

            for delivered in outcomes {
                if delivered {
                    sent += 1;
                } else {
                    failed += 1;
                }
            }

            if index + 1 < batch_count && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        (sent, failed)
    }

    async fn send_one(&self, handle: &TransportHandle, payload: &[u8], send_timeout: Duration) -> bool {
        match tokio::time::timeout(send_timeout, handle.send(payload)).await {
            Ok(Ok(())) => {
                self.registry.record_activity(handle.connection_id());
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %handle.connection_id(), error = %e, "Send failed");
                false
            }
            Err(_) => {
                tracing::debug!(
                    connection_id = %handle.connection_id(),
                    timeout_ms = send_timeout.as_millis() as u64,
                    "Send timed out"
                );
                false
            }
        }
    }

    fn finish(
        &self,
        started: Instant,
        sent: usize,
        failed: usize,
        total_recipients: usize,
        status: BroadcastStatus,
    ) -> BroadcastResult {
        let elapsed = started.elapsed();
        self.stats
            .messages_delivered
            .fetch_add(sent as u64, Ordering::Relaxed);
        self.stats
            .messages_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        BroadcastMetrics::record(status.as_str(), sent as u64, failed as u64, elapsed);

        BroadcastResult {
            sent,
            failed,
            total_recipients,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            buffer_utilization: self.buffer.memory_usage().utilization_percent,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::monitor::StaticMemorySampler;
    use crate::test_support::MockTransport;

    struct Fixture {
        sampler: Arc<StaticMemorySampler>,
        coordinator: Arc<BroadcastCoordinator>,
    }

    fn fixture(memory: u64, buffer: BoundedMessageBuffer, config: BroadcastConfig) -> Fixture {
        let sampler = Arc::new(StaticMemorySampler::new(memory));
        let memory_config = MemoryConfig {
            limit_bytes: 1000,
            ..MemoryConfig::default()
        };
        let monitor = Arc::new(ResourceMonitor::new(&memory_config, sampler.clone()).unwrap());
        let coordinator = BroadcastCoordinator::with_components(
            ConnectionRegistry::new(),
            buffer,
            monitor,
            config,
            Duration::from_millis(10),
        );
        Fixture {
            sampler,
            coordinator,
        }
    }

    fn default_fixture(memory: u64) -> Fixture {
        fixture(
            memory,
            BoundedMessageBuffer::new(1_000_000, 1000),
            BroadcastConfig {
                batch_pause_ms: 0,
                ..BroadcastConfig::default()
            },
        )
    }

    fn handle(id: &str) -> (Arc<MockTransport>, TransportHandle) {
        let mock = Arc::new(MockTransport::new(id));
        let handle: TransportHandle = mock.clone();
        (mock, handle)
    }

    #[tokio::test]
    async fn test_broadcast_to_all() {
        let f = default_fixture(100);
        let (m1, h1) = handle("c1");
        let (m2, h2) = handle("c2");
        assert!(f.coordinator.add_connection(&h1, Some("u1")));
        assert!(f.coordinator.add_connection(&h2, None));

        let result = f
            .coordinator
            .broadcast(&serde_json::json!({"text": "hi"}), None)
            .await;

        assert_eq!(result.status, BroadcastStatus::Delivered);
        assert_eq!(result.sent, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.total_recipients, 2);
        assert_eq!(m1.payloads(), vec![br#"{"text":"hi"}"#.to_vec()]);
        assert_eq!(m2.send_attempts(), 1);

        let info = f.coordinator.registry().connection_info("c1").unwrap();
        assert_eq!(info.message_count, 1);
    }

    #[tokio::test]
    async fn test_no_recipients_is_not_an_error() {
        let f = default_fixture(100);
        let result = f.coordinator.broadcast("nobody home", None).await;

        assert_eq!(result.status, BroadcastStatus::NoRecipients);
        assert_eq!(result.sent + result.failed + result.total_recipients, 0);
        // Nothing staged when there is no one to send to
        assert!(f.coordinator.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_targets_are_deduplicated() {
        let f = default_fixture(100);
        let (m1, h1) = handle("c1");
        let (_m2, h2) = handle("c2");
        f.coordinator.add_connection(&h1, Some("u1"));
        f.coordinator.add_connection(&h2, Some("u2"));

        let targets = vec!["u1".to_string(), "u1".to_string(), "ghost".to_string()];
        let result = f.coordinator.broadcast("x", Some(targets.as_slice())).await;

        assert_eq!(result.total_recipients, 1);
        assert_eq!(result.sent, 1);
        assert_eq!(m1.send_attempts(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_counted() {
        let f = default_fixture(100);
        let (_m1, h1) = handle("c1");
        let (m2, h2) = handle("c2");
        m2.fail_sends(true);
        f.coordinator.add_connection(&h1, None);
        f.coordinator.add_connection(&h2, None);

        let result = f.coordinator.broadcast("x", None).await;
        assert_eq!(result.sent, 1);
        assert_eq!(result.failed, 1);

        // Failing connection stays registered
        assert_eq!(f.coordinator.registry().len(), 2);
        let stats = f.coordinator.get_comprehensive_stats();
        assert_eq!(stats.coordinator.messages_failed, 1);
    }

    #[tokio::test]
    async fn test_slow_send_times_out() {
        let f = fixture(
            100,
            BoundedMessageBuffer::new(1_000_000, 1000),
            BroadcastConfig {
                send_timeout_ms: 20,
                batch_pause_ms: 0,
                ..BroadcastConfig::default()
            },
        );
        let (slow, h1) = handle("slow");
        slow.set_send_delay(Duration::from_millis(500));
        f.coordinator.add_connection(&h1, None);

        let result = f.coordinator.broadcast("x", None).await;
        assert_eq!(result.failed, 1);
        assert!(result.duration_ms < 500.0);
    }

    #[tokio::test]
    async fn test_batches_cover_every_recipient() {
        let f = fixture(
            100,
            BoundedMessageBuffer::new(1_000_000, 1000),
            BroadcastConfig {
                batch_size: 3,
                batch_pause_ms: 1,
                ..BroadcastConfig::default()
            },
        );
        let mut mocks = Vec::new();
        let mut handles = Vec::new();
        for i in 0..10 {
            let (mock, h) = handle(&format!("c{}", i));
            f.coordinator.add_connection(&h, None);
            mocks.push(mock);
            handles.push(h);
        }

        let result = f.coordinator.broadcast("x", None).await;
        assert_eq!(result.sent, 10);
        assert!(mocks.iter().all(|m| m.send_attempts() == 1));
    }

    #[tokio::test]
    async fn test_buffer_full_sends_nothing() {
        let f = fixture(
            100,
            BoundedMessageBuffer::with_compression(10, 10, 1024, false),
            BroadcastConfig::default(),
        );
        let (m1, h1) = handle("c1");
        f.coordinator.add_connection(&h1, None);

        let result = f.coordinator.broadcast_bytes(vec![0u8; 64], None).await;
        assert_eq!(result.status, BroadcastStatus::BufferFull);
        assert_eq!(result.sent, 0);
        assert_eq!(result.total_recipients, 1);
        assert_eq!(m1.send_attempts(), 0);
    }

    #[test]
    fn test_zero_cleanup_interval_rejected() {
        let mut settings = crate::config::Settings::default();
        settings.broadcast.cleanup_interval_seconds = 0;

        let result = BroadcastCoordinator::new(&settings, Arc::new(StaticMemorySampler::new(0)));
        assert!(matches!(result, Err(DeliveryError::Config(_))));
    }

    #[test]
    fn test_admission_control() {
        let f = default_fixture(950);
        let (_m1, h1) = handle("c1");

        assert!(!f.coordinator.add_connection(&h1, Some("u1")));
        assert!(f.coordinator.registry().is_empty());

        f.sampler.set(899);
        assert!(f.coordinator.add_connection(&h1, Some("u1")));

        let stats = f.coordinator.get_comprehensive_stats();
        assert_eq!(stats.coordinator.connections_rejected_memory, 1);
        assert_eq!(stats.coordinator.connections_added, 1);
    }

    #[test]
    fn test_sampling_failure_admits() {
        let f = default_fixture(950);
        f.sampler.set_failing(true);
        let (_m1, h1) = handle("c1");
        assert!(f.coordinator.add_connection(&h1, None));
    }

    #[test]
    fn test_warning_pressure_clears_buffer() {
        let f = default_fixture(100);
        f.coordinator.buffer().add_bytes(vec![1; 10], false);

        f.sampler.set(850);
        f.coordinator.monitor().check_now();

        assert!(f.coordinator.buffer().is_empty());
        let stats = f.coordinator.get_comprehensive_stats();
        assert_eq!(stats.coordinator.pressure_events, 1);
        assert_eq!(stats.coordinator.forced_reclamations, 0);
    }

    #[test]
    fn test_critical_pressure_reclaims_aggressively() {
        let f = default_fixture(990);
        f.coordinator.monitor().check_now();

        let stats = f.coordinator.get_comprehensive_stats();
        assert_eq!(stats.coordinator.forced_reclamations, 1);
        let events = stats.memory.recent_reclaim_events;
        assert_eq!(events.len(), 1);
        assert!(events[0].aggressive);
    }

    #[test]
    fn test_cleanup_cycle_sweeps_and_reclaims_above_threshold() {
        let f = default_fixture(100);
        let (m1, h1) = handle("c1");
        f.coordinator.add_connection(&h1, None);
        m1.set_state(crate::connection_manager::ConnectionState::Closed);

        let outcome = f.coordinator.run_cleanup_cycle();
        assert_eq!(outcome.stale_removed, 1);
        assert!(!outcome.reclaimed);

        f.sampler.set(750);
        assert!(f.coordinator.run_cleanup_cycle().reclaimed);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let f = default_fixture(100);
        assert!(f.coordinator.start());
        f.coordinator.buffer().add_bytes(vec![1; 10], false);

        f.coordinator.shutdown().await;
        f.coordinator.shutdown().await;

        let stats = f.coordinator.get_comprehensive_stats();
        assert!(stats.shut_down);
        assert!(!stats.cleanup_running);
        assert!(!stats.memory.monitoring_active);
        assert_eq!(stats.buffer.message_count, 0);
        assert_eq!(stats.coordinator.forced_reclamations, 1);

        let (_m1, h1) = handle("late");
        assert!(!f.coordinator.add_connection(&h1, None));
        assert!(!f.coordinator.start());
    }

    #[tokio::test]
    async fn test_cleanup_loop_runs_in_background() {
        let f = default_fixture(100);
        assert!(f.coordinator.start());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let cycles = f.coordinator.get_comprehensive_stats().coordinator.cleanup_cycles;
        assert!(cycles >= 1);

        f.coordinator.shutdown().await;
    }
}
