use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Smallest period accepted; `tokio::time::interval` panics on zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A repeating background action with cooperative cancellation.
///
/// `stop()` signals the loop and awaits it, so once it returns no tick is
/// running or will run again. Dropping without `stop()` aborts the task.
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn on the current tokio runtime. The first tick fires one full
    /// `period` after spawning. Returns `None` outside a runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(task = name, error = %e, "Cannot start periodic task outside a tokio runtime");
                return None;
            }
        };

        let period = period.max(MIN_PERIOD);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = runtime.spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Skip immediate first tick
            timer.tick().await;

            tracing::info!(
                task = name,
                period_ms = period.as_millis() as u64,
                "Periodic task started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = name, "Periodic task received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        tick().await;
                    }
                }
            }

            tracing::info!(task = name, "Periodic task stopped");
        });

        Some(Self {
            name,
            shutdown_tx,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Signal the loop and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(task = self.name, "Periodic task panicked");
                }
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let task = PeriodicTask::spawn("test", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .expect("inside runtime");

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::timeout(Duration::from_secs(2), task.stop())
            .await
            .expect("Task should stop");

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_spawn_outside_runtime_returns_none() {
        let task = PeriodicTask::spawn("orphan", Duration::from_millis(10), || async {});
        assert!(task.is_none());
    }

    #[tokio::test]
    async fn test_drop_aborts_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let task = PeriodicTask::spawn("dropped", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .expect("inside runtime");
        drop(task);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
