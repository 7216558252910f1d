use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Named fixed-interval background loops: project sync, schedule reload.
///
/// Each task runs on its own tokio task; a tick that panics is contained
/// and logged, a tick that errors is logged, and the loop keeps going
/// either way.
#[derive(Default)]
pub struct PeriodicTaskRunner {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PeriodicTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start a periodic task. A zero interval is a
    /// misconfiguration guard: the task is skipped entirely. Re-registering
    /// an existing name replaces (and cancels) the previous loop. With
    /// `run_immediately` the first tick happens before the first sleep.
    pub async fn run_function_periodically<F, Fut>(
        &self,
        name: &str,
        interval: Duration,
        run_immediately: bool,
        tick: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if interval.is_zero() {
            warn!(task = name, "periodic task has zero interval, not starting");
            return;
        }
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            info!(task = %task_name, ?interval, "periodic task started");
            let mut first = true;
            loop {
                if !(first && run_immediately) {
                    tokio::time::sleep(interval).await;
                }
                first = false;
                let run_name = task_name.clone();
                let tick_run = tokio::spawn(tick());
                match tick_run.await {
                    Ok(Ok(())) => debug!(task = %run_name, "periodic task tick completed"),
                    Ok(Err(err)) => {
                        warn!(task = %run_name, error = %err, "periodic task tick failed")
                    }
                    Err(join_err) => {
                        warn!(task = %run_name, error = %join_err, "periodic task tick panicked")
                    }
                }
            }
        });
        if let Some(previous) = self.tasks.lock().await.insert(name.to_string(), handle) {
            warn!(task = name, "replacing existing periodic task");
            previous.abort();
        }
    }

    /// Cancel a single task. Cancelling an unknown name is a no-op.
    pub async fn cancel_periodic_function(&self, name: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(name) {
            handle.abort();
            info!(task = name, "periodic task cancelled");
        }
    }

    /// Cancel every registered task. Used on shutdown.
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (name, handle) in tasks.drain() {
            handle.abort();
            info!(task = %name, "periodic task cancelled");
        }
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.tasks.lock().await.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn task_ticks_on_interval() {
        let runner = PeriodicTaskRunner::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        runner
            .run_function_periodically("ticker", Duration::from_millis(50), false, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        tokio::time::sleep(Duration::from_millis(275)).await;
        runner.cancel_all().await;
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn run_immediately_ticks_before_the_first_sleep() {
        let runner = PeriodicTaskRunner::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        runner
            .run_function_periodically("eager", Duration::from_secs(3600), true, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.cancel_all().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_interval_is_skipped() {
        let runner = PeriodicTaskRunner::new();
        runner
            .run_function_periodically("never", Duration::ZERO, false, || async { Ok(()) })
            .await;
        assert!(!runner.is_registered("never").await);
    }

    #[tokio::test]
    async fn failing_tick_keeps_the_loop_alive() {
        let runner = PeriodicTaskRunner::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        runner
            .run_function_periodically("flaky", Duration::from_millis(50), false, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("tick went sideways")
                }
            })
            .await;
        tokio::time::sleep(Duration::from_millis(180)).await;
        runner.cancel_all().await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancel_stops_the_loop() {
        let runner = PeriodicTaskRunner::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        runner
            .run_function_periodically("short-lived", Duration::from_millis(30), false, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        runner.cancel_periodic_function("short-lived").await;
        let after_cancel = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
        assert!(!runner.is_registered("short-lived").await);
    }
}
