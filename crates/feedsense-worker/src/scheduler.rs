//! Scheduler loop: bootstrap sweep, then LISTEN/NOTIFY or timeout driven sweeps.
//!
//! Shutdown: trip the [`CancellationToken`] passed to [`Scheduler::run`]. The token is checked
//! while waiting and between iterations; a sweep that already started always finishes (or
//! fails) as a unit.

use std::sync::Arc;
use std::time::Duration;

use feedsense_core::{WorkerConfig, WorkerError};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::listener::{NotificationSource, Subscriber};
use crate::sweep::SweepExecutor;

/// Computes backoff in seconds after `failures` consecutive failures (exponential with cap).
#[inline]
pub(crate) fn compute_backoff_seconds(failures: u32, max_secs: u64) -> u64 {
    2_u64
        .checked_pow(failures.saturating_sub(1))
        .unwrap_or(u64::MAX)
        .min(max_secs)
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub channel: String,
    pub batch_limit: i64,
    pub notify_batch_limit: i64,
    pub poll_timeout: Duration,
    pub max_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            channel: "feedback_new".to_string(),
            batch_limit: 100,
            notify_batch_limit: 50,
            poll_timeout: Duration::from_secs(5),
            max_backoff_secs: 60,
        }
    }
}

impl From<&WorkerConfig> for SchedulerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            batch_limit: config.batch_limit,
            notify_batch_limit: config.notify_batch_limit,
            poll_timeout: config.poll_timeout(),
            max_backoff_secs: config.max_backoff_secs,
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub sweeps: u64,
    pub items_processed: u64,
    pub failed_sweeps: u64,
    pub notifications: u64,
    pub timeouts: u64,
    pub resubscriptions: u64,
}

pub struct Scheduler {
    executor: SweepExecutor,
    subscriber: Arc<dyn Subscriber>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        executor: SweepExecutor,
        subscriber: Arc<dyn Subscriber>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            executor,
            subscriber,
            config,
        }
    }

    /// Run until `cancel` is tripped or a fatal error occurs.
    ///
    /// Recoverable sweep failures are logged and retried after an exponential backoff;
    /// items of a failed batch stay pending. A lost notification connection is re-opened,
    /// and until that succeeds the loop keeps sweeping on the timeout alone.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SchedulerStats, WorkerError> {
        tracing::info!(
            channel = %self.config.channel,
            batch_limit = self.config.batch_limit,
            notify_batch_limit = self.config.notify_batch_limit,
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            "Feedback worker started"
        );

        let mut stats = SchedulerStats::default();
        let mut failures: u32 = 0;

        // Subscribe before the bootstrap sweep so rows inserted while it runs still wake us.
        let mut listener = self.subscribe().await;

        self.sweep(self.config.batch_limit, &mut stats, &mut failures, &cancel)
            .await?;
        let mut last_sweep = Instant::now();

        let mut disconnects: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let limit = match listener.as_mut() {
                Some(source) => {
                    let polled = tokio::select! {
                        _ = cancel.cancelled() => break,
                        polled = source.poll(self.config.poll_timeout) => polled,
                    };
                    match polled {
                        Ok(true) => {
                            disconnects = 0;
                            stats.notifications += 1;
                            self.config.notify_batch_limit
                        }
                        Ok(false) => {
                            disconnects = 0;
                            stats.timeouts += 1;
                            self.config.batch_limit
                        }
                        Err(e) => {
                            disconnects += 1;
                            tracing::warn!(error = %e, "Notification listener lost, re-subscribing");
                            listener = None;
                            if disconnects > 1 {
                                let backoff = compute_backoff_seconds(
                                    disconnects - 1,
                                    self.config.max_backoff_secs,
                                );
                                tokio::select! {
                                    _ = cancel.cancelled() => break,
                                    _ = sleep(Duration::from_secs(backoff)) => {}
                                }
                            }
                            stats.resubscriptions += 1;
                            listener = self.subscribe().await;
                            // A listener that keeps dropping must not starve the timed sweep.
                            if last_sweep.elapsed() < self.config.poll_timeout {
                                continue;
                            }
                            stats.timeouts += 1;
                            self.config.batch_limit
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(self.config.poll_timeout) => {}
                    }
                    stats.timeouts += 1;
                    stats.resubscriptions += 1;
                    listener = self.subscribe().await;
                    self.config.batch_limit
                }
            };

            self.sweep(limit, &mut stats, &mut failures, &cancel).await?;
            last_sweep = Instant::now();
        }

        tracing::info!(
            sweeps = stats.sweeps,
            items_processed = stats.items_processed,
            failed_sweeps = stats.failed_sweeps,
            "Feedback worker stopped"
        );
        Ok(stats)
    }

    async fn subscribe(&self) -> Option<Box<dyn NotificationSource>> {
        match self.subscriber.subscribe(&self.config.channel).await {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Subscribe failed, falling back to timed sweeps until the next attempt"
                );
                None
            }
        }
    }

    /// One sweep plus error handling. Only fatal errors are returned.
    async fn sweep(
        &self,
        limit: i64,
        stats: &mut SchedulerStats,
        failures: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        stats.sweeps += 1;
        match self.executor.sweep(limit).await {
            Ok(processed) => {
                *failures = 0;
                stats.items_processed += processed as u64;
                if processed == 0 {
                    tracing::debug!("No pending rows; sleeping");
                }
                Ok(())
            }
            Err(e) if !e.is_recoverable() => {
                tracing::error!(error = %e, "Fatal error during sweep, stopping worker");
                Err(e)
            }
            Err(e) => {
                *failures += 1;
                stats.failed_sweeps += 1;
                let backoff = compute_backoff_seconds(*failures, self.config.max_backoff_secs);
                tracing::warn!(
                    error = %e,
                    consecutive_failures = *failures,
                    backoff_seconds = backoff,
                    "Sweep failed, batch left pending"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(Duration::from_secs(backoff)) => {}
                }
                Ok(())
            }
        }
    }
}
