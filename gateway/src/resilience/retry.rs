//! Periodic retry sweep over the failed message store
//!
//! Each tick polls a bounded batch and, per message:
//!
//! 1. retries exhausted: dead-letter
//! 2. backoff not yet elapsed since `failed_at`: requeue unchanged
//! 3. otherwise: increment the retry count and republish through the
//!    shared [`Delivery`] path, requeueing or dead-lettering on failure
//!
//! Backoff is `base_delay * 2^min(retry_count, 5)`.

use super::delivery::{Delivery, StoreOutcome};
use crate::metrics;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Largest backoff exponent
pub const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Backoff in milliseconds before retry number `retry_count + 1`
pub fn backoff_delay(base_delay_ms: u64, retry_count: u32) -> u64 {
    base_delay_ms.saturating_mul(1 << retry_count.min(MAX_BACKOFF_EXPONENT))
}

/// Retry sweep configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Messages polled per sweep, including ones requeued as not yet due
    pub batch_size: usize,
    /// Republish attempts before dead-lettering
    pub max_attempts: u32,
    /// Backoff base
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Circuit was open, nothing polled
    pub skipped: bool,
    pub retried: usize,
    pub recovered: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

/// Drains the failed message store on a fixed interval
pub struct RetryScheduler {
    delivery: Arc<Delivery>,
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(delivery: Arc<Delivery>, config: RetryConfig) -> Self {
        Self { delivery, config }
    }

    /// Run one sweep now
    pub async fn run_once(&self) -> SweepReport {
        self.sweep_at(Utc::now().timestamp_millis()).await
    }

    /// Run one sweep as if the wall clock read `now_ms` (epoch millis)
    pub async fn sweep_at(&self, now_ms: i64) -> SweepReport {
        let mut report = SweepReport::default();
        let breaker = self.delivery.breaker();
        let store = self.delivery.store();

        if breaker.is_open() {
            debug!("Circuit is OPEN, skipping retry sweep");
            report.skipped = true;
            return report;
        }

        // Bounded by the size at sweep start so a requeued message is not
        // polled twice in one tick.
        let limit = self.config.batch_size.min(store.len());
        let base_ms = self.config.base_delay.as_millis() as u64;

        for _ in 0..limit {
            let Some(mut message) = store.poll() else {
                break;
            };

            if message.retry_count() >= self.config.max_attempts {
                warn!(
                    session_id = ?message.event().session_id,
                    retry_count = message.retry_count(),
                    "Max retry attempts reached, sending to DLQ"
                );
                let (event, key) = message.into_parts();
                self.delivery
                    .dead_letter(&event, &key, "Max retry attempts exceeded")
                    .await;
                metrics::try_record_retry("exhausted");
                report.dead_lettered += 1;
                continue;
            }

            let due_in = backoff_delay(base_ms, message.retry_count());
            let elapsed = now_ms.saturating_sub(message.failed_at());
            if elapsed < i64::try_from(due_in).unwrap_or(i64::MAX) {
                self.requeue(message, &mut report).await;
                continue;
            }

            // Another worker may have opened the circuit since the sweep began
            if breaker.is_open() {
                self.requeue(message, &mut report).await;
                debug!("Circuit opened mid-sweep, stopping");
                break;
            }

            message.increment_retry_count();
            self.delivery.record_retry();
            report.retried += 1;

            match self
                .delivery
                .attempt(message.event(), message.partition_key())
                .await
            {
                Ok(()) => {
                    self.delivery.record_recovered();
                    metrics::try_record_retry("recovered");
                    report.recovered += 1;
                    debug!(
                        session_id = ?message.event().session_id,
                        attempts = message.retry_count(),
                        "Retry successful"
                    );
                }
                Err(e) => {
                    metrics::try_record_retry("failed");
                    debug!(
                        session_id = ?message.event().session_id,
                        attempt = message.retry_count(),
                        error = %e,
                        "Retry failed"
                    );
                    if message.retry_count() < self.config.max_attempts {
                        self.requeue(message, &mut report).await;
                    } else {
                        let (event, key) = message.into_parts();
                        self.delivery
                            .dead_letter(&event, &key, &format!("Max retry attempts exceeded: {e}"))
                            .await;
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        if report.retried > 0 || report.requeued > 0 || report.dead_lettered > 0 {
            debug!(
                retried = report.retried,
                recovered = report.recovered,
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                remaining = store.len(),
                "Retry batch complete"
            );
        }
        report
    }

    async fn requeue(&self, message: super::FailedMessage, report: &mut SweepReport) {
        match self.delivery.requeue(message).await {
            StoreOutcome::Stored => report.requeued += 1,
            StoreOutcome::DeadLettered => report.dead_lettered += 1,
        }
    }

    /// Start sweeping in the background
    ///
    /// The first sweep happens one interval after the call.
    pub fn spawn(self) -> RetrySchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.config.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_ms = interval.as_millis() as u64, "Retry scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Not raced against shutdown: a started sweep finishes
                        self.run_once().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Retry scheduler stopped");
        });

        RetrySchedulerHandle { shutdown_tx, task }
    }
}

/// Owned handle to a running [`RetryScheduler`]
pub struct RetrySchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetrySchedulerHandle {
    /// Stop the scheduler and wait for any in-flight sweep
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Retry scheduler task ended abnormally");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::event::{AccountingEvent, ActionType};
    use crate::publish::{DeadLetterSink, Publisher};
    use crate::resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, FailedMessage, FailedMessageStore,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Publisher whose health can be flipped during a test
    #[derive(Default)]
    struct SwitchPublisher {
        down: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Publisher for SwitchPublisher {
        fn name(&self) -> &'static str {
            "switch"
        }

        async fn publish(&self, _: &AccountingEvent, _: &str) -> Result<(), PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(PublishError::Connection("down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        reasons: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeadLetterSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, _: &AccountingEvent, _: &str, reason: &str) -> Result<(), PublishError> {
            self.reasons.lock().push(reason.to_string());
            Ok(())
        }
    }

    struct Fixture {
        publisher: Arc<SwitchPublisher>,
        sink: Arc<RecordingSink>,
        delivery: Arc<Delivery>,
    }

    fn fixture(threshold: u32, capacity: usize) -> Fixture {
        let publisher = Arc::new(SwitchPublisher::default());
        let sink = Arc::new(RecordingSink::default());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(60),
        }));
        let delivery = Arc::new(Delivery::new(
            publisher.clone(),
            sink.clone(),
            breaker,
            Arc::new(FailedMessageStore::new(capacity)),
        ));
        Fixture {
            publisher,
            sink,
            delivery,
        }
    }

    fn scheduler(delivery: &Arc<Delivery>, batch_size: usize) -> RetryScheduler {
        RetryScheduler::new(
            Arc::clone(delivery),
            RetryConfig {
                interval: Duration::from_millis(50),
                batch_size,
                max_attempts: 3,
                base_delay: Duration::from_millis(1000),
            },
        )
    }

    fn message(session: &str, failed_at: i64) -> FailedMessage {
        let event = AccountingEvent::builder(ActionType::Stop, "10.0.0.1")
            .session_id(session)
            .build();
        let key = event.partition_key();
        FailedMessage::new(event, key).with_failed_at(failed_at)
    }

    fn retried(mut message: FailedMessage, times: u32) -> FailedMessage {
        for _ in 0..times {
            message.increment_retry_count();
        }
        message
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1000, 0), 1000);
        assert_eq!(backoff_delay(1000, 1), 2000);
        assert_eq!(backoff_delay(1000, 3), 8000);
        assert_eq!(backoff_delay(1000, 5), 32000);
        assert_eq!(backoff_delay(1000, 10), 32000);
    }

    #[tokio::test]
    async fn test_due_message_is_recovered() {
        let f = fixture(5, 10);
        f.delivery.store().push(message("S1", 0)).unwrap();

        let report = scheduler(&f.delivery, 10).sweep_at(1_000).await;

        assert_eq!(report.retried, 1);
        assert_eq!(report.recovered, 1);
        assert!(f.delivery.store().is_empty());
        let snapshot = f.delivery.snapshot();
        assert_eq!(snapshot.total_retries, 1);
        assert_eq!(snapshot.total_recovered, 1);
    }

    #[tokio::test]
    async fn test_not_due_message_is_requeued_unchanged() {
        let f = fixture(5, 10);
        f.delivery.store().push(message("S1", 0)).unwrap();

        let report = scheduler(&f.delivery, 10).sweep_at(999).await;

        assert_eq!(report.requeued, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(f.publisher.calls.load(Ordering::SeqCst), 0);
        let kept = f.delivery.store().poll().unwrap();
        assert_eq!(kept.retry_count(), 0);
        assert_eq!(kept.failed_at(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered() {
        let f = fixture(5, 10);
        f.delivery
            .store()
            .push(retried(message("S1", 0), 3))
            .unwrap();

        let report = scheduler(&f.delivery, 10).sweep_at(1_000_000).await;

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(f.publisher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            f.sink.reasons.lock().as_slice(),
            ["Max retry attempts exceeded".to_string()]
        );
        assert_eq!(f.delivery.snapshot().total_dlq_messages, 1);
    }

    #[tokio::test]
    async fn test_failed_retry_requeues_then_dead_letters() {
        let f = fixture(100, 10);
        f.publisher.down.store(true, Ordering::SeqCst);
        f.delivery.store().push(retried(message("S1", 0), 1)).unwrap();
        let scheduler = scheduler(&f.delivery, 10);

        // retry 2 of 3 fails, back in the store
        let report = scheduler.sweep_at(2_000).await;
        assert_eq!(report.retried, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(f.delivery.store().len(), 1);

        // retry 3 of 3 fails, escalated
        let report = scheduler.sweep_at(4_000).await;
        assert_eq!(report.retried, 1);
        assert_eq!(report.dead_lettered, 1);
        assert!(f.delivery.store().is_empty());
        assert_eq!(f.delivery.snapshot().total_failures, 2);
    }

    #[tokio::test]
    async fn test_batch_cap_counts_requeued_messages() {
        let f = fixture(5, 100);
        for i in 0..5 {
            f.delivery
                .store()
                .push(message(&format!("S{i}"), 10_000))
                .unwrap();
        }

        let report = scheduler(&f.delivery, 3).sweep_at(10_500).await;

        assert_eq!(report.requeued, 3);
        assert_eq!(f.delivery.store().len(), 5);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_sweep() {
        let f = fixture(1, 10);
        f.delivery.breaker().record_failure();
        f.delivery.store().push(message("S1", 0)).unwrap();

        let report = scheduler(&f.delivery, 10).sweep_at(1_000_000).await;

        assert!(report.skipped);
        assert_eq!(f.delivery.store().len(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_sweep_stops_batch() {
        let f = fixture(1, 10);
        f.publisher.down.store(true, Ordering::SeqCst);
        for i in 0..3 {
            f.delivery.store().push(message(&format!("S{i}"), 0)).unwrap();
        }

        let report = scheduler(&f.delivery, 10).sweep_at(1_000_000).await;

        assert_eq!(report.retried, 1);
        assert_eq!(f.delivery.breaker().state(), CircuitState::Open);
        assert_eq!(f.delivery.store().len(), 3);
        assert_eq!(f.publisher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_scheduler_drains_and_shuts_down() {
        let f = fixture(5, 10);
        f.delivery
            .store()
            .push(message("S1", Utc::now().timestamp_millis() - 60_000))
            .unwrap();

        let handle = scheduler(&f.delivery, 10).spawn();

        for _ in 0..100 {
            if f.delivery.store().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(f.delivery.store().is_empty());
        assert_eq!(f.delivery.snapshot().total_recovered, 1);
    }
}
