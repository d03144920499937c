//! Outbox sweeper.
//!
//! The [`ExternalBusService`] drains outstanding outbox rows to the broker:
//! explicitly by id, on demand by age window, or continuously on an interval.
//! Broker acceptance marks the row dispatched; exhausted retries leave it
//! outstanding for a later sweep, so delivery is at-least-once. One failing
//! row never stalls the rest of a batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::message::Message;
use crate::port::outbox::{OutboxError, OutboxStore};
use crate::port::producer::Producer;
use crate::port::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Maximum messages fetched per sweep.
    pub batch_size: usize,
    /// Only rows at least this old are swept, leaving fresh rows to the
    /// transaction that produced them.
    pub minimum_age: Duration,
    /// Interval between sweeps when driven by [`ExternalBusService::run`].
    pub sweep_interval: Duration,
    /// Group contiguous same-topic runs into one producer call. Requires a
    /// producer with batch support.
    pub use_bulk: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            minimum_age: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(5),
            use_bulk: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SweeperError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] OutboxError),
}

/// Counters for sweeper activity.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    swept: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

impl SweeperMetrics {
    /// Outstanding rows picked up by sweeps.
    pub fn swept(&self) -> u64 {
        self.swept.load(Ordering::SeqCst)
    }

    /// Rows accepted by the broker and marked dispatched.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Rows whose retries were exhausted; they stay outstanding.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Background dispatcher for staged outbox messages.
pub struct ExternalBusService {
    outbox: Arc<dyn OutboxStore>,
    producer: Arc<dyn Producer>,
    retry: Arc<dyn RetryPolicy>,
    config: SweeperConfig,
    metrics: Arc<SweeperMetrics>,
}

impl ExternalBusService {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        producer: Arc<dyn Producer>,
        retry: Arc<dyn RetryPolicy>,
        config: SweeperConfig,
    ) -> Result<Self, SweeperError> {
        if config.use_bulk && !producer.supports_batch() {
            return Err(SweeperError::Configuration(
                "bulk dispatch requires a producer with batch support".to_string(),
            ));
        }
        Ok(Self {
            outbox,
            producer,
            retry,
            config,
            metrics: Arc::new(SweeperMetrics::default()),
        })
    }

    pub fn metrics(&self) -> Arc<SweeperMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Dispatch the listed outstanding messages now. Ids that no longer
    /// exist are skipped.
    pub async fn clear_outbox(&self, ids: &[Uuid]) -> Result<(), SweeperError> {
        let messages = self.outbox.get_many(ids).await?;
        if messages.len() < ids.len() {
            debug!(
                requested = ids.len(),
                found = messages.len(),
                "some requested outbox messages no longer exist"
            );
        }
        self.metrics
            .swept
            .fetch_add(messages.len() as u64, Ordering::SeqCst);
        self.dispatch(&messages).await;
        Ok(())
    }

    /// Select up to `amount` outstanding messages at least `minimum_age` old
    /// and dispatch them. Returns how many were picked up.
    pub async fn sweep(&self, amount: usize, minimum_age: Duration) -> Result<usize, SweeperError> {
        let messages = self
            .outbox
            .outstanding_messages(minimum_age, amount, 1)
            .await?;
        if messages.is_empty() {
            return Ok(0);
        }
        debug!(count = messages.len(), "sweeping outstanding outbox messages");
        self.metrics
            .swept
            .fetch_add(messages.len() as u64, Ordering::SeqCst);
        self.dispatch(&messages).await;
        Ok(messages.len())
    }

    /// Sweep on an interval until the shutdown broadcast fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.sweep_interval.as_millis() as u64,
            bulk = self.config.use_bulk,
            "outbox sweeper started"
        );
        let mut ticker = tokio::time::interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("outbox sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(self.config.batch_size, self.config.minimum_age).await {
                        error!(error = %e, "sweep failed");
                    }
                }
            }
        }
    }

    async fn dispatch(&self, messages: &[Message]) {
        if self.config.use_bulk {
            for run in contiguous_topic_runs(messages) {
                self.dispatch_bulk(run).await;
            }
        } else {
            for message in messages {
                self.dispatch_one(message).await;
            }
        }
    }

    /// One message, retried under the policy. Failures are isolated: the row
    /// stays outstanding and the batch moves on.
    async fn dispatch_one(&self, message: &Message) -> bool {
        for attempt in 0..self.retry.max_attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }
            match self.producer.send(message).await {
                Ok(()) => {
                    if let Err(e) = self.outbox.mark_dispatched(message.id(), None).await {
                        // The broker has the message; the row will be resent
                        // on a later sweep (at-least-once).
                        error!(message_id = %message.id(), error = %e, "failed to mark message dispatched");
                    }
                    self.metrics.dispatched.fetch_add(1, Ordering::SeqCst);
                    return true;
                }
                Err(e) => {
                    warn!(message_id = %message.id(), attempt, error = %e, "producer send failed");
                }
            }
        }
        warn!(message_id = %message.id(), "retries exhausted, message stays outstanding");
        self.metrics.failed.fetch_add(1, Ordering::SeqCst);
        false
    }

    /// A contiguous same-topic run as one producer call; a failed batch
    /// falls back to per-message dispatch with retries.
    async fn dispatch_bulk(&self, run: &[Message]) {
        match self.producer.send_batch(run).await {
            Ok(()) => {
                let ids: Vec<Uuid> = run.iter().map(Message::id).collect();
                if let Err(e) = self.outbox.mark_dispatched_batch(&ids, None).await {
                    error!(count = ids.len(), error = %e, "failed to mark batch dispatched");
                }
                self.metrics
                    .dispatched
                    .fetch_add(run.len() as u64, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(
                    topic = run[0].topic(),
                    count = run.len(),
                    error = %e,
                    "batch send failed, falling back to per-message dispatch"
                );
                for message in run {
                    self.dispatch_one(message).await;
                }
            }
        }
    }
}

/// Split a batch into maximal runs of adjacent messages sharing a topic.
fn contiguous_topic_runs(messages: &[Message]) -> Vec<&[Message]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=messages.len() {
        if i == messages.len() || messages[i].topic() != messages[start].topic() {
            runs.push(&messages[start..i]);
            start = i;
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MessageHeader, MessageType};
    use crate::outbox::InMemoryOutbox;
    use crate::port::producer::ProducerError;
    use crate::port::retry::ExponentialBackoff;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn aged_event(topic: &str, age: Duration) -> Message {
        let mut header = MessageHeader::new(Uuid::new_v4(), topic, MessageType::Event);
        header.timestamp = Utc::now() - chrono::Duration::milliseconds(age.as_millis() as i64);
        Message::new(header, MessageBody::new(r#"{"n":1}"#))
    }

    /// Producer that records sends and fails on demand.
    #[derive(Default)]
    struct RecordingProducer {
        sent: Mutex<Vec<Uuid>>,
        batches: Mutex<Vec<usize>>,
        fail_topic: Option<String>,
        fail_batches: bool,
        batch_capable: bool,
    }

    impl RecordingProducer {
        fn batching() -> Self {
            Self {
                batch_capable: true,
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<Uuid> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Producer for RecordingProducer {
        async fn send(&self, message: &Message) -> Result<(), ProducerError> {
            if self
                .fail_topic
                .as_deref()
                .is_some_and(|t| t == message.topic())
            {
                return Err(ProducerError::new("simulated broker failure"));
            }
            self.sent.lock().push(message.id());
            Ok(())
        }

        async fn send_batch(&self, messages: &[Message]) -> Result<(), ProducerError> {
            if self.fail_batches {
                return Err(ProducerError::new("simulated batch failure"));
            }
            self.batches.lock().push(messages.len());
            for message in messages {
                self.sent.lock().push(message.id());
            }
            Ok(())
        }

        fn supports_batch(&self) -> bool {
            self.batch_capable
        }
    }

    fn immediate_retry(attempts: u32) -> Arc<dyn RetryPolicy> {
        Arc::new(ExponentialBackoff {
            base: Duration::ZERO,
            max: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: attempts,
        })
    }

    fn service(
        outbox: Arc<InMemoryOutbox>,
        producer: Arc<RecordingProducer>,
        config: SweeperConfig,
    ) -> ExternalBusService {
        ExternalBusService::new(outbox, producer, immediate_retry(2), config).unwrap()
    }

    #[tokio::test]
    async fn sweep_dispatches_and_marks_outstanding_rows() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let m1 = aged_event("orders", Duration::from_secs(10));
        let m2 = aged_event("orders", Duration::from_secs(10));
        outbox.add_batch(&[m1.clone(), m2.clone()]).await.unwrap();

        let producer = Arc::new(RecordingProducer::default());
        let bus = service(outbox.clone(), producer.clone(), SweeperConfig::default());

        let swept = bus.sweep(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(swept, 2);
        assert_eq!(producer.sent().len(), 2);
        assert_eq!(outbox.outstanding_count().await.unwrap(), 0);
        assert_eq!(bus.metrics().dispatched(), 2);
        assert_eq!(bus.metrics().failed(), 0);
    }

    #[tokio::test]
    async fn sweep_honours_the_minimum_age_window() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let old = aged_event("orders", Duration::from_secs(10));
        let fresh = aged_event("orders", Duration::ZERO);
        outbox.add_batch(&[old.clone(), fresh.clone()]).await.unwrap();

        let producer = Arc::new(RecordingProducer::default());
        let bus = service(outbox.clone(), producer.clone(), SweeperConfig::default());

        let swept = bus.sweep(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(producer.sent(), vec![old.id()]);
        assert_eq!(outbox.outstanding_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_row_outstanding() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let message = aged_event("orders", Duration::from_secs(10));
        outbox.add(&message).await.unwrap();

        let producer = Arc::new(RecordingProducer {
            fail_topic: Some("orders".to_string()),
            ..Default::default()
        });
        let bus = service(outbox.clone(), producer.clone(), SweeperConfig::default());

        bus.sweep(10, Duration::ZERO).await.unwrap();

        assert_eq!(outbox.outstanding_count().await.unwrap(), 1);
        assert_eq!(bus.metrics().failed(), 1);
        assert_eq!(bus.metrics().dispatched(), 0);

        // A later sweep re-attempts the same row.
        let swept = bus.sweep(10, Duration::ZERO).await.unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn one_failing_row_does_not_stall_the_batch() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let bad = aged_event("poison", Duration::from_secs(10));
        let good = aged_event("orders", Duration::from_secs(8));
        outbox.add_batch(&[bad.clone(), good.clone()]).await.unwrap();

        let producer = Arc::new(RecordingProducer {
            fail_topic: Some("poison".to_string()),
            ..Default::default()
        });
        let bus = service(outbox.clone(), producer.clone(), SweeperConfig::default());

        bus.sweep(10, Duration::ZERO).await.unwrap();

        assert_eq!(producer.sent(), vec![good.id()]);
        assert_eq!(outbox.outstanding_count().await.unwrap(), 1);
        assert_eq!(bus.metrics().dispatched(), 1);
        assert_eq!(bus.metrics().failed(), 1);
    }

    #[tokio::test]
    async fn clear_outbox_dispatches_listed_ids_and_skips_missing_ones() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let listed = aged_event("orders", Duration::from_secs(10));
        let unlisted = aged_event("orders", Duration::from_secs(10));
        outbox
            .add_batch(&[listed.clone(), unlisted.clone()])
            .await
            .unwrap();

        let producer = Arc::new(RecordingProducer::default());
        let bus = service(outbox.clone(), producer.clone(), SweeperConfig::default());

        bus.clear_outbox(&[listed.id(), Uuid::new_v4()]).await.unwrap();

        assert_eq!(producer.sent(), vec![listed.id()]);
        assert_eq!(outbox.outstanding_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_mode_groups_contiguous_topics() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let messages = vec![
            aged_event("orders", Duration::from_secs(40)),
            aged_event("orders", Duration::from_secs(30)),
            aged_event("billing", Duration::from_secs(20)),
            aged_event("orders", Duration::from_secs(10)),
        ];
        outbox.add_batch(&messages).await.unwrap();

        let producer = Arc::new(RecordingProducer::batching());
        let bus = service(
            outbox.clone(),
            producer.clone(),
            SweeperConfig {
                use_bulk: true,
                ..Default::default()
            },
        );

        bus.sweep(10, Duration::ZERO).await.unwrap();

        assert_eq!(producer.batches.lock().clone(), vec![2, 1, 1]);
        assert_eq!(outbox.outstanding_count().await.unwrap(), 0);
        assert_eq!(bus.metrics().dispatched(), 4);
    }

    #[tokio::test]
    async fn failed_batches_fall_back_to_per_message_dispatch() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let messages = vec![
            aged_event("orders", Duration::from_secs(20)),
            aged_event("orders", Duration::from_secs(10)),
        ];
        outbox.add_batch(&messages).await.unwrap();

        let producer = Arc::new(RecordingProducer {
            fail_batches: true,
            batch_capable: true,
            ..Default::default()
        });
        let bus = service(
            outbox.clone(),
            producer.clone(),
            SweeperConfig {
                use_bulk: true,
                ..Default::default()
            },
        );

        bus.sweep(10, Duration::ZERO).await.unwrap();

        assert_eq!(producer.sent().len(), 2);
        assert_eq!(outbox.outstanding_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_without_batch_support_is_a_configuration_error() {
        let outbox: Arc<dyn OutboxStore> = Arc::new(InMemoryOutbox::new());
        let producer: Arc<dyn Producer> = Arc::new(RecordingProducer::default());

        let result = ExternalBusService::new(
            outbox,
            producer,
            immediate_retry(1),
            SweeperConfig {
                use_bulk: true,
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(SweeperError::Configuration(_))));
    }

    #[tokio::test]
    async fn run_loop_sweeps_until_shutdown() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let message = aged_event("orders", Duration::from_secs(10));
        outbox.add(&message).await.unwrap();

        let producer = Arc::new(RecordingProducer::default());
        let bus = Arc::new(service(
            outbox.clone(),
            producer.clone(),
            SweeperConfig {
                sweep_interval: Duration::from_millis(10),
                minimum_age: Duration::ZERO,
                ..Default::default()
            },
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.run(shutdown_rx).await })
        };

        for _ in 0..100 {
            if outbox.outstanding_count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(outbox.outstanding_count().await.unwrap(), 0);

        shutdown_tx.send(()).unwrap();
        worker.await.unwrap();
    }

    #[test]
    fn contiguous_runs_split_on_topic_change() {
        let messages = vec![
            aged_event("a", Duration::ZERO),
            aged_event("a", Duration::ZERO),
            aged_event("b", Duration::ZERO),
            aged_event("a", Duration::ZERO),
        ];
        let runs = contiguous_topic_runs(&messages);
        let sizes: Vec<usize> = runs.iter().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert!(contiguous_topic_runs(&[]).is_empty());
    }
}
