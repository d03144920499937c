//! In-memory channel.
//!
//! A bounded FIFO queue implementing the [`Channel`] port for in-process
//! wiring and tests. Broker-backed channels live in adapter crates; this one
//! keeps the full contract — timeout sentinel, idempotent acknowledge, tail
//! requeue, dead-letter reject — without a broker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::message::Message;
use crate::port::channel::{Channel, ChannelError};

/// Counters for channel activity.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    acknowledged: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
}

impl ChannelMetrics {
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

/// Bounded in-memory channel.
pub struct InMemoryChannel {
    tx: mpsc::Sender<Message>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    in_flight: Mutex<HashSet<Uuid>>,
    dead_letters: Mutex<Vec<Message>>,
    metrics: ChannelMetrics,
}

impl InMemoryChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            in_flight: Mutex::new(HashSet::new()),
            dead_letters: Mutex::new(Vec::new()),
            metrics: ChannelMetrics::default(),
        }
    }

    /// Producer side: enqueue a message, waiting if the channel is full.
    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Enqueue the in-band stop signal for the consuming pump.
    pub async fn stop(&self) -> Result<(), ChannelError> {
        self.send(Message::quit()).await
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.metrics
    }

    /// Messages moved to the dead-letter buffer by [`Channel::reject`].
    pub fn dead_letters(&self) -> Vec<Message> {
        self.dead_letters.lock().clone()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn receive(&self, timeout: Duration) -> Result<Message, ChannelError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(Message::sentinel()),
            Ok(None) => Err(ChannelError::Closed),
            Ok(Some(message)) => {
                self.in_flight.lock().insert(message.id());
                Ok(message)
            }
        }
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), ChannelError> {
        if self.in_flight.lock().remove(&message.id()) {
            self.metrics.acknowledged.fetch_add(1, Ordering::SeqCst);
        } else {
            debug!(message_id = %message.id(), "acknowledge for a delivery no longer in flight");
        }
        Ok(())
    }

    async fn requeue(&self, message: Message, delay: Duration) -> Result<(), ChannelError> {
        self.in_flight.lock().remove(&message.id());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| ChannelError::Closed)?;
        self.metrics.requeued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self, message: &Message) -> Result<(), ChannelError> {
        self.in_flight.lock().remove(&message.id());
        self.dead_letters.lock().push(message.clone());
        self.metrics.rejected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        debug!("in-memory channel closed");
    }
}
