//! Broker producer port.
//!
//! The sweeper hands outbox rows to a producer; the wire-level client behind
//! it (AMQP, NATS, Kafka, ...) lives outside this crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error)]
#[error("broker send failed: {reason}")]
pub struct ProducerError {
    pub reason: String,
}

impl ProducerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    /// Send one message and wait for broker acknowledgement.
    async fn send(&self, message: &Message) -> Result<(), ProducerError>;

    /// Send a run of same-topic messages in one broker call.
    ///
    /// The default forwards message by message; producers that can do better
    /// override this and report it through
    /// [`supports_batch`](Producer::supports_batch).
    async fn send_batch(&self, messages: &[Message]) -> Result<(), ProducerError> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }

    /// Whether [`send_batch`](Producer::send_batch) is a genuine single
    /// broker call. Bulk sweeping requires it.
    fn supports_batch(&self) -> bool {
        false
    }
}
