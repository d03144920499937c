//! Channel port.
//!
//! A channel is the bounded, reorder-free queue between a broker client and a
//! message pump. Delivery is at-least-once; FIFO holds for messages that are
//! never requeued. Requeued messages join at the tail.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("broker failure: {0}")]
    Broker(String),
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Block up to `timeout` for the next message.
    ///
    /// An empty channel returns the [`Message::sentinel`] envelope rather
    /// than an error, so the pump can distinguish "nothing yet" from failure.
    async fn receive(&self, timeout: Duration) -> Result<Message, ChannelError>;

    /// Remove the message from the in-flight set.
    ///
    /// Idempotent for the same delivery: acknowledging twice is a no-op.
    async fn acknowledge(&self, message: &Message) -> Result<(), ChannelError>;

    /// Return the message to the tail of the queue after `delay`.
    ///
    /// A zero delay requeues immediately.
    async fn requeue(&self, message: Message, delay: Duration) -> Result<(), ChannelError>;

    /// Move the message to the dead-letter buffer. It is not requeued.
    async fn reject(&self, message: &Message) -> Result<(), ChannelError>;

    /// Release broker resources.
    async fn close(&self);
}
