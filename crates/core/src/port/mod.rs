//! Ports for the infrastructure seams of the dispatcher.
//!
//! This crate has zero infrastructure dependencies; everything a deployment
//! plugs in — broker consumers and producers, the relational store, the
//! handler layer, the retry engine — enters through the traits defined here.

pub mod channel;
pub mod outbox;
pub mod processor;
pub mod producer;
pub mod retry;

pub use channel::{Channel, ChannelError};
pub use outbox::{OutboxError, OutboxStore};
pub use processor::{CommandProcessor, DispatchError, Request};
pub use producer::{Producer, ProducerError};
pub use retry::{ExponentialBackoff, RetryPolicy};
