//! # buzon-core
//!
//! Core of the buzon dispatcher: a message pump with bounded-retry requeue
//! semantics and a transactional-outbox contract with a sweeping dispatcher.
//! This crate has zero infrastructure dependencies; brokers and databases
//! plug in through the [`port`] traits (the PostgreSQL store lives in
//! `buzon-pg`).
//!
//! ## Modules
//!
//! - [`message`]: [`Message`], [`MessageHeader`], [`MessageBody`], [`MessageType`]
//! - [`port`]: seams for channels, stores, processors, producers and retry
//! - [`mapper`]: [`MessageMapperRegistry`], [`TransformPipeline`]
//! - [`channel`]: [`InMemoryChannel`], the in-process channel
//! - [`pump`]: [`MessagePump`], the consume-loop state machine
//! - [`outbox`]: [`InMemoryOutbox`], the reference store
//! - [`bus`]: [`ExternalBusService`], the outbox sweeper
//!
//! ## Flow
//!
//! Inbound: broker client → channel → pump → mapper → command processor →
//! handlers. Outbound: handler → outbox `add` (inside the caller's database
//! transaction) → sweeper → broker producer → `mark_dispatched`.

pub mod bus;
pub mod channel;
pub mod error;
pub mod mapper;
pub mod message;
pub mod outbox;
pub mod port;
pub mod pump;

pub use bus::{ExternalBusService, SweeperConfig, SweeperError, SweeperMetrics};
pub use channel::{ChannelMetrics, InMemoryChannel};
pub use error::ConfigurationError;
pub use mapper::{
    MappingError, MessageMapper, MessageMapperRegistry, MessageTransform, Publication,
    TransformPipeline,
};
pub use message::{Message, MessageBody, MessageHeader, MessageType, HANDLED_COUNT_HEADER};
pub use outbox::InMemoryOutbox;
pub use port::{
    Channel, ChannelError, CommandProcessor, DispatchError, ExponentialBackoff, OutboxError,
    OutboxStore, Producer, ProducerError, Request, RetryPolicy,
};
pub use pump::{MessagePump, PumpConfig, PumpError};
