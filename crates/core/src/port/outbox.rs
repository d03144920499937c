//! Outbox store port.
//!
//! The outbox is a durable staging table for outbound messages: business
//! writes and message publication are bracketed in one database transaction,
//! and a separate sweeper drains staged rows to the broker. A row is in
//! exactly one of two states — outstanding (`DispatchedAt` unset) or
//! dispatched — and the transition is one-way.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("message not found: {0}")]
    NotFound(Uuid),

    /// Control envelopes (`MT_QUIT`, `MT_NONE`) steer the pump and are
    /// refused by the store.
    #[error("control messages cannot be stored")]
    ControlMessage,

    /// The store may become reachable again; sweepers treat this as
    /// retryable.
    #[error("store unavailable: {0}")]
    Transient(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable staging contract for outbound messages.
///
/// Implementations must be safe under concurrent callers; isolation is
/// delegated to the backing database. Reads return empty collections, never
/// an error, when nothing matches — except [`get`](OutboxStore::get), which
/// signals [`OutboxError::NotFound`].
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert one message.
    ///
    /// A duplicate id is not an error: the insert is ignored and a warning
    /// is logged, so `add` is idempotent for retrying callers.
    async fn add(&self, message: &Message) -> Result<(), OutboxError>;

    /// Insert a batch in one statement. Duplicates anywhere are ignored with
    /// a warning; the batch is atomic within the caller's transaction.
    async fn add_batch(&self, messages: &[Message]) -> Result<(), OutboxError>;

    async fn get(&self, id: Uuid) -> Result<Message, OutboxError>;

    /// Fetch the subset of `ids` that exist, ordered by the input-id
    /// sequence. The result may be smaller than the input.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Message>, OutboxError>;

    /// Page through every row in stable `(Timestamp, MessageId)` ascending
    /// order. Pages are 1-based.
    async fn get_page(
        &self,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Message>, OutboxError>;

    /// Rows not yet dispatched whose timestamp is at least `since` old.
    async fn outstanding_messages(
        &self,
        since: Duration,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Message>, OutboxError>;

    /// Rows dispatched within the trailing `since` window.
    async fn dispatched_messages(
        &self,
        since: Duration,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Message>, OutboxError>;

    /// Record broker acceptance of a row.
    ///
    /// Idempotent for state: the row stays dispatched however often this is
    /// called. The stored timestamp is the *last* call's `at` (or now when
    /// `at` is `None`). Unknown ids are a silent no-op.
    async fn mark_dispatched(
        &self,
        id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError>;

    /// Batch form of [`mark_dispatched`](OutboxStore::mark_dispatched),
    /// executed as a single statement.
    async fn mark_dispatched_batch(
        &self,
        ids: &[Uuid],
        at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError>;

    /// Administrative purge. No-op on empty input.
    async fn delete(&self, ids: &[Uuid]) -> Result<(), OutboxError>;

    async fn outstanding_count(&self) -> Result<u64, OutboxError>;

    /// Administrative trim: remove rows dispatched longer than `age` ago.
    /// Returns the number of rows removed.
    async fn delete_dispatched_older_than(&self, age: Duration) -> Result<u64, OutboxError>;
}
