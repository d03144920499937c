//! In-memory outbox store.
//!
//! A complete reference implementation of the [`OutboxStore`] contract. It
//! backs the sweeper's unit tests and in-process deployments that do not need
//! durability; the relational implementation lives in the `buzon-pg` crate
//! and obeys the same semantics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::message::Message;
use crate::port::outbox::{OutboxError, OutboxStore};

#[derive(Debug, Clone)]
struct OutboxRow {
    message: Message,
    dispatched_at: Option<DateTime<Utc>>,
}

/// Unbounded in-memory store, safe under concurrent callers.
#[derive(Default)]
pub struct InMemoryOutbox {
    rows: Mutex<Vec<OutboxRow>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_row(rows: &mut Vec<OutboxRow>, message: &Message) -> Result<(), OutboxError> {
        if message.header.message_type.is_control() {
            return Err(OutboxError::ControlMessage);
        }
        if rows.iter().any(|row| row.message.id() == message.id()) {
            warn!(message_id = %message.id(), "in-memory outbox: duplicate message, ignoring");
            return Ok(());
        }
        rows.push(OutboxRow {
            message: message.clone(),
            dispatched_at: None,
        });
        Ok(())
    }

    /// Stable read order: `(Timestamp, MessageId)` ascending.
    fn sorted(rows: &[OutboxRow]) -> Vec<OutboxRow> {
        let mut sorted: Vec<OutboxRow> = rows.to_vec();
        sorted.sort_by_key(|row| (row.message.header.timestamp, row.message.id()));
        sorted
    }

    fn page(rows: Vec<OutboxRow>, page_size: usize, page_number: usize) -> Vec<Message> {
        let offset = page_number.saturating_sub(1) * page_size;
        rows.into_iter()
            .skip(offset)
            .take(page_size)
            .map(|row| row.message)
            .collect()
    }

    fn age_cutoff(age: Duration) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::milliseconds(age.as_millis() as i64)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn add(&self, message: &Message) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock();
        Self::insert_row(&mut rows, message)
    }

    async fn add_batch(&self, messages: &[Message]) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock();
        // Validate the whole batch before touching the store, so a refused
        // control envelope leaves no partial insert behind.
        if messages
            .iter()
            .any(|m| m.header.message_type.is_control())
        {
            return Err(OutboxError::ControlMessage);
        }
        for message in messages {
            Self::insert_row(&mut rows, message)?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Message, OutboxError> {
        self.rows
            .lock()
            .iter()
            .find(|row| row.message.id() == id)
            .map(|row| row.message.clone())
            .ok_or(OutboxError::NotFound(id))
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Message>, OutboxError> {
        let rows = self.rows.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                rows.iter()
                    .find(|row| row.message.id() == *id)
                    .map(|row| row.message.clone())
            })
            .collect())
    }

    async fn get_page(
        &self,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Message>, OutboxError> {
        let sorted = Self::sorted(&self.rows.lock());
        Ok(Self::page(sorted, page_size, page_number))
    }

    async fn outstanding_messages(
        &self,
        since: Duration,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Message>, OutboxError> {
        let cutoff = Self::age_cutoff(since);
        let matching: Vec<OutboxRow> = Self::sorted(&self.rows.lock())
            .into_iter()
            .filter(|row| row.dispatched_at.is_none() && row.message.header.timestamp <= cutoff)
            .collect();
        Ok(Self::page(matching, page_size, page_number))
    }

    async fn dispatched_messages(
        &self,
        since: Duration,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Message>, OutboxError> {
        let cutoff = Self::age_cutoff(since);
        let matching: Vec<OutboxRow> = Self::sorted(&self.rows.lock())
            .into_iter()
            .filter(|row| row.dispatched_at.is_some_and(|at| at >= cutoff))
            .collect();
        Ok(Self::page(matching, page_size, page_number))
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        self.mark_dispatched_batch(&[id], at).await
    }

    async fn mark_dispatched_batch(
        &self,
        ids: &[Uuid],
        at: Option<DateTime<Utc>>,
    ) -> Result<(), OutboxError> {
        let at = at.unwrap_or_else(Utc::now);
        let mut rows = self.rows.lock();
        for row in rows.iter_mut() {
            if ids.contains(&row.message.id()) {
                row.dispatched_at = Some(at);
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.rows
            .lock()
            .retain(|row| !ids.contains(&row.message.id()));
        Ok(())
    }

    async fn outstanding_count(&self) -> Result<u64, OutboxError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.dispatched_at.is_none())
            .count() as u64)
    }

    async fn delete_dispatched_older_than(&self, age: Duration) -> Result<u64, OutboxError> {
        let cutoff = Self::age_cutoff(age);
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|row| !row.dispatched_at.is_some_and(|at| at < cutoff));
        Ok((before - rows.len()) as u64)
    }
}
