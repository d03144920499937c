//! # buzon-pg
//!
//! PostgreSQL adapter for the buzon dispatcher: a durable [`OutboxStore`]
//! implementation over sqlx.
//!
//! The store's SQL comes from an [`OutboxQueries`] dialect value rather than
//! subclass hooks, so another relational dialect is a new queries value and a
//! new adapter crate, not an inheritance hierarchy. Callers staging messages
//! alongside business writes use [`PostgresOutbox::add_with_tx`] /
//! [`PostgresOutbox::add_batch_with_tx`] with their own `PgTransaction`; the
//! store never commits or rolls back on their behalf.
//!
//! [`OutboxStore`]: buzon_core::port::outbox::OutboxStore

pub mod outbox;
pub mod queries;

pub use outbox::{PostgresOutbox, PostgresOutboxConfig};
pub use queries::OutboxQueries;
