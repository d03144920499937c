//! Command processor port.
//!
//! The seam between the pump and the handler layer. The pump decodes a
//! message into a request and hands it over: `send` for commands (exactly one
//! handler), `publish` for events and documents (fan-out).

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// A decoded unit of work: a command or an event.
pub trait Request: Send + Sync + 'static {
    fn id(&self) -> Uuid;
}

/// Outcome of handing a request to the handler layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler asks for the message to be retried later. The pump
    /// requeues it, bounded by the pump's requeue budget.
    #[error("handler requested deferral")]
    Defer,

    /// Wiring failure (missing handler, bad registration). Fatal: the pump
    /// rejects the message and stops.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any other handler failure. The message is rejected and the pump
    /// keeps running.
    #[error("handler failed: {0}")]
    Handler(String),
}

#[async_trait]
pub trait CommandProcessor<R: Request>: Send + Sync {
    /// Dispatch a command to its single handler.
    async fn send(&self, request: R) -> Result<(), DispatchError>;

    /// Publish an event to all subscribed handlers.
    async fn publish(&self, request: R) -> Result<(), DispatchError>;
}
