//! Bidirectional message transforms.
//!
//! Transforms decorate a message on the way out (claim-check, compression,
//! header stamping) and undo the decoration on the way in. A pipeline wraps
//! in registration order and unwraps in the reverse order, so nesting is
//! symmetric.

use std::sync::Arc;

use async_trait::async_trait;

use super::MappingError;
use crate::message::Message;

#[async_trait]
pub trait MessageTransform: Send + Sync {
    /// Decorate an outgoing message.
    async fn wrap(&self, message: Message) -> Result<Message, MappingError>;

    /// Undo the decoration on an incoming message.
    async fn unwrap(&self, message: Message) -> Result<Message, MappingError>;
}

/// Ordered chain of transforms.
#[derive(Default, Clone)]
pub struct TransformPipeline {
    transforms: Vec<Arc<dyn MessageTransform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transform: Arc<dyn MessageTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply every transform in registration order.
    pub async fn wrap(&self, mut message: Message) -> Result<Message, MappingError> {
        for transform in &self.transforms {
            message = transform.wrap(message).await?;
        }
        Ok(message)
    }

    /// Apply every transform in reverse registration order.
    pub async fn unwrap(&self, mut message: Message) -> Result<Message, MappingError> {
        for transform in self.transforms.iter().rev() {
            message = transform.unwrap(message).await?;
        }
        Ok(message)
    }
}
