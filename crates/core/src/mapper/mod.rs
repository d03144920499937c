//! Request ↔ message translation.
//!
//! A [`MessageMapper`] turns a concrete request type into a wire [`Message`]
//! and back. The [`MessageMapperRegistry`] holds exactly one mapper per
//! request type; registering a second one is a [`ConfigurationError`], since
//! an ambiguous mapping could silently pick the wrong codec.

pub mod transform;

use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::message::{Message, MessageType, CONTENT_TYPE_JSON};
use crate::port::processor::Request;

pub use transform::{MessageTransform, TransformPipeline};

/// Where and how an outgoing request becomes a message.
#[derive(Debug, Clone)]
pub struct Publication {
    pub topic: String,
    pub message_type: MessageType,
    pub reply_to: Option<String>,
    pub content_type: String,
}

impl Publication {
    pub fn event(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message_type: MessageType::Event,
            reply_to: None,
            content_type: CONTENT_TYPE_JSON.to_string(),
        }
    }

    pub fn command(topic: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Command,
            ..Self::event(topic)
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to decode message {message_id}: {reason}")]
    Decode { message_id: Uuid, reason: String },

    #[error("failed to encode request {request_id}: {reason}")]
    Encode { request_id: Uuid, reason: String },

    #[error("transform failed: {0}")]
    Transform(String),
}

#[async_trait]
pub trait MessageMapper<R: Request>: Send + Sync {
    async fn map_to_message(
        &self,
        request: &R,
        publication: &Publication,
    ) -> Result<Message, MappingError>;

    async fn map_to_request(&self, message: &Message) -> Result<R, MappingError>;
}

/// One mapper per request type, keyed by `TypeId`.
#[derive(Default)]
pub struct MessageMapperRegistry {
    mappers: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl MessageMapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the mapper for `R`. A second registration for the same type
    /// fails: exactly one translation per request type is allowed.
    pub fn register<R: Request>(
        &self,
        mapper: Arc<dyn MessageMapper<R>>,
    ) -> Result<(), ConfigurationError> {
        let mut mappers = self.mappers.write();
        match mappers.entry(TypeId::of::<R>()) {
            Entry::Occupied(_) => Err(ConfigurationError::new(format!(
                "a message mapper is already registered for {}",
                std::any::type_name::<R>()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(mapper));
                Ok(())
            }
        }
    }

    pub fn get<R: Request>(&self) -> Option<Arc<dyn MessageMapper<R>>> {
        self.mappers
            .read()
            .get(&TypeId::of::<R>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn MessageMapper<R>>>())
            .cloned()
    }

    /// Resolve the mapper for `R` or fail the wiring.
    pub fn lookup<R: Request>(&self) -> Result<Arc<dyn MessageMapper<R>>, ConfigurationError> {
        self.get::<R>().ok_or_else(|| {
            ConfigurationError::new(format!(
                "no message mapper registered for {}",
                std::any::type_name::<R>()
            ))
        })
    }
}
