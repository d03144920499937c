//! Message envelope types.
//!
//! A [`Message`] is the unit that flows through channels, the outbox and the
//! sweeper: a [`MessageHeader`] (identity, routing, free-form header bag) and
//! a [`MessageBody`] (opaque payload). Control envelopes ([`MessageType::Quit`]
//! and the [`MessageType::None`] receive-timeout sentinel) steer the pump and
//! are never persisted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header bag key carrying the requeue counter.
///
/// The counter lives in the message itself, not in pump state, so a pump
/// crash cannot reset it: the next pump observes the same count.
pub const HANDLED_COUNT_HEADER: &str = "x-handled-count";

/// Default content type for message bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Classification of a message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Point-to-point request with exactly one handler.
    #[serde(rename = "MT_COMMAND")]
    Command,
    /// Fan-out notification with zero or more handlers.
    #[serde(rename = "MT_EVENT")]
    Event,
    /// Opaque document transfer, dispatched like an event.
    #[serde(rename = "MT_DOCUMENT")]
    Document,
    /// Receive-timeout sentinel. Carries no payload.
    #[serde(rename = "MT_NONE")]
    None,
    /// A message a mapper could not decode on a prior pass.
    #[serde(rename = "MT_UNACCEPTABLE")]
    Unacceptable,
    /// In-band stop signal for a pump. Never persisted.
    #[serde(rename = "MT_QUIT")]
    Quit,
}

impl MessageType {
    /// Control envelopes steer the pump and must never reach the outbox.
    pub fn is_control(&self) -> bool {
        matches!(self, MessageType::None | MessageType::Quit)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Command => "MT_COMMAND",
            MessageType::Event => "MT_EVENT",
            MessageType::Document => "MT_DOCUMENT",
            MessageType::None => "MT_NONE",
            MessageType::Unacceptable => "MT_UNACCEPTABLE",
            MessageType::Quit => "MT_QUIT",
        };
        write!(f, "{}", name)
    }
}

/// Error returned when parsing an unknown message type name.
#[derive(Debug, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct ParseMessageTypeError(pub String);

impl FromStr for MessageType {
    type Err = ParseMessageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MT_COMMAND" => Ok(MessageType::Command),
            "MT_EVENT" => Ok(MessageType::Event),
            "MT_DOCUMENT" => Ok(MessageType::Document),
            "MT_NONE" => Ok(MessageType::None),
            "MT_UNACCEPTABLE" => Ok(MessageType::Unacceptable),
            "MT_QUIT" => Ok(MessageType::Quit),
            other => Err(ParseMessageTypeError(other.to_string())),
        }
    }
}

/// Envelope metadata carried with every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Stable primary identity of the message.
    pub id: Uuid,
    /// Routing key.
    pub topic: String,
    pub message_type: MessageType,
    /// Creation instant. The outbox never mutates it after insert.
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub reply_to: Option<String>,
    pub content_type: String,
    pub partition_key: Option<String>,
    /// Free-form string headers, including the requeue counter.
    pub bag: HashMap<String, String>,
}

impl MessageHeader {
    pub fn new(id: Uuid, topic: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id,
            topic: topic.into(),
            message_type,
            timestamp: Utc::now(),
            correlation_id: None,
            reply_to: None,
            content_type: CONTENT_TYPE_JSON.to_string(),
            partition_key: None,
            bag: HashMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Number of times a pump has handled and deferred this message.
    ///
    /// Missing or unparseable values read as zero.
    pub fn handled_count(&self) -> u32 {
        self.bag
            .get(HANDLED_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_handled_count(&mut self, count: u32) {
        self.bag
            .insert(HANDLED_COUNT_HEADER.to_string(), count.to_string());
    }

    /// Increment the requeue counter and return the new value.
    pub fn increment_handled_count(&mut self) -> u32 {
        let next = self.handled_count() + 1;
        self.set_handled_count(next);
        next
    }
}

/// Opaque message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub value: String,
    pub content_type: String,
}

impl MessageBody {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn empty() -> Self {
        Self::new("")
    }
}

/// A routable unit of work: header plus body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl Message {
    pub fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self { header, body }
    }

    /// The in-band stop signal for a pump: empty topic, empty body.
    pub fn quit() -> Self {
        Self {
            header: MessageHeader::new(Uuid::new_v4(), "", MessageType::Quit),
            body: MessageBody::empty(),
        }
    }

    /// The receive-timeout sentinel returned by an empty channel.
    pub fn sentinel() -> Self {
        Self {
            header: MessageHeader::new(Uuid::new_v4(), "", MessageType::None),
            body: MessageBody::empty(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.header.id
    }

    pub fn topic(&self) -> &str {
        &self.header.topic
    }

    pub fn is_quit(&self) -> bool {
        self.header.message_type == MessageType::Quit
    }

    pub fn is_sentinel(&self) -> bool {
        self.header.message_type == MessageType::None
    }

    /// See [`MessageHeader::handled_count`].
    pub fn handled_count(&self) -> u32 {
        self.header.handled_count()
    }

    /// See [`MessageHeader::increment_handled_count`].
    pub fn increment_handled_count(&mut self) -> u32 {
        self.header.increment_handled_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names_round_trip() {
        for mt in [
            MessageType::Command,
            MessageType::Event,
            MessageType::Document,
            MessageType::None,
            MessageType::Unacceptable,
            MessageType::Quit,
        ] {
            let name = mt.to_string();
            assert_eq!(name.parse::<MessageType>().unwrap(), mt);
        }
        assert!("MT_BOGUS".parse::<MessageType>().is_err());
    }

    #[test]
    fn handled_count_defaults_to_zero() {
        let header = MessageHeader::new(Uuid::new_v4(), "orders", MessageType::Event);
        assert_eq!(header.handled_count(), 0);
    }

    #[test]
    fn handled_count_survives_increments() {
        let mut header = MessageHeader::new(Uuid::new_v4(), "orders", MessageType::Event);
        assert_eq!(header.increment_handled_count(), 1);
        assert_eq!(header.increment_handled_count(), 2);
        assert_eq!(header.bag.get(HANDLED_COUNT_HEADER).unwrap(), "2");
    }

    #[test]
    fn unparseable_handled_count_reads_as_zero() {
        let mut header = MessageHeader::new(Uuid::new_v4(), "orders", MessageType::Event);
        header
            .bag
            .insert(HANDLED_COUNT_HEADER.to_string(), "not-a-number".to_string());
        assert_eq!(header.handled_count(), 0);
    }

    #[test]
    fn control_constructors() {
        let quit = Message::quit();
        assert!(quit.is_quit());
        assert!(quit.topic().is_empty());
        assert!(quit.body.value.is_empty());
        assert!(quit.header.message_type.is_control());

        let sentinel = Message::sentinel();
        assert!(sentinel.is_sentinel());
        assert!(sentinel.header.message_type.is_control());
        assert!(!MessageType::Event.is_control());
    }

    #[test]
    fn header_builders() {
        let correlation = Uuid::new_v4();
        let header = MessageHeader::new(Uuid::new_v4(), "orders", MessageType::Command)
            .with_correlation_id(correlation)
            .with_reply_to("orders.reply")
            .with_partition_key("tenant-7");

        assert_eq!(header.correlation_id, Some(correlation));
        assert_eq!(header.reply_to.as_deref(), Some("orders.reply"));
        assert_eq!(header.partition_key.as_deref(), Some("tenant-7"));
        assert_eq!(header.content_type, CONTENT_TYPE_JSON);
    }
}
