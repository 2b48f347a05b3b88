//! Message and payload types.
//!
//! A [`Message`] is an immutable envelope of a [`Payload`] and
//! [`MessageHeaders`]. Payloads may nest whole messages, which is how error
//! messages and advice results keep a reference to the message they concern.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::builder::MessageBuilder;
use super::headers::MessageHeaders;

// ============================================================================
// Payload
// ============================================================================

/// The body of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// An arbitrary JSON value.
    Value(Value),
    /// A message carried as the payload of another message.
    Message(Box<Message>),
    /// An error-message body.
    Error(ErrorPayload),
    /// An advice-message body.
    Advice(AdvicePayload),
    /// Payloads combined by an aggregator, in arrival order.
    Collection(Vec<Payload>),
}

impl Payload {
    /// Returns the JSON value if this is a value payload.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string if this is a JSON string payload.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// Returns the nested message if this is a message payload.
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the error body if this is an error payload.
    pub fn as_error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the items if this is a collection payload.
    pub fn as_collection(&self) -> Option<&[Payload]> {
        match self {
            Self::Collection(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<Message> for Payload {
    fn from(message: Message) -> Self {
        Self::Message(Box::new(message))
    }
}

impl From<ErrorPayload> for Payload {
    fn from(error: ErrorPayload) -> Self {
        Self::Error(error)
    }
}

impl From<AdvicePayload> for Payload {
    fn from(advice: AdvicePayload) -> Self {
        Self::Advice(advice)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(items: Vec<Payload>) -> Self {
        Self::Collection(items)
    }
}

/// Body of an error message: a description of the failure and the message that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description of the failure.
    pub description: String,
    /// The message whose processing failed, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_message: Option<Box<Message>>,
}

impl ErrorPayload {
    /// Creates an error body.
    pub fn new(description: impl Into<String>, failed_message: Option<Message>) -> Self {
        Self {
            description: description.into(),
            failed_message: failed_message.map(Box::new),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Body of an advice message: the result of an advised handler plus the input it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvicePayload {
    /// Result produced by the advised handler.
    pub result: Box<Payload>,
    /// The message that was handed to the advised handler.
    pub input_message: Box<Message>,
}

impl AdvicePayload {
    /// Creates an advice body.
    pub fn new(result: impl Into<Payload>, input_message: Message) -> Self {
        Self {
            result: Box::new(result.into()),
            input_message: Box::new(input_message),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An immutable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    payload: Payload,
    headers: MessageHeaders,
}

impl Message {
    /// Creates a message with the given payload and no user headers.
    pub fn new(payload: impl Into<Payload>) -> Self {
        MessageBuilder::with_payload(payload).build()
    }

    pub(crate) fn from_parts(payload: Payload, headers: MessageHeaders) -> Self {
        Self { payload, headers }
    }

    /// Creates an error message describing the failure of `failed`.
    ///
    /// The error message inherits the headers of the failed message so it can
    /// be correlated (and aggregated) alongside regular replies.
    pub fn error_for(failed: &Message, description: impl Into<String>) -> Self {
        MessageBuilder::with_payload(ErrorPayload::new(description, Some(failed.clone())))
            .copy_headers(failed.headers())
            .build()
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the headers.
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Returns the message id.
    pub fn id(&self) -> Uuid {
        self.headers.id()
    }

    /// Returns `true` if this is an error message.
    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// Consumes the message into its payload and headers.
    pub fn into_parts(self) -> (Payload, MessageHeaders) {
        (self.payload, self.headers)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[id={}]", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::headers::names;
    use serde_json::json;

    #[test]
    fn test_error_message_keeps_correlation_headers() {
        let failed = MessageBuilder::with_payload("bid")
            .correlation_id("auction-1")
            .sequence(2, 3)
            .build();
        let error = Message::error_for(&failed, "bidder unavailable");

        assert!(error.is_error());
        assert_eq!(
            error.headers().correlation_id(),
            Some(&json!("auction-1"))
        );
        assert_eq!(error.headers().sequence_number(), Some(2));
        let body = error.payload().as_error().unwrap();
        assert_eq!(body.description, "bidder unavailable");
        assert_eq!(body.failed_message.as_deref(), Some(&failed));
    }

    #[test]
    fn test_json_round_trip_preserves_nested_payloads() {
        let inner = MessageBuilder::with_payload(json!({"sku": "A-1", "qty": 3}))
            .header("priority", 7)
            .build();
        let advice = Message::new(AdvicePayload::new("done", inner.clone()));
        let outer = MessageBuilder::with_payload(Payload::Collection(vec![
            Payload::from(inner),
            Payload::from(advice),
            Payload::from(ErrorPayload::new("boom", None)),
        ]))
        .header(names::CORRELATION_ID, "c-1")
        .build();

        let encoded = serde_json::to_vec(&outer).unwrap();
        let decoded: Message = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, outer);
    }
}
