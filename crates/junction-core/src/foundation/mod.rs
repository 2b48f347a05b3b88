//! Foundation layer: the message model.
//!
//! - [`Message`] / [`Payload`]: the immutable envelope and its body
//! - [`MessageHeaders`]: serializable value headers plus transient channel headers
//! - [`MessageBuilder`]: derives new messages from payloads or existing messages

pub mod builder;
pub mod headers;
pub mod message;

pub use builder::MessageBuilder;
pub use headers::{MessageHeaders, current_time_millis, names, same_channel};
pub use message::{AdvicePayload, ErrorPayload, Message, Payload};
