//! Correlation keys and the strategies that compute them.

use std::fmt;
use std::sync::Arc;

use junction_core::{Message, names};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies the group a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Creates a key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives a key from a header value.
    ///
    /// Strings are used as-is. Other values are their JSON rendering behind
    /// a type tag, so the number `42` and the string `"42"` correlate into
    /// different groups. `null` yields no key.
    pub fn from_value(value: &Value) -> Option<Self> {
        let tag = match value {
            Value::Null => return None,
            Value::String(s) => return Some(Self(s.clone())),
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        Some(Self(format!("{tag}:{value}")))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CorrelationKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Computes the correlation key of a message.
///
/// Returning `None` means the message cannot be correlated; aggregators
/// treat that as a failure of the message.
pub trait CorrelationStrategy: Send + Sync {
    /// Returns the key for `message`.
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey>;
}

/// Correlates on the value of a header, `correlationId` by default.
#[derive(Debug, Clone)]
pub struct HeaderAttributeCorrelationStrategy {
    header: String,
}

impl HeaderAttributeCorrelationStrategy {
    /// Correlates on `header`.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for HeaderAttributeCorrelationStrategy {
    fn default() -> Self {
        Self::new(names::CORRELATION_ID)
    }
}

impl CorrelationStrategy for HeaderAttributeCorrelationStrategy {
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey> {
        message
            .headers()
            .get(&self.header)
            .and_then(CorrelationKey::from_value)
    }
}

/// Correlates with a closure.
pub struct FnCorrelationStrategy {
    f: Arc<dyn Fn(&Message) -> Option<CorrelationKey> + Send + Sync>,
}

impl FnCorrelationStrategy {
    /// Wraps `f`.
    pub fn new(f: impl Fn(&Message) -> Option<CorrelationKey> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl CorrelationStrategy for FnCorrelationStrategy {
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey> {
        (self.f)(message)
    }
}
