use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::ServiceError;

/// The `{event_name, params}` object carried inside a raw inbound message.
///
/// Raw messages that do not carry an `event_name` are not envelopes and are
/// ignored by the facade rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EventEnvelope {
    /// Name of the event to fan out to subscribers.
    #[validate(length(min = 1, message = "event_name must not be empty"))]
    pub event_name: String,
    /// Free-form parameters forwarded to every subscriber.
    #[serde(default)]
    pub params: Value,
}

impl EventEnvelope {
    /// Build an envelope for an outbound event.
    pub fn new(event_name: impl Into<String>, params: Value) -> Self {
        Self {
            event_name: event_name.into(),
            params,
        }
    }

    /// Parse and validate an envelope from a raw JSON value.
    ///
    /// Returns `Ok(None)` when the value carries no `event_name` (plain
    /// payloads share the channel with envelopes and are simply not ours).
    pub fn from_value(value: &Value) -> Result<Option<Self>, ServiceError> {
        if value.get("event_name").is_none() {
            return Ok(None);
        }
        let envelope: Self = serde_json::from_value(value.clone())?;
        envelope.validate()?;
        Ok(Some(envelope))
    }

    /// Parse and validate an envelope from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, ServiceError> {
        let envelope: Self = serde_json::from_str(raw)?;
        envelope.validate()?;
        Ok(envelope)
    }
}
