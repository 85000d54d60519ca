//! Structured protocol envelopes delivered by the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `{method, id?, params, timestamp?}` message from an agent process.
///
/// Requests from the agent (approvals) carry an `id`; notifications don't.
/// `params` stays opaque here; decoding happens in the stream controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEnvelope {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProtocolEnvelope {
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            id: None,
            params,
            timestamp: None,
        }
    }

    pub fn request(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            ..Self::notification(method, params)
        }
    }

    /// String parameter lookup; missing and non-string values both read as `None`.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}
