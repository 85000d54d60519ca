//! Closed classification of decoded item payloads.
//!
//! Payloads are matched by their `type` discriminator. Anything that doesn't
//! deserialize into a known shape is either kept verbatim (it has a type) or
//! dropped (it doesn't).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tether_types::ApprovalRequest;

/// Every item shape the transcript knows how to merge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Plain log line surfaced as a system note.
    #[serde(alias = "log")]
    LogLine { text: String },

    /// Streaming fragment of an assistant reply.
    AgentMessageDelta {
        delta: String,
        #[serde(default)]
        turn_id: String,
        #[serde(default, alias = "item_id")]
        provider_message_id: String,
    },

    /// Complete assistant reply.
    #[serde(alias = "assistant_message")]
    AgentMessage {
        #[serde(alias = "message")]
        text: String,
        #[serde(default)]
        turn_id: String,
        #[serde(default, alias = "id")]
        provider_message_id: String,
        #[serde(default)]
        created_at: Option<DateTime<Utc>>,
    },

    /// Complete user message.
    UserMessage {
        #[serde(alias = "message")]
        text: String,
        #[serde(default)]
        turn_id: String,
        #[serde(default)]
        created_at: Option<DateTime<Utc>>,
    },

    /// One reasoning fragment.
    #[serde(alias = "agent_reasoning")]
    Reasoning {
        #[serde(default)]
        id: String,
        text: String,
    },

    ApprovalRequest(ApprovalRequest),

    EnteredReviewMode {
        #[serde(default)]
        hint: String,
    },

    ExitedReviewMode,

    /// Explicit end of the current assistant segment.
    #[serde(alias = "agent_message_end")]
    TaskComplete,
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Known(InboundEvent),
    /// Typed but unrecognized; shown verbatim.
    Unknown(Value),
    /// No usable discriminator; dropped.
    Untyped,
}

pub fn classify(payload: &Value) -> Classified {
    match InboundEvent::deserialize(payload) {
        Ok(event) => Classified::Known(event),
        Err(_) => {
            let typed = payload
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| !kind.trim().is_empty());
            if typed {
                Classified::Unknown(payload.clone())
            } else {
                Classified::Untyped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_agent_message_with_aliases() {
        let payload = json!({
            "type": "agent_message",
            "message": "done",
            "id": "msg_1",
            "turn_id": "t1"
        });
        assert_eq!(
            classify(&payload),
            Classified::Known(InboundEvent::AgentMessage {
                text: "done".into(),
                turn_id: "t1".into(),
                provider_message_id: "msg_1".into(),
                created_at: None,
            })
        );
    }

    #[test]
    fn classifies_approval_request_payload() {
        let payload = json!({
            "type": "approval_request",
            "request_id": "9",
            "method": "execCommandApproval",
            "summary": "rm -rf target"
        });
        let Classified::Known(InboundEvent::ApprovalRequest(request)) = classify(&payload) else {
            panic!("expected approval request");
        };
        assert_eq!(request.request_id, "9");
        assert_eq!(request.summary, "rm -rf target");
    }

    #[test]
    fn unit_markers_classify() {
        assert_eq!(
            classify(&json!({ "type": "task_complete" })),
            Classified::Known(InboundEvent::TaskComplete)
        );
        assert_eq!(
            classify(&json!({ "type": "exited_review_mode" })),
            Classified::Known(InboundEvent::ExitedReviewMode)
        );
    }

    #[test]
    fn typed_unknown_is_kept_verbatim() {
        let payload = json!({ "type": "mcp_tool_call", "server": "fs" });
        assert_eq!(classify(&payload), Classified::Unknown(payload.clone()));
    }

    #[test]
    fn known_type_with_missing_fields_is_unknown() {
        let payload = json!({ "type": "agent_message" });
        assert!(matches!(classify(&payload), Classified::Unknown(_)));
    }

    #[test]
    fn untyped_payloads_are_dropped() {
        assert_eq!(classify(&json!({ "text": "hi" })), Classified::Untyped);
        assert_eq!(classify(&json!("plain")), Classified::Untyped);
        assert_eq!(classify(&json!({ "type": "" })), Classified::Untyped);
    }
}
