//! Display blocks: the paragraph-level units of a transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
    Reasoning,
    Approval,
}

impl Role {
    /// Short label used by plain renderers.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "you",
            Role::Agent => "agent",
            Role::System => "system",
            Role::Reasoning => "thinking",
            Role::Approval => "approval",
        }
    }
}

/// Delivery status of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    None,
    /// Still receiving content (open streaming segment).
    Sending,
    Failed,
}

/// One transcript unit (message, system note, reasoning summary, approval card).
///
/// Empty strings mean "not set" for the identifier fields; merge logic only
/// back-fills fields that are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBlock {
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider_message_id: String,
    #[serde(default)]
    pub collapsed: bool,
    /// Approval blocks only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// Approval blocks only: the protocol method that raised the request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Reasoning blocks only: the accumulator group this block mirrors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_id: String,
}

impl DisplayBlock {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            status: BlockStatus::None,
            created_at: None,
            turn_id: String::new(),
            provider_message_id: String::new(),
            collapsed: false,
            request_id: String::new(),
            method: String::new(),
            group_id: String::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Reasoning block mirroring the aggregate of `group_id`.
    pub fn reasoning(group_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::new(Role::Reasoning, text)
        }
    }

    /// Approval card for a pending request.
    pub fn approval(request: &ApprovalRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            method: request.method.clone(),
            created_at: request.created_at,
            ..Self::new(Role::Approval, request.display_text())
        }
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_provider_message_id(mut self, id: impl Into<String>) -> Self {
        self.provider_message_id = id.into();
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.status == BlockStatus::Sending
    }
}

/// A request from the agent process that needs a user decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub method: String,
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Text shown on the approval card.
    pub fn display_text(&self) -> String {
        let mut text = self.summary.clone();
        for extra in [&self.detail, &self.context] {
            if extra.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(extra);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_text_skips_empty_parts() {
        let request = ApprovalRequest {
            request_id: "7".into(),
            method: "execCommandApproval".into(),
            summary: "run cargo fmt".into(),
            detail: String::new(),
            context: "cwd: /repo".into(),
            created_at: None,
        };
        assert_eq!(request.display_text(), "run cargo fmt\ncwd: /repo");
    }

    #[test]
    fn approval_block_carries_request_id() {
        let request = ApprovalRequest {
            request_id: "42".into(),
            summary: "apply patch".into(),
            ..ApprovalRequest::default()
        };
        let block = DisplayBlock::approval(&request);
        assert_eq!(block.role, Role::Approval);
        assert_eq!(block.request_id, "42");
        assert_eq!(block.text, "apply patch");
    }

    #[test]
    fn block_serializes_without_empty_ids() {
        let json = serde_json::to_value(DisplayBlock::agent("hi")).unwrap();
        assert_eq!(json["role"], "agent");
        assert!(json.get("turn_id").is_none());
        assert!(json.get("request_id").is_none());
    }
}
