//! Protocol stream: `{method, id?, params}` envelopes from an app-server style
//! agent process.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tether_types::{ApprovalRequest, ProtocolEnvelope};
use tokio::sync::mpsc;

use super::consumer::{BoundedConsumer, CancelFn, TickOutcome};
use crate::transcript::{MessageMeta, TranscriptState};

const COMMAND_APPROVAL_METHODS: [&str; 2] =
    ["item/commandExecution/requestApproval", "execCommandApproval"];
const FILE_CHANGE_APPROVAL_METHODS: [&str; 2] =
    ["item/fileChange/requestApproval", "applyPatchApproval"];

/// Decodes protocol envelopes into transcript mutations.
///
/// Tracks the item currently streaming deltas so a completion for an item
/// that never streamed still lands exactly once.
#[derive(Debug, Default)]
pub struct ProtocolStreamController {
    consumer: BoundedConsumer<ProtocolEnvelope>,
    current_turn_id: String,
    active_item_id: String,
    delta_observed: bool,
    /// Accumulated reasoning delta text per fragment id.
    reasoning_fragments: HashMap<String, String>,
    /// Reasoning items that streamed summary text; their raw content is hidden.
    summarized_items: HashSet<String>,
    last_error: String,
    pending_approval: Option<ApprovalRequest>,
}

impl ProtocolStreamController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, rx: mpsc::Receiver<ProtocolEnvelope>, cancel: Option<CancelFn>) {
        self.consumer.attach(rx, cancel);
        self.clear_item_state();
    }

    /// Cancels the producer and forgets per-stream state.
    pub fn detach(&mut self) {
        self.consumer.cancel();
        self.clear_item_state();
        self.current_turn_id.clear();
    }

    pub fn is_attached(&self) -> bool {
        self.consumer.is_attached()
    }

    pub fn consume_tick(
        &mut self,
        max_per_tick: usize,
        transcript: &mut TranscriptState,
    ) -> TickOutcome {
        let mut consumer = std::mem::take(&mut self.consumer);
        let outcome = consumer.consume_tick(max_per_tick, |envelope| {
            self.handle_envelope(&envelope, transcript);
        });
        // A detach from inside a handler never happens, so restoring is safe.
        self.consumer = consumer;
        outcome
    }

    /// Last recognized error envelope, or empty.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn pending_approval(&self) -> Option<&ApprovalRequest> {
        self.pending_approval.as_ref()
    }

    pub fn clear_approval(&mut self) {
        self.pending_approval = None;
    }

    /// Applies one envelope. Returns whether it was recognized.
    pub fn handle_envelope(
        &mut self,
        envelope: &ProtocolEnvelope,
        transcript: &mut TranscriptState,
    ) -> bool {
        let params = &envelope.params;
        match envelope.method.as_str() {
            "turn/started" => {
                let turn_id = turn_id(params);
                transcript.start_turn(&turn_id);
                self.current_turn_id = turn_id;
                self.clear_item_state();
                true
            }
            "turn/completed" => {
                let turn = params.get("turn").unwrap_or(params);
                let status = str_field(turn, "status").unwrap_or("completed");
                if status == "failed" {
                    let reason = turn
                        .get("error")
                        .and_then(|error| str_field(error, "message"))
                        .unwrap_or("turn failed");
                    tracing::warn!(reason, "agent turn failed");
                    reason.clone_into(&mut self.last_error);
                    transcript.fail_agent_segment();
                } else {
                    transcript.finish_agent_segment();
                }
                self.clear_item_state();
                true
            }
            "item/started" => self.handle_item_started(params, transcript),
            "item/agentMessage/delta" => {
                let Some(delta) = str_field(params, "delta") else {
                    return false;
                };
                let item_id = str_field(params, "itemId").unwrap_or_default();
                if self.active_item_id != item_id || !transcript.has_open_segment() {
                    transcript.start_agent_segment(&self.current_turn_id, item_id);
                    item_id.clone_into(&mut self.active_item_id);
                }
                self.delta_observed = true;
                transcript.append_agent_delta(delta);
                true
            }
            "item/reasoning/summaryTextDelta" => {
                let item_id = str_field(params, "itemId").unwrap_or_default().to_string();
                let index = u64_field(params, "summaryIndex");
                self.summarized_items.insert(item_id.clone());
                self.reasoning_delta(&format!("{item_id}:summary:{index}"), params, transcript)
            }
            "item/reasoning/textDelta" => {
                let item_id = str_field(params, "itemId").unwrap_or_default();
                if self.summarized_items.contains(item_id) {
                    return true;
                }
                let index = u64_field(params, "contentIndex");
                self.reasoning_delta(&format!("{item_id}:content:{index}"), params, transcript)
            }
            "item/completed" => self.handle_item_completed(envelope, transcript),
            "error" => {
                let message = params
                    .get("error")
                    .and_then(|error| str_field(error, "message"))
                    .or_else(|| str_field(params, "message"))
                    .unwrap_or("agent error");
                let will_retry = params
                    .get("willRetry")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                tracing::warn!(message, will_retry, "agent error envelope");
                self.last_error = if will_retry {
                    format!("{message} (retrying)")
                } else {
                    message.to_string()
                };
                true
            }
            method if COMMAND_APPROVAL_METHODS.contains(&method) => {
                let request = command_approval(envelope);
                self.surface_approval(request, transcript)
            }
            method if FILE_CHANGE_APPROVAL_METHODS.contains(&method) => {
                let request = file_change_approval(envelope);
                self.surface_approval(request, transcript)
            }
            method => {
                tracing::trace!(method, "ignoring unhandled protocol method");
                false
            }
        }
    }

    fn handle_item_started(&mut self, params: &Value, transcript: &mut TranscriptState) -> bool {
        let Some(item) = params.get("item") else {
            return false;
        };
        if str_field(item, "type") != Some("agentMessage") {
            return false;
        }
        let item_id = str_field(item, "id").unwrap_or_default();
        transcript.start_agent_segment(&self.current_turn_id, item_id);
        item_id.clone_into(&mut self.active_item_id);
        self.delta_observed = false;
        true
    }

    fn handle_item_completed(
        &mut self,
        envelope: &ProtocolEnvelope,
        transcript: &mut TranscriptState,
    ) -> bool {
        let Some(item) = envelope.params.get("item") else {
            return false;
        };
        let item_id = str_field(item, "id").unwrap_or_default();

        match str_field(item, "type") {
            Some("agentMessage") => {
                let streamed = self.delta_observed && self.active_item_id == item_id;
                if !streamed {
                    let text = str_field(item, "text").unwrap_or_default();
                    let meta = MessageMeta::turn(self.current_turn_id.clone())
                        .with_provider_message_id(item_id)
                        .with_created_at(envelope.timestamp);
                    transcript.append_agent_message(text, meta);
                }
                transcript.finish_agent_segment();
                if self.active_item_id == item_id {
                    self.active_item_id.clear();
                    self.delta_observed = false;
                }
                true
            }
            Some("reasoning") => {
                let summary = string_list(item.get("summary"));
                let (kind, parts) = if summary.is_empty() {
                    ("content", string_list(item.get("content")))
                } else {
                    ("summary", summary)
                };
                for (index, text) in parts.iter().enumerate() {
                    transcript.upsert_reasoning(&format!("{item_id}:{kind}:{index}"), text);
                }
                let prefix = format!("{item_id}:");
                self.reasoning_fragments
                    .retain(|fragment, _| !fragment.starts_with(&prefix));
                self.summarized_items.remove(item_id);
                true
            }
            Some("userMessage") => {
                let text = user_message_text(item);
                let meta = MessageMeta::turn(self.current_turn_id.clone())
                    .with_created_at(envelope.timestamp);
                transcript.append_user_message(&text, meta);
                true
            }
            Some(kind) if !kind.trim().is_empty() => {
                let text = serde_json::to_string(item).unwrap_or_else(|_| item.to_string());
                transcript.append_system(&text, MessageMeta::default())
            }
            _ => false,
        }
    }

    fn reasoning_delta(
        &mut self,
        fragment_id: &str,
        params: &Value,
        transcript: &mut TranscriptState,
    ) -> bool {
        let Some(delta) = str_field(params, "delta") else {
            return false;
        };
        let text = self
            .reasoning_fragments
            .entry(fragment_id.to_string())
            .or_default();
        text.push_str(delta);
        transcript.upsert_reasoning(fragment_id, text);
        true
    }

    fn surface_approval(
        &mut self,
        request: ApprovalRequest,
        transcript: &mut TranscriptState,
    ) -> bool {
        transcript.upsert_approval(&request);
        self.pending_approval = Some(request);
        true
    }

    fn clear_item_state(&mut self) {
        self.active_item_id.clear();
        self.delta_observed = false;
        self.reasoning_fragments.clear();
        self.summarized_items.clear();
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn turn_id(params: &Value) -> String {
    params
        .get("turn")
        .and_then(|turn| str_field(turn, "id"))
        .or_else(|| str_field(params, "turnId"))
        .unwrap_or_default()
        .to_string()
}

/// Request ids arrive as strings or integers.
fn normalize_request_id(value: &Value) -> Option<String> {
    if let Some(raw) = value.as_str() {
        return Some(raw.to_owned());
    }
    if let Some(raw) = value.as_i64() {
        return Some(raw.to_string());
    }
    if let Some(raw) = value.as_u64() {
        return Some(raw.to_string());
    }
    None
}

fn request_id(envelope: &ProtocolEnvelope) -> String {
    envelope
        .id
        .map(|id| id.to_string())
        .or_else(|| {
            ["requestId", "callId", "itemId"]
                .iter()
                .find_map(|key| envelope.params.get(*key).and_then(normalize_request_id))
        })
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.clone()),
                other => str_field(other, "text").map(str::to_string),
            })
            .collect(),
        Some(Value::String(text)) => vec![text.clone()],
        _ => Vec::new(),
    }
}

fn user_message_text(item: &Value) -> String {
    if let Some(text) = str_field(item, "text") {
        return text.to_string();
    }
    string_list(item.get("content")).join("\n")
}

fn command_approval(envelope: &ProtocolEnvelope) -> ApprovalRequest {
    let params = &envelope.params;
    let summary = match params.get("command") {
        Some(Value::String(command)) => command.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => "Run command".to_string(),
    };
    ApprovalRequest {
        request_id: request_id(envelope),
        method: envelope.method.clone(),
        summary,
        detail: str_field(params, "reason").unwrap_or_default().to_string(),
        context: str_field(params, "cwd")
            .map(|cwd| format!("cwd: {cwd}"))
            .unwrap_or_default(),
        created_at: envelope.timestamp,
    }
}

fn file_change_approval(envelope: &ProtocolEnvelope) -> ApprovalRequest {
    let params = &envelope.params;
    let summary = match params.get("fileChanges").and_then(Value::as_object) {
        Some(changes) if changes.len() == 1 => "Apply changes to 1 file".to_string(),
        Some(changes) => format!("Apply changes to {} files", changes.len()),
        None => "Apply file changes".to_string(),
    };
    ApprovalRequest {
        request_id: request_id(envelope),
        method: envelope.method.clone(),
        summary,
        detail: str_field(params, "reason").unwrap_or_default().to_string(),
        context: str_field(params, "grantRoot")
            .map(|root| format!("root: {root}"))
            .unwrap_or_default(),
        created_at: envelope.timestamp,
    }
}
