//! Transcript merge engine.
//!
//! Turns classified events into an ordered, deduplicated sequence of
//! [`DisplayBlock`]s. Blocks are only ever appended or updated in place;
//! retention trims from the front and re-validates the stream cursor.
//!
//! ## Merge policy for assistant text
//!
//! Evaluated in this order:
//! 1. `force_next_split` (an explicit completion marker was seen): new block.
//! 2. Last block is an agent block whose identity matches (provider message
//!    id when both sides have one, otherwise turn id): merge into it. A
//!    known mismatch starts a new block.
//! 3. A delta segment is still open: merge into the active block.
//! 4. Otherwise: new block.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tether_types::{ApprovalRequest, BlockStatus, DisplayBlock, Role};

use super::classify::{Classified, InboundEvent, classify};
use super::reasoning::ReasoningAccumulator;

/// Default block cap when none is configured.
pub const DEFAULT_MAX_BLOCKS: usize = 2000;

/// Identity and timing carried by an incoming message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMeta {
    pub turn_id: String,
    pub provider_message_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageMeta {
    pub fn turn(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            ..Self::default()
        }
    }

    pub fn with_provider_message_id(mut self, id: impl Into<String>) -> Self {
        self.provider_message_id = id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Identity {
    Same,
    Different,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeTarget {
    Existing(usize),
    NewBlock,
}

fn identity(block: &DisplayBlock, meta: &MessageMeta) -> Identity {
    if !block.provider_message_id.is_empty() && !meta.provider_message_id.is_empty() {
        if block.provider_message_id == meta.provider_message_id {
            Identity::Same
        } else {
            Identity::Different
        }
    } else if !block.turn_id.is_empty() && !meta.turn_id.is_empty() {
        if block.turn_id == meta.turn_id {
            Identity::Same
        } else {
            Identity::Different
        }
    } else {
        Identity::Unknown
    }
}

/// Fills identifiers the block doesn't have yet and keeps the earliest timestamp.
fn backfill(block: &mut DisplayBlock, meta: &MessageMeta) {
    if block.turn_id.is_empty() && !meta.turn_id.is_empty() {
        block.turn_id.clone_from(&meta.turn_id);
    }
    if block.provider_message_id.is_empty() && !meta.provider_message_id.is_empty() {
        block
            .provider_message_id
            .clone_from(&meta.provider_message_id);
    }
    block.created_at = match (block.created_at, meta.created_at) {
        (Some(existing), Some(incoming)) => Some(existing.min(incoming)),
        (existing, incoming) => existing.or(incoming),
    };
}

/// Card text and request metadata both match.
fn same_approval(existing: &DisplayBlock, incoming: &DisplayBlock) -> bool {
    existing.text == incoming.text
        && existing.method == incoming.method
        && existing.created_at == incoming.created_at
}

fn new_group_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ordered display blocks for one session view plus merge cursors.
#[derive(Debug, Clone)]
pub struct TranscriptState {
    blocks: Vec<DisplayBlock>,
    /// Block currently receiving deltas.
    active_stream_index: Option<usize>,
    /// A delta segment started and no completion marker followed yet.
    pending_open_segment: bool,
    /// Set by a completion marker; the next assistant text never merges.
    force_next_split: bool,
    max_blocks: usize,
    collapse_reasoning: bool,
    reasoning: ReasoningAccumulator,
    revision: u64,
}

impl Default for TranscriptState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCKS)
    }
}

impl TranscriptState {
    /// Creates an empty transcript. `max_blocks == 0` disables trimming.
    pub fn new(max_blocks: usize) -> Self {
        Self {
            blocks: Vec::new(),
            active_stream_index: None,
            pending_open_segment: false,
            force_next_split: false,
            max_blocks,
            collapse_reasoning: true,
            reasoning: ReasoningAccumulator::new(new_group_id()),
            revision: 0,
        }
    }

    pub fn with_collapse_reasoning(mut self, collapse: bool) -> Self {
        self.collapse_reasoning = collapse;
        self
    }

    pub fn blocks(&self) -> &[DisplayBlock] {
        &self.blocks
    }

    /// Bumped on every visible change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn active_stream_index(&self) -> Option<usize> {
        self.active_stream_index
    }

    pub fn has_open_segment(&self) -> bool {
        self.pending_open_segment
    }

    /// Clears everything (session switch).
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.clear_cursors();
        self.reasoning.reset(new_group_id());
        self.touch();
    }

    /// Replaces the blocks wholesale with an externally loaded snapshot.
    pub fn replace_snapshot(&mut self, blocks: Vec<DisplayBlock>) {
        self.blocks = blocks;
        self.clear_cursors();
        self.reasoning.reset(new_group_id());
        self.touch();
    }

    /// Begins a logical turn: closes any open segment and starts a new
    /// reasoning group. Re-announcing the current turn keeps its reasoning.
    pub fn start_turn(&mut self, turn_id: &str) {
        self.close_open_segment(BlockStatus::None);
        if !turn_id.is_empty() && self.reasoning.group_id() == turn_id {
            return;
        }
        let group = if turn_id.is_empty() {
            new_group_id()
        } else {
            turn_id.to_string()
        };
        tracing::trace!(group = %group, "reasoning group reset");
        self.reasoning.reset(group);
    }

    /// Appends a user message unless it duplicates an existing one.
    pub fn append_user_message(&mut self, text: &str, meta: MessageMeta) -> bool {
        if text.trim().is_empty() || self.is_duplicate(Role::User, text, &meta) {
            return false;
        }
        self.start_turn(&meta.turn_id);
        self.force_next_split = false;

        let mut block = DisplayBlock::user(text);
        backfill(&mut block, &meta);
        self.push(block);
        true
    }

    /// Opens a streaming segment, reusing a block when the merge policy allows.
    pub fn start_agent_segment(&mut self, turn_id: &str, provider_message_id: &str) {
        let meta = MessageMeta::turn(turn_id).with_provider_message_id(provider_message_id);
        self.open_segment(&meta);
    }

    /// Appends streamed text to the open segment, opening one if needed.
    pub fn append_agent_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let index = match self.open_stream_index() {
            Some(index) => index,
            None => self.open_segment(&MessageMeta::default()),
        };
        self.blocks[index].text.push_str(text);
        self.touch();
    }

    /// Closes the open segment and forces the next assistant text into a new block.
    pub fn finish_agent_segment(&mut self) {
        self.close_open_segment(BlockStatus::None);
        self.force_next_split = true;
    }

    /// Marks the streaming block failed and closes the segment.
    pub fn fail_agent_segment(&mut self) {
        self.close_open_segment(BlockStatus::Failed);
        self.force_next_split = true;
    }

    /// Merges or appends a complete assistant message.
    pub fn append_agent_message(&mut self, text: &str, meta: MessageMeta) -> bool {
        if text.trim().is_empty() || self.is_duplicate(Role::Agent, text, &meta) {
            return false;
        }

        match self.merge_target(&meta) {
            MergeTarget::Existing(index) => {
                let block = &mut self.blocks[index];
                if block.text.is_empty() {
                    block.text = text.to_string();
                } else {
                    block.text.push_str(text);
                }
                backfill(block, &meta);
                self.touch();
            }
            MergeTarget::NewBlock => {
                let mut block = DisplayBlock::agent(text);
                backfill(&mut block, &meta);
                self.push(block);
            }
        }
        true
    }

    /// Appends a system note unless an identical one exists.
    pub fn append_system(&mut self, text: &str, meta: MessageMeta) -> bool {
        if text.trim().is_empty() || self.is_duplicate(Role::System, text, &meta) {
            return false;
        }
        let mut block = DisplayBlock::system(text);
        backfill(&mut block, &meta);
        self.push(block);
        true
    }

    /// Routes a reasoning fragment through the accumulator and mirrors the
    /// aggregate into one block per group.
    pub fn upsert_reasoning(&mut self, fragment_id: &str, text: &str) -> bool {
        let fragment_id = if fragment_id.is_empty() {
            self.reasoning.next_anonymous_id()
        } else {
            fragment_id.to_string()
        };
        let update = self.reasoning.add(&fragment_id, text);
        if !update.changed || update.group_id.is_empty() || update.text.is_empty() {
            return false;
        }

        let existing = self
            .blocks
            .iter()
            .rposition(|b| b.role == Role::Reasoning && b.group_id == update.group_id);
        match existing {
            Some(index) => {
                self.blocks[index].text = update.text;
                self.touch();
            }
            None => {
                let mut block = DisplayBlock::reasoning(update.group_id, update.text);
                block.collapsed = self.collapse_reasoning;
                self.push(block);
            }
        }
        true
    }

    /// Inserts or replaces the approval card for `request.request_id`.
    ///
    /// Requests without an id are always appended.
    pub fn upsert_approval(&mut self, request: &ApprovalRequest) -> bool {
        let existing = (!request.request_id.is_empty())
            .then(|| {
                self.blocks.iter().position(|b| {
                    b.role == Role::Approval && b.request_id == request.request_id
                })
            })
            .flatten();

        let block = DisplayBlock::approval(request);
        match existing {
            Some(index) if same_approval(&self.blocks[index], &block) => false,
            Some(index) => {
                self.blocks[index] = block;
                self.touch();
                true
            }
            None => {
                self.push(block);
                true
            }
        }
    }

    /// Classifies a pre-decoded item and applies it.
    pub fn append_generic_item(&mut self, payload: &Value) -> bool {
        match classify(payload) {
            Classified::Known(event) => self.apply_event(event),
            Classified::Unknown(raw) => {
                let text = serde_json::to_string(&raw).unwrap_or_else(|_| raw.to_string());
                self.append_system(&text, MessageMeta::default())
            }
            Classified::Untyped => {
                tracing::trace!("dropping untyped item payload");
                false
            }
        }
    }

    /// Applies one classified event. Returns whether anything changed.
    pub fn apply_event(&mut self, event: InboundEvent) -> bool {
        let before = self.revision;
        match event {
            InboundEvent::LogLine { text } => {
                self.append_system(&text, MessageMeta::default());
            }
            InboundEvent::AgentMessageDelta {
                delta,
                turn_id,
                provider_message_id,
            } => {
                if self.open_stream_index().is_none() {
                    self.start_agent_segment(&turn_id, &provider_message_id);
                }
                self.append_agent_delta(&delta);
            }
            InboundEvent::AgentMessage {
                text,
                turn_id,
                provider_message_id,
                created_at,
            } => {
                let meta = MessageMeta::turn(turn_id)
                    .with_provider_message_id(provider_message_id)
                    .with_created_at(created_at);
                self.append_agent_message(&text, meta);
            }
            InboundEvent::UserMessage {
                text,
                turn_id,
                created_at,
            } => {
                self.append_user_message(&text, MessageMeta::turn(turn_id).with_created_at(created_at));
            }
            InboundEvent::Reasoning { id, text } => {
                self.upsert_reasoning(&id, &text);
            }
            InboundEvent::ApprovalRequest(request) => {
                self.upsert_approval(&request);
            }
            InboundEvent::EnteredReviewMode { hint } => {
                let text = if hint.trim().is_empty() {
                    "Entered review mode".to_string()
                } else {
                    format!("Entered review mode: {}", hint.trim())
                };
                self.append_system(&text, MessageMeta::default());
            }
            InboundEvent::ExitedReviewMode => {
                self.append_system("Exited review mode", MessageMeta::default());
            }
            InboundEvent::TaskComplete => {
                self.finish_agent_segment();
            }
        }
        self.revision != before
    }

    // ------------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------------

    /// Active index, only while a segment is open and the index is valid.
    fn open_stream_index(&self) -> Option<usize> {
        if !self.pending_open_segment {
            return None;
        }
        self.active_stream_index
            .filter(|&index| index < self.blocks.len() && self.blocks[index].role == Role::Agent)
    }

    fn open_segment(&mut self, meta: &MessageMeta) -> usize {
        let index = match self.merge_target(meta) {
            MergeTarget::Existing(index) => {
                backfill(&mut self.blocks[index], meta);
                index
            }
            MergeTarget::NewBlock => {
                let mut block = DisplayBlock::agent("");
                backfill(&mut block, meta);
                self.push(block);
                self.blocks.len() - 1
            }
        };
        self.blocks[index].status = BlockStatus::Sending;
        self.active_stream_index = Some(index);
        self.pending_open_segment = true;
        self.touch();
        index
    }

    fn merge_target(&mut self, meta: &MessageMeta) -> MergeTarget {
        if self.force_next_split {
            self.force_next_split = false;
            return MergeTarget::NewBlock;
        }

        if let Some(last) = self.blocks.len().checked_sub(1)
            && self.blocks[last].role == Role::Agent
        {
            match identity(&self.blocks[last], meta) {
                Identity::Same => return MergeTarget::Existing(last),
                Identity::Different => return MergeTarget::NewBlock,
                Identity::Unknown => {}
            }
        }

        match self.open_stream_index() {
            Some(index) => MergeTarget::Existing(index),
            None => MergeTarget::NewBlock,
        }
    }

    fn is_duplicate(&self, role: Role, text: &str, meta: &MessageMeta) -> bool {
        let trimmed = text.trim();
        self.blocks.iter().any(|block| {
            block.role == role
                && block.text.trim() == trimmed
                && ((!meta.turn_id.is_empty() && meta.turn_id == block.turn_id)
                    || matches!(
                        (meta.created_at, block.created_at),
                        (Some(incoming), Some(existing)) if incoming == existing
                    ))
        })
    }

    fn close_open_segment(&mut self, status: BlockStatus) {
        if let Some(index) = self.active_stream_index
            && let Some(block) = self.blocks.get_mut(index)
            && block.status != status
        {
            block.status = status;
            self.touch();
        }
        self.active_stream_index = None;
        self.pending_open_segment = false;
    }

    fn clear_cursors(&mut self) {
        self.active_stream_index = None;
        self.pending_open_segment = false;
        self.force_next_split = false;
    }

    fn push(&mut self, block: DisplayBlock) {
        self.blocks.push(block);
        self.touch();
        self.enforce_retention();
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Drops the oldest blocks past the cap and rebases the stream cursor.
    fn enforce_retention(&mut self) {
        if self.max_blocks == 0 || self.blocks.len() <= self.max_blocks {
            return;
        }
        let excess = self.blocks.len() - self.max_blocks;
        self.blocks.drain(..excess);
        tracing::trace!(dropped = excess, "transcript retention trimmed blocks");

        self.active_stream_index = self
            .active_stream_index
            .and_then(|index| index.checked_sub(excess))
            .map(|index| index.min(self.blocks.len().saturating_sub(1)));
        if self.active_stream_index.is_none() {
            self.pending_open_segment = false;
        }
    }
}
