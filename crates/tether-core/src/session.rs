//! Live session: the cooperative control loop tying streams, transcript,
//! log buffer and projections together.
//!
//! Nothing here blocks. The host calls [`LiveSession::tick`] once per frame;
//! background work (formatting, projection) reports back through channels
//! and is applied on a later tick.

use serde_json::Value;
use tether_types::{ApprovalRequest, DisplayBlock, ProtocolEnvelope};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::projection::{
    DebugPanelInput, DebugPanelProjector, ProjectionCoordinator, TranscriptProjector,
};
use crate::retention::{FormatterHandle, RetentionBuffer};
use crate::stream::{
    CancelFn, ItemStreamController, LogStreamController, ProtocolStreamController, TickOutcome,
};
use crate::transcript::TranscriptState;

/// What one [`LiveSession::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub protocol: TickOutcome,
    pub items: TickOutcome,
    pub log: TickOutcome,
    /// Formatter results applied to the log buffer.
    pub formatted: usize,
    pub viewport_scheduled: bool,
    pub viewport_applied: bool,
    pub debug_panel_scheduled: bool,
    pub debug_panel_applied: bool,
}

impl TickReport {
    /// All three streams folded into one outcome.
    pub fn streams(&self) -> TickOutcome {
        self.protocol.merge(self.items).merge(self.log)
    }

    /// Any stream delivered messages this tick.
    pub fn had_work(&self) -> bool {
        self.streams().had_work
    }

    /// Something visible changed this tick.
    pub fn needs_redraw(&self) -> bool {
        self.viewport_applied || self.debug_panel_applied
    }
}

/// State for one active session view.
///
/// Must be created inside a tokio runtime (the formatter worker and
/// projections run there).
#[derive(Debug)]
pub struct LiveSession {
    max_per_tick: usize,
    transcript: TranscriptState,
    protocol: ProtocolStreamController,
    items: ItemStreamController,
    log: LogStreamController,
    log_buffer: RetentionBuffer,
    viewport: ProjectionCoordinator<TranscriptProjector>,
    debug_panel: ProjectionCoordinator<DebugPanelProjector>,
    viewport_lines: Vec<String>,
    debug_panel_lines: Vec<String>,
    debug_panel_expanded: bool,
    /// Transcript revision last handed to the viewport projector.
    projected_revision: Option<u64>,
    /// Log buffer revision last handed to the debug panel projector.
    projected_log_revision: Option<u64>,
    debug_panel_dirty: bool,
}

impl LiveSession {
    pub fn new(config: &Config) -> Self {
        let tracked = config.projection.effective_tracked_capacity();
        let formatter = FormatterHandle::spawn(config.log_buffer.format_queue_capacity);
        Self {
            max_per_tick: config.streams.max_per_tick.max(1),
            transcript: TranscriptState::new(config.transcript.max_blocks)
                .with_collapse_reasoning(config.transcript.collapse_reasoning),
            protocol: ProtocolStreamController::new(),
            items: ItemStreamController::new(),
            log: LogStreamController::new(),
            log_buffer: RetentionBuffer::new(&config.log_buffer).with_formatter(formatter),
            viewport: ProjectionCoordinator::new(TranscriptProjector::default(), tracked),
            debug_panel: ProjectionCoordinator::new(
                DebugPanelProjector::new(config.projection.debug_panel_collapsed_lines),
                tracked,
            ),
            viewport_lines: Vec::new(),
            debug_panel_lines: Vec::new(),
            debug_panel_expanded: false,
            projected_revision: None,
            projected_log_revision: None,
            debug_panel_dirty: false,
        }
    }

    // ------------------------------------------------------------------------
    // streams
    // ------------------------------------------------------------------------

    pub fn attach_protocol(
        &mut self,
        rx: mpsc::Receiver<ProtocolEnvelope>,
        cancel: Option<CancelFn>,
    ) {
        self.protocol.attach(rx, cancel);
    }

    pub fn attach_items(&mut self, rx: mpsc::Receiver<Value>, cancel: Option<CancelFn>) {
        self.items.attach(rx, cancel);
    }

    pub fn attach_log(&mut self, rx: mpsc::Receiver<String>, cancel: Option<CancelFn>) {
        self.log.attach(rx, cancel, &mut self.log_buffer);
    }

    pub fn detach_protocol(&mut self) {
        self.protocol.detach();
    }

    pub fn detach_items(&mut self) {
        self.items.detach();
    }

    pub fn detach_log(&mut self) {
        self.log.detach(&mut self.log_buffer);
    }

    /// Any stream still has a channel attached.
    pub fn has_attached_streams(&self) -> bool {
        self.protocol.is_attached() || self.items.is_attached() || self.log.is_attached()
    }

    /// A projection result is still outstanding.
    pub fn has_pending_projections(&self) -> bool {
        self.viewport.is_pending() || self.debug_panel.is_pending()
    }

    /// Log lines handed to the formatter that haven't been answered yet.
    pub fn has_pending_format(&self) -> bool {
        self.log_buffer.pending_format() > 0
    }

    /// Nothing left to drain or wait for.
    pub fn is_idle(&self) -> bool {
        !self.has_attached_streams()
            && !self.has_pending_format()
            && !self.has_pending_projections()
    }

    /// Switches to another session: detaches transcript streams, loads the
    /// snapshot, and makes any in-flight viewport projection stale.
    pub fn switch_session(&mut self, snapshot: Vec<DisplayBlock>) {
        self.protocol.detach();
        self.items.detach();
        self.protocol.clear_approval();
        self.transcript.replace_snapshot(snapshot);
        self.viewport.invalidate();
        self.projected_revision = None;
    }

    /// Detaches every stream and stops the formatter.
    pub fn shutdown(&mut self) {
        self.protocol.detach();
        self.items.detach();
        self.log.detach(&mut self.log_buffer);
        self.log_buffer.close();
    }

    // ------------------------------------------------------------------------
    // control loop
    // ------------------------------------------------------------------------

    /// Drains every stream once, applies ready background results and
    /// schedules projections for whatever changed.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            protocol: self
                .protocol
                .consume_tick(self.max_per_tick, &mut self.transcript),
            items: self.items.consume_tick(self.max_per_tick, &mut self.transcript),
            log: self.consume_log(),
            formatted: self.log_buffer.drain_formatted(),
            ..TickReport::default()
        };

        report.viewport_scheduled = self.schedule_viewport();
        report.debug_panel_scheduled = self.schedule_debug_panel();

        if let Some(lines) = self.viewport.drain() {
            self.viewport_lines = lines;
            report.viewport_applied = true;
        }
        if let Some(lines) = self.debug_panel.drain() {
            self.debug_panel_lines = lines;
            report.debug_panel_applied = true;
        }
        report
    }

    /// Waits for outstanding formatting, re-projects whatever it changed,
    /// then waits for and applies the current projections.
    pub async fn settle(&mut self) {
        self.log_buffer.settle_formatted().await;
        self.schedule_viewport();
        self.schedule_debug_panel();
        if let Some(lines) = self.viewport.wait_current().await {
            self.viewport_lines = lines;
        }
        if let Some(lines) = self.debug_panel.wait_current().await {
            self.debug_panel_lines = lines;
        }
    }

    /// Drains the log stream, taking no more chunks than the formatter can
    /// queue so a burst doesn't skip formatting.
    fn consume_log(&mut self) -> TickOutcome {
        let budget = self
            .log_buffer
            .format_room()
            .map_or(self.max_per_tick, |room| room.min(self.max_per_tick));
        if budget == 0 {
            return TickOutcome::default();
        }
        self.log.consume_tick(budget, &mut self.log_buffer)
    }

    fn schedule_viewport(&mut self) -> bool {
        let revision = self.transcript.revision();
        if self.projected_revision == Some(revision) {
            return false;
        }
        self.projected_revision = Some(revision);
        self.viewport.schedule(self.transcript.blocks().to_vec());
        true
    }

    fn schedule_debug_panel(&mut self) -> bool {
        let revision = self.log_buffer.revision();
        if !self.debug_panel_dirty && self.projected_log_revision == Some(revision) {
            return false;
        }
        self.debug_panel_dirty = false;
        self.projected_log_revision = Some(revision);
        self.debug_panel.schedule(DebugPanelInput {
            lines: self.log_buffer.display_snapshot(),
            expanded: self.debug_panel_expanded,
        });
        true
    }

    // ------------------------------------------------------------------------
    // views
    // ------------------------------------------------------------------------

    pub fn transcript(&self) -> &TranscriptState {
        &self.transcript
    }

    pub fn blocks(&self) -> &[DisplayBlock] {
        self.transcript.blocks()
    }

    /// Last applied viewport projection.
    pub fn viewport_lines(&self) -> &[String] {
        &self.viewport_lines
    }

    /// Last applied debug panel projection.
    pub fn debug_panel_lines(&self) -> &[String] {
        &self.debug_panel_lines
    }

    pub fn is_debug_panel_expanded(&self) -> bool {
        self.debug_panel_expanded
    }

    /// Flips the panel between tail and full view; re-projected next tick.
    pub fn toggle_debug_panel(&mut self) {
        self.debug_panel_expanded = !self.debug_panel_expanded;
        self.debug_panel_dirty = true;
    }

    pub fn log_buffer(&self) -> &RetentionBuffer {
        &self.log_buffer
    }

    pub fn log_text(&mut self) -> &str {
        self.log_buffer.joined_text()
    }

    pub fn last_error(&self) -> &str {
        self.protocol.last_error()
    }

    pub fn pending_approval(&self) -> Option<&ApprovalRequest> {
        self.protocol.pending_approval()
    }

    pub fn clear_approval(&mut self) {
        self.protocol.clear_approval();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::ProjectionConfig;

    fn config() -> Config {
        let mut config = Config::default();
        config.streams.max_per_tick = 8;
        config.projection = ProjectionConfig {
            debug_panel_collapsed_lines: 2,
            ..ProjectionConfig::default()
        };
        config
    }

    #[tokio::test]
    async fn items_flow_into_viewport() {
        let mut session = LiveSession::new(&config());
        let (tx, rx) = mpsc::channel(8);
        session.attach_items(rx, None);

        tx.send(json!({ "type": "user_message", "text": "hello" }))
            .await
            .unwrap();
        tx.send(json!({ "type": "agent_message", "text": "hi there" }))
            .await
            .unwrap();
        drop(tx);

        let report = session.tick();
        assert_eq!(report.items.consumed, 2);
        assert!(report.items.closed);
        assert_eq!(report.streams().consumed, 2);
        assert!(report.viewport_scheduled);

        session.settle().await;
        assert_eq!(
            session.viewport_lines(),
            ["you: hello", "", "agent: hi there"]
        );

        // No change, no new projection.
        let report = session.tick();
        assert!(!report.viewport_scheduled);
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn tick_respects_per_tick_cap() {
        let mut cfg = config();
        cfg.streams.max_per_tick = 2;
        let mut session = LiveSession::new(&cfg);
        let (tx, rx) = mpsc::channel(8);
        session.attach_log(rx, None);
        for i in 0..5 {
            tx.send(format!("line {i}\n")).await.unwrap();
        }

        assert_eq!(session.tick().log.consumed, 2);
        assert_eq!(session.tick().log.consumed, 2);
        assert_eq!(session.tick().log.consumed, 1);
        assert_eq!(session.log_buffer().len(), 5);
    }

    #[tokio::test]
    async fn debug_panel_toggle_reprojects() {
        let mut session = LiveSession::new(&config());
        let (tx, rx) = mpsc::channel(8);
        session.attach_log(rx, None);
        tx.send("a\nb\nc\nd\n".to_string()).await.unwrap();
        drop(tx);

        session.tick();
        session.settle().await;
        assert_eq!(session.debug_panel_lines(), ["… 2 earlier lines", "c", "d"]);
        assert_eq!(session.log_text(), "a\nb\nc\nd");

        session.toggle_debug_panel();
        assert!(session.is_debug_panel_expanded());
        let report = session.tick();
        assert!(report.debug_panel_scheduled);
        session.settle().await;
        assert_eq!(session.debug_panel_lines(), ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn protocol_errors_and_approvals_are_surfaced() {
        let mut session = LiveSession::new(&config());
        let (tx, rx) = mpsc::channel(8);
        session.attach_protocol(rx, None);
        tx.send(ProtocolEnvelope::request(
            4,
            "item/fileChange/requestApproval",
            json!({ "reason": "write config" }),
        ))
        .await
        .unwrap();
        tx.send(ProtocolEnvelope::notification(
            "error",
            json!({ "error": { "message": "quota exceeded" } }),
        ))
        .await
        .unwrap();

        session.tick();
        assert_eq!(session.last_error(), "quota exceeded");
        assert_eq!(
            session.pending_approval().map(|r| r.request_id.as_str()),
            Some("4")
        );
        session.clear_approval();
        assert!(session.pending_approval().is_none());
        assert_eq!(session.blocks().len(), 1);
    }

    #[tokio::test]
    async fn switch_session_discards_in_flight_viewport() {
        let mut session = LiveSession::new(&config());
        let (tx, rx) = mpsc::channel(8);
        session.attach_items(rx, None);
        tx.send(json!({ "type": "agent_message", "text": "old session" }))
            .await
            .unwrap();
        session.tick();

        session.switch_session(vec![DisplayBlock::agent("restored")]);
        assert!(!session.has_attached_streams());
        session.tick();
        session.settle().await;
        assert_eq!(session.viewport_lines(), ["agent: restored"]);
    }

    #[tokio::test]
    async fn formatting_in_flight_keeps_session_busy() {
        let mut cfg = config();
        cfg.streams.max_per_tick = 64;
        let mut session = LiveSession::new(&cfg);
        let (tx, rx) = mpsc::channel(64);
        session.attach_log(rx, None);
        for i in 0..40 {
            tx.send(format!("[INFO] line {i} {{\"k\":{i}}}\n")).await.unwrap();
        }
        drop(tx);

        session.tick();
        assert!(!session.has_attached_streams());
        assert!(!session.is_idle());

        session.settle().await;
        assert!(!session.has_pending_format());
        assert!(session.is_idle());
        session.toggle_debug_panel();
        session.tick();
        session.settle().await;
        let formatted = session
            .debug_panel_lines()
            .iter()
            .filter(|line| line.starts_with("  \"k\": "))
            .count();
        assert_eq!(formatted, 40);
    }

    #[tokio::test]
    async fn log_drain_waits_for_formatter_room() {
        let mut cfg = config();
        cfg.log_buffer.format_queue_capacity = 2;
        let mut session = LiveSession::new(&cfg);
        let (tx, rx) = mpsc::channel(8);
        session.attach_log(rx, None);
        for i in 0..5 {
            tx.send(format!("{{\"n\":{i}}}\n")).await.unwrap();
        }

        // The worker hasn't run yet on this single-threaded runtime.
        assert_eq!(session.tick().log.consumed, 2);
        assert_eq!(session.tick().log.consumed, 0);

        session.settle().await;
        assert_eq!(session.tick().log.consumed, 2);
        assert_eq!(session.log_buffer().len(), 4);
    }

    #[tokio::test]
    async fn detach_log_resets_buffer() {
        let mut session = LiveSession::new(&config());
        let (tx, rx) = mpsc::channel(8);
        session.attach_log(rx, None);
        tx.send("kept?\n".to_string()).await.unwrap();
        session.tick();
        assert_eq!(session.log_buffer().len(), 1);

        session.detach_log();
        assert!(session.log_buffer().is_empty());
        session.shutdown();
        assert!(session.log_buffer().is_closed());
    }
}
