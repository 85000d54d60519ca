//! Capped log history with best-effort formatting.

use std::collections::VecDeque;

use super::formatter::{FormatRequest, FormatResult, FormatterHandle};
use crate::config::LogBufferConfig;
use crate::stream::LineSplitter;

/// One retained line. `display` starts as a copy of `raw` and may later be
/// replaced by the formatter's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub id: u64,
    pub raw: String,
    pub display: String,
}

impl LogLine {
    /// Bytes counted against the cap (raw text, newline excluded).
    pub fn bytes(&self) -> usize {
        self.raw.len()
    }
}

/// Log lines bounded by count and total bytes, oldest evicted first.
///
/// A cap of `0` disables that cap.
#[derive(Debug)]
pub struct RetentionBuffer {
    lines: VecDeque<LogLine>,
    total_bytes: usize,
    max_lines: usize,
    max_bytes: usize,
    format_max_line_bytes: usize,
    next_line_id: u64,
    generation: u64,
    revision: u64,
    splitter: LineSplitter,
    formatter: Option<FormatterHandle>,
    joined: Option<String>,
    closed: bool,
}

impl RetentionBuffer {
    pub fn new(config: &LogBufferConfig) -> Self {
        Self::with_caps(config.max_lines, config.max_bytes)
            .with_format_max_line_bytes(config.format_max_line_bytes)
    }

    pub fn with_caps(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            total_bytes: 0,
            max_lines,
            max_bytes,
            format_max_line_bytes: LogBufferConfig::default().format_max_line_bytes,
            next_line_id: 0,
            generation: 0,
            revision: 0,
            splitter: LineSplitter::new(),
            formatter: None,
            joined: None,
            closed: false,
        }
    }

    pub fn with_format_max_line_bytes(mut self, bytes: usize) -> Self {
        self.format_max_line_bytes = bytes;
        self
    }

    /// Attaches a formatter worker. Without one, lines stay raw.
    pub fn with_formatter(mut self, formatter: FormatterHandle) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Bumped on every reset; results from older generations are discarded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bumped on every visible change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn raw_lines(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.raw.as_str()).collect()
    }

    /// Owned copy of the display text, for handing to a background projector.
    pub fn display_snapshot(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.display.clone()).collect()
    }

    /// Appends a chunk; completed lines are retained, the tail is held.
    pub fn append_text(&mut self, chunk: &str) {
        if self.closed {
            return;
        }
        for line in self.splitter.push(chunk) {
            self.push_line(line);
        }
    }

    /// Retains the held tail as a line of its own (stream ended).
    pub fn flush_partial(&mut self) {
        if let Some(tail) = self.splitter.take_partial() {
            self.push_line(tail);
        }
    }

    /// Retains one complete line and queues it for formatting.
    pub fn push_line(&mut self, line: String) {
        if self.closed {
            return;
        }
        self.next_line_id += 1;
        let id = self.next_line_id;

        if let Some(formatter) = &mut self.formatter
            && line.len() <= self.format_max_line_bytes
            && line.contains(['{', '['])
        {
            formatter.try_submit(FormatRequest {
                generation: self.generation,
                line_id: id,
                line: line.clone(),
            });
        }

        self.total_bytes += line.len();
        self.lines.push_back(LogLine {
            id,
            display: line.clone(),
            raw: line,
        });
        self.evict();
        self.touch();
    }

    /// Applies every ready formatter result. Returns how many were applied.
    pub fn drain_formatted(&mut self) -> usize {
        let mut ready = Vec::new();
        if let Some(formatter) = self.formatter.as_mut() {
            while let Some(result) = formatter.try_recv() {
                ready.push(result);
            }
        }
        ready
            .into_iter()
            .filter(|result| self.apply_format_result(result))
            .count()
    }

    /// Formatter replies still outstanding.
    pub fn pending_format(&self) -> usize {
        self.formatter.as_ref().map_or(0, FormatterHandle::in_flight)
    }

    /// Free formatter queue slots, or `None` when lines aren't being formatted.
    pub fn format_room(&self) -> Option<usize> {
        self.formatter
            .as_ref()
            .filter(|formatter| !formatter.is_closed())
            .map(FormatterHandle::room)
    }

    /// Waits until the formatter has answered every accepted line and applies
    /// the results. Returns how many changed a line.
    pub async fn settle_formatted(&mut self) -> usize {
        let mut applied = self.drain_formatted();
        while self.pending_format() > 0 {
            let Some(formatter) = self.formatter.as_mut() else {
                break;
            };
            let Some(result) = formatter.recv().await else {
                break;
            };
            if self.apply_format_result(&result) {
                applied += 1;
            }
        }
        applied
    }

    /// Replaces a line's display text if the result is still relevant.
    pub fn apply_format_result(&mut self, result: &FormatResult) -> bool {
        let Some(formatted) = result.formatted.as_ref() else {
            return false;
        };
        if result.generation != self.generation {
            return false;
        }
        // Ids are strictly increasing from head to tail.
        let Ok(index) = self
            .lines
            .binary_search_by_key(&result.line_id, |line| line.id)
        else {
            return false;
        };
        let line = &mut self.lines[index];
        if line.display == *formatted {
            return false;
        }
        line.display.clone_from(formatted);
        self.touch();
        true
    }

    /// Clears all content and starts the next generation.
    pub fn reset(&mut self) {
        self.lines.clear();
        self.total_bytes = 0;
        self.splitter.clear();
        self.generation += 1;
        self.touch();
    }

    /// Stops the formatter. Further appends are ignored. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(formatter) = self.formatter.as_mut() {
            formatter.shutdown();
        }
    }

    /// Display lines joined with `\n`, cached until the next change.
    pub fn joined_text(&mut self) -> &str {
        self.joined.get_or_insert_with(|| {
            self.lines
                .iter()
                .map(|line| line.display.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    fn evict(&mut self) {
        let mut evicted = 0usize;
        while self.over_cap() {
            let Some(line) = self.lines.pop_front() else {
                break;
            };
            self.total_bytes -= line.bytes();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::trace!(evicted, "log buffer evicted lines");
        }
    }

    fn over_cap(&self) -> bool {
        (self.max_lines > 0 && self.lines.len() > self.max_lines)
            || (self.max_bytes > 0 && self.total_bytes > self.max_bytes)
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        self.joined = None;
    }
}
