//! Built-in projectors: transcript viewport and debug panel.

use tether_types::{BlockStatus, DisplayBlock, Role};

use super::coordinator::Projector;

/// Turns one block into display lines.
///
/// Styling (markdown, colours) lives behind this seam.
pub trait BlockRenderer: Send + Sync + 'static {
    fn render(&self, block: &DisplayBlock, out: &mut Vec<String>);
}

/// Unstyled renderer: `label: text`, continuation lines indented under the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl BlockRenderer for PlainRenderer {
    fn render(&self, block: &DisplayBlock, out: &mut Vec<String>) {
        let header = match block.status {
            BlockStatus::None => block.role.label().to_string(),
            BlockStatus::Sending => format!("{}…", block.role.label()),
            BlockStatus::Failed => format!("{} (failed)", block.role.label()),
        };

        if block.role == Role::Reasoning && block.collapsed {
            let mut lines = block.text.lines().filter(|line| !line.trim().is_empty());
            let first = lines.next().unwrap_or_default();
            let more = lines.count();
            if more == 0 {
                out.push(format!("{header}: {first}"));
            } else {
                out.push(format!("{header}: {first} (+{more} more)"));
            }
            return;
        }

        let indent = " ".repeat(header.chars().count() + 2);
        let mut lines = block.text.lines();
        match lines.next() {
            Some(first) => out.push(format!("{header}: {first}")),
            None => out.push(format!("{header}:")),
        }
        out.extend(lines.map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        }));
    }
}

/// Transcript blocks to viewport lines, one blank line between blocks.
#[derive(Debug, Clone, Default)]
pub struct TranscriptProjector<R = PlainRenderer> {
    renderer: R,
}

impl<R: BlockRenderer> TranscriptProjector<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }
}

impl<R: BlockRenderer> Projector for TranscriptProjector<R> {
    type Input = Vec<DisplayBlock>;
    type Output = Vec<String>;

    fn project(&self, blocks: Vec<DisplayBlock>) -> Vec<String> {
        let mut out = Vec::new();
        for (index, block) in blocks.iter().enumerate() {
            if index > 0 {
                out.push(String::new());
            }
            self.renderer.render(block, &mut out);
        }
        out
    }
}

/// Snapshot handed to [`DebugPanelProjector`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugPanelInput {
    pub lines: Vec<String>,
    pub expanded: bool,
}

/// Log lines to panel lines; collapsed panels show only the tail.
#[derive(Debug, Clone)]
pub struct DebugPanelProjector {
    collapsed_lines: usize,
}

impl DebugPanelProjector {
    pub fn new(collapsed_lines: usize) -> Self {
        Self { collapsed_lines }
    }
}

impl Projector for DebugPanelProjector {
    type Input = DebugPanelInput;
    type Output = Vec<String>;

    fn project(&self, input: DebugPanelInput) -> Vec<String> {
        // Formatted entries can span several lines.
        let lines: Vec<String> = input
            .lines
            .iter()
            .flat_map(|entry| entry.split('\n'))
            .map(str::to_string)
            .collect();

        if input.expanded || lines.len() <= self.collapsed_lines {
            return lines;
        }

        let hidden = lines.len() - self.collapsed_lines;
        let mut out = Vec::with_capacity(self.collapsed_lines + 1);
        out.push(format!("… {hidden} earlier lines"));
        out.extend(lines.into_iter().skip(hidden));
        out
    }
}
