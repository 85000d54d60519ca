//! Log/debug stream: raw text chunks into a [`RetentionBuffer`].

use tokio::sync::mpsc;

use super::consumer::{BoundedConsumer, CancelFn, TickOutcome};
use crate::retention::RetentionBuffer;

/// Feeds text chunks to a retention buffer.
///
/// The buffer holds the unterminated tail between ticks. When the producer
/// finishes, that tail is flushed as a final line and the content stays
/// visible. An explicit [`detach`](Self::detach) discards it instead.
#[derive(Debug, Default)]
pub struct LogStreamController {
    consumer: BoundedConsumer<String>,
}

impl LogStreamController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new subscription. Output from a previous one is discarded.
    pub fn attach(
        &mut self,
        rx: mpsc::Receiver<String>,
        cancel: Option<CancelFn>,
        buffer: &mut RetentionBuffer,
    ) {
        if self.consumer.is_attached() {
            buffer.reset();
        }
        self.consumer.attach(rx, cancel);
    }

    /// Cancels the producer and resets the buffer (generation bump, clear).
    pub fn detach(&mut self, buffer: &mut RetentionBuffer) {
        self.consumer.cancel();
        buffer.reset();
    }

    pub fn is_attached(&self) -> bool {
        self.consumer.is_attached()
    }

    pub fn consume_tick(&mut self, max_per_tick: usize, buffer: &mut RetentionBuffer) -> TickOutcome {
        let outcome = self
            .consumer
            .consume_tick(max_per_tick, |chunk| buffer.append_text(&chunk));
        if outcome.closed {
            buffer.flush_partial();
        }
        outcome
    }
}
