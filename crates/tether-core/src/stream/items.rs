//! Generic item stream: records that arrive already decoded.

use serde_json::Value;
use tokio::sync::mpsc;

use super::consumer::{BoundedConsumer, CancelFn, TickOutcome};
use crate::transcript::TranscriptState;

/// Forwards each decoded item to [`TranscriptState::append_generic_item`].
#[derive(Debug, Default)]
pub struct ItemStreamController {
    consumer: BoundedConsumer<Value>,
}

impl ItemStreamController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, rx: mpsc::Receiver<Value>, cancel: Option<CancelFn>) {
        self.consumer.attach(rx, cancel);
    }

    pub fn detach(&mut self) {
        self.consumer.cancel();
    }

    pub fn is_attached(&self) -> bool {
        self.consumer.is_attached()
    }

    pub fn consume_tick(
        &mut self,
        max_per_tick: usize,
        transcript: &mut TranscriptState,
    ) -> TickOutcome {
        self.consumer.consume_tick(max_per_tick, |item| {
            transcript.append_generic_item(&item);
        })
    }
}
