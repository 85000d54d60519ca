//! Transcript state: classification, reasoning aggregation, merge engine.

pub mod classify;
pub mod engine;
pub mod reasoning;

pub use classify::{Classified, InboundEvent, classify};
pub use engine::{DEFAULT_MAX_BLOCKS, MessageMeta, TranscriptState};
pub use reasoning::{ReasoningAccumulator, ReasoningUpdate};
