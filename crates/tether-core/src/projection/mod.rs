//! Async projection: sequence tracking, coordinator, built-in projectors.

pub mod coordinator;
pub mod projectors;
pub mod tracker;

pub use coordinator::{ProjectionCoordinator, ProjectionResult, Projector};
pub use projectors::{
    BlockRenderer, DebugPanelInput, DebugPanelProjector, PlainRenderer, TranscriptProjector,
};
pub use tracker::SequenceTracker;
