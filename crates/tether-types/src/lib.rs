//! Shared data types for tether.
//!
//! Plain serde types consumed by the core pipeline and by renderers.

pub mod block;
pub mod envelope;

pub use block::{ApprovalRequest, BlockStatus, DisplayBlock, Role};
pub use envelope::ProtocolEnvelope;
