//! Stream controllers: one bounded consumer each, plus decoding.

pub mod consumer;
pub mod items;
pub mod lines;
pub mod log;
pub mod protocol;

pub use consumer::{BoundedConsumer, CancelFn, TickOutcome};
pub use items::ItemStreamController;
pub use lines::LineSplitter;
pub use log::LogStreamController;
pub use protocol::ProtocolStreamController;
