//! Core tether library (stream ingestion, transcript merge, async projection).

pub mod config;
pub mod logging;
pub mod projection;
pub mod retention;
pub mod session;
pub mod stream;
pub mod transcript;

pub use session::{LiveSession, TickReport};
