//! Log/debug retention: capped buffer plus background formatter.

pub mod buffer;
pub mod formatter;

pub use buffer::{LogLine, RetentionBuffer};
pub use formatter::{FormatRequest, FormatResult, FormatterHandle, format_line};
