//! Worker output capture.
//!
//! Lines read from the worker's stdout and stderr are handed to a
//! caller-supplied handler, which typically appends them to an
//! [`OutputLog`] and fans them out to observers.

pub mod buffer;
pub mod collector;
pub mod output;
pub mod types;

pub use buffer::{OutputLog, DEFAULT_OUTPUT_LOG_CAPACITY};
pub use collector::{spawn_line_reader, LineHandler, LineReaderStats};
pub use output::{FileOutputWriter, OutputWriter};
pub use types::{OutputLine, StreamType};
