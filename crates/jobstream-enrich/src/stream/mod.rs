//! Summary stream: partition logs and the checkpointed reader

pub mod reader;
pub mod source;

pub use reader::{ReaderOptions, StreamEvent, StreamReader};
pub use source::{read_summaries_file, JsonlPartitionLog, LogEntry, MemoryLog, SummarySource};
