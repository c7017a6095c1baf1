//! Task lifecycle log: records, the repository interface and its
//! in-memory and JSON-lines implementations.

pub mod jsonl;
pub mod record;
pub mod repository;

pub use jsonl::JsonLinesRepository;
pub use record::{Action, LogRecord};
pub use repository::{LogFilter, LogQuery, LogRepository, Match, MemoryRepository};
