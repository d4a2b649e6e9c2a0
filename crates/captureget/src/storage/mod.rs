//! Storage backends implementing [`PipelineStore`](crate::pipeline::PipelineStore).
//!
//! `MemoryStore` keeps everything behind one process-local lock; `SqliteStore` persists to a
//! SQLite file and runs multi-record operations inside transactions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
