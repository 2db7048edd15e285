//! attend-store — Storage backends for the attendance core.
//!
//! SQLite ledger and employee directory via `tokio-rusqlite`, and a
//! filesystem evidence sink.

pub mod evidence;
pub mod schema;
pub mod sqlite;

pub use evidence::FsEvidenceSink;
pub use sqlite::SqliteStore;
