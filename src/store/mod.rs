//! Persistence layer: libSQL-backed storage for sessions, participants,
//! transcripts, profiles and groups.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, ExportSnapshot, UpsertOutcome};
