#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Backends for the conversation key-value store.
//!
//! - [`MemoryStore`]: process-local, used for tests and throwaway sessions
//! - [`FileStore`]: one directory per conversation, one JSON file per key
//! - [`SqliteStore`]: a single `kv` table in a `SQLite` database

mod file;
mod memory;
mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
