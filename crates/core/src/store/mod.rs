//! SQLite-backed Cache Store and deferred-task storage.
//!
//! This module provides a persistent store using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Named cache generations holding GET responses keyed by request identity
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - A durable FIFO of deferred tasks

pub mod backend;
pub mod connection;
pub mod entries;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod tasks;

pub use crate::Error;

pub use backend::GenerationStore;
pub use connection::CacheDb;
pub use entries::{CacheEntry, EntryMeta};
pub use generations::Generation;
pub use tasks::{DeferredTask, TaskKind};

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 column value.
pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::CorruptEntry(format!("{column}: {e}")))
}
