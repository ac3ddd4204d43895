//! Cache generation bookkeeping.
//!
//! A generation is a named partition of the store ("waystation-static-v1").
//! Deleting a generation removes every entry in it.

use chrono::{DateTime, Utc};
use tokio_rusqlite::params;

use super::connection::CacheDb;
use super::entries::PendingEntry;
use super::parse_timestamp;
use crate::Error;
use crate::http::{Request, Response};

/// A named, versioned partition of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl CacheDb {
    /// Create the generation if it does not exist yet.
    pub async fn open_generation(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    pub async fn has_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Every generation in the store, oldest first.
    pub async fn list_generations(&self) -> Result<Vec<Generation>, Error> {
        let rows = self
            .conn
            .call(|conn| -> Result<Vec<(String, String)>, Error> {
                let mut stmt = conn.prepare("SELECT name, created_at FROM generations ORDER BY created_at, name")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(name, created_at)| Ok(Generation { name, created_at: parse_timestamp("created_at", &created_at)? }))
            .collect()
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns false if no such generation existed.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM entries WHERE generation = ?1", params![&name])?;
                let removed = tx.execute("DELETE FROM generations WHERE name = ?1", params![&name])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Write a batch of entries into a generation in one transaction.
    ///
    /// Either every entry lands or none does.
    pub async fn put_entries(&self, generation: &str, entries: &[(Request, Response)]) -> Result<usize, Error> {
        let pending = entries
            .iter()
            .map(|(request, response)| PendingEntry::new(request, response))
            .collect::<Result<Vec<_>, _>>()?;
        let generation = generation.to_string();
        let stored_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![&generation, &stored_at],
                )?;
                for entry in &pending {
                    entry.insert(&tx, &generation, &stored_at)?;
                }
                tx.commit()?;
                Ok(pending.len())
            })
            .await
            .map_err(Error::from)
    }
}
