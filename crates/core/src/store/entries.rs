//! Cache entry operations.
//!
//! Entries are immutable once written: a refresh replaces the whole row in a
//! single statement, so a concurrent reader sees either the old response or
//! the new one, never a mix. Only GET requests are ever stored.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use super::parse_timestamp;
use crate::Error;
use crate::http::{Method, Request, Response};

/// A stored response together with its identity and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key_hash: String,
    pub method: Method,
    pub url: String,
    pub response: Response,
    /// When the origin produced the response (its `Date` header).
    pub captured_at: Option<DateTime<Utc>>,
    /// When the entry was written locally.
    pub stored_at: DateTime<Utc>,
}

/// Entry metadata without the body, for sweeps and listings.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMeta {
    pub key_hash: String,
    pub url: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub size: u64,
}

struct EntryRow {
    key_hash: String,
    method: String,
    url: String,
    status: i64,
    headers_json: String,
    body: Vec<u8>,
    captured_at: Option<String>,
    stored_at: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<CacheEntry, Error> {
        let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers_json)
            .map_err(|e| Error::CorruptEntry(format!("headers_json: {e}")))?;
        let status = u16::try_from(self.status).map_err(|e| Error::CorruptEntry(format!("status: {e}")))?;
        let captured_at = self
            .captured_at
            .as_deref()
            .map(|v| parse_timestamp("captured_at", v))
            .transpose()?;

        Ok(CacheEntry {
            key_hash: self.key_hash,
            method: self.method.parse()?,
            url: self.url,
            response: Response { status, headers, body: Bytes::from(self.body) },
            captured_at,
            stored_at: parse_timestamp("stored_at", &self.stored_at)?,
        })
    }
}

/// Store identity of a request: its key and its URL without the fragment.
/// Fragments never reach the origin, so `/a#top` and `/a` share one entry.
fn identity(request: &Request) -> (String, String) {
    let mut url = request.url.clone();
    url.set_fragment(None);
    let url = url.to_string();
    (compute_cache_key(request.method.as_str(), &url), url)
}

/// Row values for one write, prepared outside the connection thread.
pub(crate) struct PendingEntry {
    key_hash: String,
    method: String,
    url: String,
    status: i64,
    headers_json: String,
    body: Vec<u8>,
    captured_at: Option<String>,
}

impl PendingEntry {
    pub(crate) fn new(request: &Request, response: &Response) -> Result<Self, Error> {
        if !request.method.is_get() {
            return Err(Error::InvalidInput(format!("refusing to cache {} {}", request.method, request.url)));
        }

        let (key_hash, url) = identity(request);
        Ok(Self {
            key_hash,
            method: request.method.as_str().to_string(),
            url,
            status: i64::from(response.status),
            headers_json: serde_json::to_string(&response.headers)?,
            body: response.body.to_vec(),
            captured_at: response.date().map(|d| d.to_rfc3339()),
        })
    }

    pub(crate) fn insert(&self, conn: &rusqlite::Connection, generation: &str, stored_at: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
            params![generation, stored_at],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (
                generation, key_hash, method, url, status, headers_json, body, captured_at, stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                generation,
                &self.key_hash,
                &self.method,
                &self.url,
                self.status,
                &self.headers_json,
                &self.body,
                &self.captured_at,
                stored_at,
            ],
        )?;
        Ok(())
    }
}

impl CacheDb {
    /// Store `response` as the answer to `request` in `generation`.
    ///
    /// Opens the generation if it does not exist yet. Replaces any previous
    /// entry for the same identity.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for non-GET requests.
    pub async fn put_entry(&self, generation: &str, request: &Request, response: &Response) -> Result<(), Error> {
        let pending = PendingEntry::new(request, response)?;
        let generation = generation.to_string();
        let stored_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                pending.insert(&tx, &generation, &stored_at)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up the entry stored for `request` in `generation`.
    ///
    /// Non-GET requests never match.
    pub async fn match_entry(&self, generation: &str, request: &Request) -> Result<Option<CacheEntry>, Error> {
        if !request.method.is_get() {
            return Ok(None);
        }

        let generation = generation.to_string();
        let (key_hash, _) = identity(request);

        let row = self
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key_hash, method, url, status, headers_json, body, captured_at, stored_at
                     FROM entries WHERE generation = ?1 AND key_hash = ?2",
                )?;

                let result = stmt.query_row(params![generation, key_hash], |row| {
                    Ok(EntryRow {
                        key_hash: row.get(0)?,
                        method: row.get(1)?,
                        url: row.get(2)?,
                        status: row.get(3)?,
                        headers_json: row.get(4)?,
                        body: row.get(5)?,
                        captured_at: row.get(6)?,
                        stored_at: row.get(7)?,
                    })
                });

                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(EntryRow::into_entry).transpose()
    }

    /// Delete one entry by key. Returns whether anything was removed.
    pub async fn delete_entry(&self, generation: &str, key_hash: &str) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE generation = ?1 AND key_hash = ?2",
                    params![generation, key_hash],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// List entry metadata for a generation, oldest capture first.
    pub async fn list_entries(&self, generation: &str) -> Result<Vec<EntryMeta>, Error> {
        let generation = generation.to_string();
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<(String, String, Option<String>, i64)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key_hash, url, captured_at, length(body)
                     FROM entries WHERE generation = ?1
                     ORDER BY captured_at ASC, url ASC",
                )?;
                let rows = stmt
                    .query_map(params![generation], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(key_hash, url, captured_at, size)| {
                Ok(EntryMeta {
                    key_hash,
                    url,
                    captured_at: captured_at
                        .as_deref()
                        .map(|v| parse_timestamp("captured_at", v))
                        .transpose()?,
                    size: u64::try_from(size).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Sum of stored body sizes across every generation, in bytes.
    pub async fn total_size(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(length(body)), 0) FROM entries", [], |row| row.get(0))?;
                Ok(u64::try_from(total).unwrap_or_default())
            })
            .await
            .map_err(Error::from)
    }
}
