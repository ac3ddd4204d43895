//! The generation-level view of the store that the engine works through.

use async_trait::async_trait;

use super::connection::CacheDb;
use super::entries::{CacheEntry, EntryMeta};
use super::generations::Generation;
use crate::Error;
use crate::http::{Request, Response};

/// Generations and the entries inside them.
///
/// `CacheDb` is the implementation; the engine holds it as
/// `Arc<dyn GenerationStore>` so callers can wrap it.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn open_generation(&self, name: &str) -> Result<(), Error>;

    async fn list_generations(&self) -> Result<Vec<Generation>, Error>;

    /// Returns false if no such generation existed.
    async fn delete_generation(&self, name: &str) -> Result<bool, Error>;

    async fn match_entry(&self, generation: &str, request: &Request) -> Result<Option<CacheEntry>, Error>;

    async fn put_entry(&self, generation: &str, request: &Request, response: &Response) -> Result<(), Error>;

    /// All or nothing.
    async fn put_entries(&self, generation: &str, entries: &[(Request, Response)]) -> Result<usize, Error>;

    async fn delete_entry(&self, generation: &str, key_hash: &str) -> Result<bool, Error>;

    async fn list_entries(&self, generation: &str) -> Result<Vec<EntryMeta>, Error>;
}

#[async_trait]
impl GenerationStore for CacheDb {
    async fn open_generation(&self, name: &str) -> Result<(), Error> {
        CacheDb::open_generation(self, name).await
    }

    async fn list_generations(&self) -> Result<Vec<Generation>, Error> {
        CacheDb::list_generations(self).await
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        CacheDb::delete_generation(self, name).await
    }

    async fn match_entry(&self, generation: &str, request: &Request) -> Result<Option<CacheEntry>, Error> {
        CacheDb::match_entry(self, generation, request).await
    }

    async fn put_entry(&self, generation: &str, request: &Request, response: &Response) -> Result<(), Error> {
        CacheDb::put_entry(self, generation, request, response).await
    }

    async fn put_entries(&self, generation: &str, entries: &[(Request, Response)]) -> Result<usize, Error> {
        CacheDb::put_entries(self, generation, entries).await
    }

    async fn delete_entry(&self, generation: &str, key_hash: &str) -> Result<bool, Error> {
        CacheDb::delete_entry(self, generation, key_hash).await
    }

    async fn list_entries(&self, generation: &str) -> Result<Vec<EntryMeta>, Error> {
        CacheDb::list_entries(self, generation).await
    }
}
