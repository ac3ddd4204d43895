//! Scripted network and fixtures shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use waystation_core::http::http_date;
use waystation_core::{
    AppConfig, CacheDb, CacheEntry, EntryMeta, Error, Generation, GenerationStore, Network, Request, Response,
};

pub(crate) const ORIGIN: &str = "http://localhost:3000";

#[derive(Clone)]
enum Scripted {
    Respond(Response),
    Fail,
}

/// In-process network: per-URL canned answers, an offline switch and a log of
/// every request it saw. Unscripted URLs answer 404.
#[derive(Default)]
pub(crate) struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Scripted>>,
    offline: AtomicBool,
    seen: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn absolute(path: &str) -> String {
        if path.contains("://") { path.to_string() } else { format!("{ORIGIN}{path}") }
    }

    /// Answer `path` with `status` and `body`, stamped with the current date.
    pub(crate) fn respond(&self, path: &str, status: u16, body: &str) {
        let response = Response::new(status, body.to_string()).with_header("date", http_date(Utc::now()));
        self.respond_with(path, response);
    }

    pub(crate) fn respond_with(&self, path: &str, response: Response) {
        self.routes.lock().unwrap().insert(Self::absolute(path), Scripted::Respond(response));
    }

    /// Make `path` fail at the transport level.
    pub(crate) fn fail(&self, path: &str) {
        self.routes.lock().unwrap().insert(Self::absolute(path), Scripted::Fail);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        let url = Self::absolute(path);
        self.seen.lock().unwrap().iter().filter(|r| r.url.as_str() == url).count()
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        self.seen.lock().unwrap().push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".into()));
        }

        let scripted = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail) => Err(Error::Network(format!("connection reset: {}", request.url))),
            None => Ok(Response::new(404, "not found")),
        }
    }
}

/// A real store whose deletes fail for chosen generations or entry keys.
pub(crate) struct FlakyStore {
    inner: CacheDb,
    broken_generations: Mutex<HashSet<String>>,
    broken_entries: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub(crate) fn new(inner: CacheDb) -> Arc<Self> {
        Arc::new(Self { inner, broken_generations: Mutex::default(), broken_entries: Mutex::default() })
    }

    pub(crate) fn fail_generation(&self, name: &str) {
        self.broken_generations.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn fail_entry(&self, key_hash: &str) {
        self.broken_entries.lock().unwrap().insert(key_hash.to_string());
    }
}

#[async_trait]
impl GenerationStore for FlakyStore {
    async fn open_generation(&self, name: &str) -> Result<(), Error> {
        self.inner.open_generation(name).await
    }

    async fn list_generations(&self) -> Result<Vec<Generation>, Error> {
        self.inner.list_generations().await
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        if self.broken_generations.lock().unwrap().contains(name) {
            return Err(Error::CorruptEntry(format!("disk I/O error deleting {name}")));
        }
        self.inner.delete_generation(name).await
    }

    async fn match_entry(&self, generation: &str, request: &Request) -> Result<Option<CacheEntry>, Error> {
        self.inner.match_entry(generation, request).await
    }

    async fn put_entry(&self, generation: &str, request: &Request, response: &Response) -> Result<(), Error> {
        self.inner.put_entry(generation, request, response).await
    }

    async fn put_entries(&self, generation: &str, entries: &[(Request, Response)]) -> Result<usize, Error> {
        self.inner.put_entries(generation, entries).await
    }

    async fn delete_entry(&self, generation: &str, key_hash: &str) -> Result<bool, Error> {
        if self.broken_entries.lock().unwrap().contains(key_hash) {
            return Err(Error::CorruptEntry(format!("disk I/O error deleting {key_hash}")));
        }
        self.inner.delete_entry(generation, key_hash).await
    }

    async fn list_entries(&self, generation: &str) -> Result<Vec<EntryMeta>, Error> {
        self.inner.list_entries(generation).await
    }
}

/// Configuration with a two-entry manifest and short generation names.
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        origin: ORIGIN.to_string(),
        cache_namespace: "test".to_string(),
        cache_version: "v1".to_string(),
        static_manifest: vec!["/".to_string(), "/manifest.json".to_string()],
        ..Default::default()
    }
}

pub(crate) fn get(path: &str) -> Request {
    Request::get(url::Url::parse(&ScriptedNetwork::absolute(path)).unwrap())
}
