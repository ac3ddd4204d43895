//! Generation Manager.
//!
//! Owns the mapping from logical role to the current generation name, the
//! install step that precaches the static manifest, and the activation step
//! that purges superseded generations.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use url::Url;
use waystation_client::resolve;
use waystation_core::{AppConfig, CacheEntry, EntryMeta, Error, GenerationStore, Network, Request, Response};

/// Logical role of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationRole {
    /// Precached manifest assets and fonts.
    Static,
    /// Everything cached at request time.
    Dynamic,
}

/// Typed access to one current generation.
#[derive(Clone)]
pub struct GenerationHandle {
    role: GenerationRole,
    name: String,
    store: Arc<dyn GenerationStore>,
}

impl fmt::Debug for GenerationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationHandle").field("role", &self.role).field("name", &self.name).finish()
    }
}

impl GenerationHandle {
    pub fn role(&self) -> GenerationRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn lookup(&self, request: &Request) -> Result<Option<CacheEntry>, Error> {
        self.store.match_entry(&self.name, request).await
    }

    pub async fn store(&self, request: &Request, response: &Response) -> Result<(), Error> {
        self.store.put_entry(&self.name, request, response).await
    }

    pub async fn remove(&self, key_hash: &str) -> Result<bool, Error> {
        self.store.delete_entry(&self.name, key_hash).await
    }

    pub async fn entries(&self) -> Result<Vec<EntryMeta>, Error> {
        self.store.list_entries(&self.name).await
    }
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub precached: usize,
}

pub struct GenerationManager {
    store: Arc<dyn GenerationStore>,
    network: Arc<dyn Network>,
    origin: Url,
    static_name: String,
    dynamic_name: String,
    manifest: Vec<String>,
}

impl GenerationManager {
    pub fn new(config: &AppConfig, origin: Url, store: Arc<dyn GenerationStore>, network: Arc<dyn Network>) -> Self {
        Self {
            store,
            network,
            origin,
            static_name: config.static_generation(),
            dynamic_name: config.dynamic_generation(),
            manifest: config.static_manifest.clone(),
        }
    }

    /// Handle for the current generation of `role`.
    pub fn get(&self, role: GenerationRole) -> GenerationHandle {
        let name = match role {
            GenerationRole::Static => self.static_name.clone(),
            GenerationRole::Dynamic => self.dynamic_name.clone(),
        };
        GenerationHandle { role, name, store: self.store.clone() }
    }

    /// Names that survive activation.
    pub fn current_names(&self) -> [&str; 2] {
        [&self.static_name, &self.dynamic_name]
    }

    /// Precache the static manifest.
    ///
    /// Every manifest entry is fetched in parallel. The static generation is
    /// written only if every fetch succeeded with a success status, in one
    /// transaction, so a failed install leaves nothing half-populated.
    ///
    /// # Errors
    ///
    /// Returns `Error::InstallFailed` naming the first entry that could not be
    /// fetched.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let mut requests = Vec::with_capacity(self.manifest.len());
        for path in &self.manifest {
            let url = resolve(&self.origin, path).map_err(|e| Error::InstallFailed(format!("{path}: {e}")))?;
            requests.push((path.clone(), Request::get(url)));
        }

        let mut join_set = JoinSet::new();
        for (index, (path, request)) in requests.into_iter().enumerate() {
            let network = self.network.clone();
            join_set.spawn(async move {
                let result = network.fetch(&request).await;
                (index, path, request, result)
            });
        }

        let mut fetched: Vec<Option<(Request, Response)>> = vec![None; self.manifest.len()];
        while let Some(joined) = join_set.join_next().await {
            let (index, path, request, result) = joined.map_err(|e| Error::InstallFailed(e.to_string()))?;
            let response = match result {
                Ok(response) if response.is_success() => response,
                Ok(response) => {
                    join_set.abort_all();
                    return Err(Error::InstallFailed(format!("{path}: status {}", response.status)));
                }
                Err(e) => {
                    join_set.abort_all();
                    return Err(Error::InstallFailed(format!("{path}: {e}")));
                }
            };
            fetched[index] = Some((request, response));
        }

        let entries: Vec<(Request, Response)> = fetched.into_iter().flatten().collect();
        let precached = self.store.put_entries(&self.static_name, &entries).await?;

        tracing::info!(generation = %self.static_name, precached, "static manifest precached");

        Ok(InstallReport { generation: self.static_name.clone(), precached })
    }

    /// Delete every generation that is not current and make sure both current
    /// generations exist.
    ///
    /// A failed deletion is logged and does not stop the others. Returns the
    /// names that were removed.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let existing = self.store.list_generations().await?;
        let current = self.current_names();

        let mut removed = Vec::new();
        for generation in existing {
            if current.contains(&generation.name.as_str()) {
                continue;
            }
            match self.store.delete_generation(&generation.name).await {
                Ok(_) => {
                    tracing::info!(generation = %generation.name, "deleted obsolete generation");
                    removed.push(generation.name);
                }
                Err(e) => tracing::warn!(generation = %generation.name, error = %e, "failed to delete obsolete generation"),
            }
        }

        for name in current {
            self.store.open_generation(name).await?;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyStore, ScriptedNetwork, get, test_config};
    use waystation_core::CacheDb;

    async fn manager(network: Arc<ScriptedNetwork>) -> (GenerationManager, CacheDb) {
        let config = test_config();
        let db = CacheDb::open_in_memory().await.unwrap();
        let origin = config.origin_url().unwrap();
        (GenerationManager::new(&config, origin, Arc::new(db.clone()), network), db)
    }

    #[tokio::test]
    async fn test_handles_are_typed_by_role() {
        let (manager, _db) = manager(ScriptedNetwork::new()).await;
        assert_eq!(manager.get(GenerationRole::Static).name(), "test-static-v1");
        assert_eq!(manager.get(GenerationRole::Dynamic).name(), "test-dynamic-v1");
        assert_eq!(manager.get(GenerationRole::Dynamic).role(), GenerationRole::Dynamic);
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let network = ScriptedNetwork::new();
        network.respond("/", 200, "<html>home</html>");
        network.respond("/manifest.json", 200, "{\"name\":\"store\"}");
        let (manager, _db) = manager(network.clone()).await;

        let report = manager.install().await.unwrap();
        assert_eq!(report.precached, 2);
        assert_eq!(report.generation, "test-static-v1");

        let handle = manager.get(GenerationRole::Static);
        let entry = handle.lookup(&get("/manifest.json")).await.unwrap().unwrap();
        assert_eq!(entry.response.body.as_ref(), b"{\"name\":\"store\"}");
        assert_eq!(network.calls(), 2);
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let network = ScriptedNetwork::new();
        network.respond("/", 200, "home");
        network.fail("/manifest.json");
        let (manager, db) = manager(network).await;

        let result = manager.install().await;
        assert!(matches!(result, Err(Error::InstallFailed(msg)) if msg.contains("/manifest.json")));
        assert!(!db.has_generation("test-static-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let network = ScriptedNetwork::new();
        network.respond("/", 200, "home");
        // "/manifest.json" is unscripted and answers 404
        let (manager, db) = manager(network).await;

        assert!(manager.install().await.is_err());
        assert!(db.list_entries("test-static-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_removes_only_obsolete() {
        let (manager, db) = manager(ScriptedNetwork::new()).await;
        db.put_entry("test-static-v0", &get("/"), &Response::new(200, "old")).await.unwrap();
        db.put_entry("test-dynamic-v0", &get("/api/x"), &Response::new(200, "old")).await.unwrap();
        db.put_entry("test-static-v1", &get("/"), &Response::new(200, "new")).await.unwrap();

        let mut removed = manager.activate().await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["test-dynamic-v0".to_string(), "test-static-v0".to_string()]);

        let mut names: Vec<String> = db.list_generations().await.unwrap().into_iter().map(|g| g.name).collect();
        names.sort();
        assert_eq!(names, vec!["test-dynamic-v1".to_string(), "test-static-v1".to_string()]);
        assert!(manager.get(GenerationRole::Static).lookup(&get("/")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_activate_continues_past_failed_delete() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for old in ["test-static-v0", "test-dynamic-v0", "test-static-beta"] {
            db.put_entry(old, &get("/"), &Response::new(200, "old")).await.unwrap();
        }
        let store = FlakyStore::new(db.clone());
        store.fail_generation("test-dynamic-v0");

        let config = test_config();
        let manager = GenerationManager::new(&config, config.origin_url().unwrap(), store, ScriptedNetwork::new());
        let mut removed = manager.activate().await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["test-static-beta".to_string(), "test-static-v0".to_string()]);

        let mut names: Vec<String> = db.list_generations().await.unwrap().into_iter().map(|g| g.name).collect();
        names.sort();
        assert_eq!(names, vec!["test-dynamic-v0", "test-dynamic-v1", "test-static-v1"]);
    }
}
