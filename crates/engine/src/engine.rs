//! The interception engine.
//!
//! One `Engine` owns the store, the generations, the queue and the
//! dispatcher. Host events map onto methods: install, activate, fetch,
//! message, sync, push and notification click.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use url::Url;
use waystation_client::resolve;
use waystation_core::{AppConfig, CacheDb, Error, Network, Request, Response, TaskKind};

use crate::background::BackgroundTasks;
use crate::classifier::Classifier;
use crate::control::{Command, Reply};
use crate::generations::{GenerationManager, GenerationRole, InstallReport};
use crate::notify::{ClickOutcome, Notification, NotificationDispatcher, NotificationPresenter, WindowClients};
use crate::queue::{DeferredQueue, DrainReport};
use crate::strategy::StrategyExecutor;
use crate::sweeper::{EvictionSweeper, SweepReport, SweeperHandle};

/// Tag of the sync event that drains the deferred queue.
pub const SYNC_TAG: &str = "background-sync";

/// Where the engine is in its install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Parsed,
    Installing,
    /// Installed and waiting to take over.
    Installed,
    Activating,
    /// Handling requests.
    Activated,
}

/// Outcome of a preload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub stored: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Engine {
    config: AppConfig,
    origin: Url,
    db: CacheDb,
    network: Arc<dyn Network>,
    generations: GenerationManager,
    classifier: Classifier,
    executor: StrategyExecutor,
    queue: DeferredQueue,
    notifications: NotificationDispatcher,
    sweeper: Arc<EvictionSweeper>,
    background: BackgroundTasks,
    state: Mutex<Lifecycle>,
    sweeper_job: tokio::sync::Mutex<Option<SweeperHandle>>,
}

impl Engine {
    /// Build an engine from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when the configuration does not validate.
    pub fn new(
        config: AppConfig, db: CacheDb, network: Arc<dyn Network>, presenter: Arc<dyn NotificationPresenter>,
        windows: Arc<dyn WindowClients>,
    ) -> Result<Self, Error> {
        config.validate().map_err(|e| Error::InvalidInput(e.to_string()))?;
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let generations = GenerationManager::new(&config, origin.clone(), Arc::new(db.clone()), network.clone());
        let classifier = Classifier::new(config.static_manifest.iter().cloned(), config.external_allowlist.iter().cloned());
        let background = BackgroundTasks::new();
        let executor = StrategyExecutor::new(network.clone(), background.clone());
        let queue = DeferredQueue::new(&config, origin.clone(), db.clone(), network.clone());
        let notifications = NotificationDispatcher::new(&config, origin.clone(), presenter, windows);
        let sweeper = Arc::new(EvictionSweeper::new(generations.get(GenerationRole::Dynamic), config.max_age()));

        Ok(Self {
            config,
            origin,
            db,
            network,
            generations,
            classifier,
            executor,
            queue,
            notifications,
            sweeper,
            background,
            state: Mutex::new(Lifecycle::Parsed),
            sweeper_job: tokio::sync::Mutex::new(None),
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*state, to = ?next, "lifecycle");
        *state = next;
    }

    /// Whether this engine handles requests.
    pub fn is_controlling(&self) -> bool {
        self.lifecycle() == Lifecycle::Activated
    }

    /// Precache the static manifest. On success the engine waits for
    /// activation, or activates straight away when configured to skip waiting.
    /// A failed install returns the engine to `Parsed`, ready to retry.
    pub async fn on_install(&self) -> Result<InstallReport, Error> {
        self.set_lifecycle(Lifecycle::Installing);

        let report = match self.generations.install().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "install failed");
                self.set_lifecycle(Lifecycle::Parsed);
                return Err(e);
            }
        };

        self.set_lifecycle(Lifecycle::Installed);
        tracing::info!(generation = %report.generation, precached = report.precached, "installed");

        if self.config.skip_waiting_on_install {
            self.on_activate().await?;
        }
        Ok(report)
    }

    /// Purge superseded generations and take over request handling.
    /// Returns the generations that were removed.
    pub async fn on_activate(&self) -> Result<Vec<String>, Error> {
        match self.lifecycle() {
            Lifecycle::Installed => {}
            Lifecycle::Activated => return Ok(Vec::new()),
            other => return Err(Error::InvalidInput(format!("cannot activate while {other:?}"))),
        }

        self.set_lifecycle(Lifecycle::Activating);
        match self.generations.activate().await {
            Ok(removed) => {
                self.set_lifecycle(Lifecycle::Activated);
                tracing::info!(removed = removed.len(), "activated");
                Ok(removed)
            }
            Err(e) => {
                self.set_lifecycle(Lifecycle::Installed);
                Err(e)
            }
        }
    }

    /// Promote a waiting engine. Does nothing in any other state.
    pub async fn skip_waiting(&self) -> Result<(), Error> {
        if self.lifecycle() == Lifecycle::Installed {
            self.on_activate().await?;
        }
        Ok(())
    }

    /// Handle an intercepted request.
    ///
    /// Classified GET requests always produce a response. Non-GET requests,
    /// and all requests before activation, go straight to the network and
    /// report transport failures as `Err`.
    pub async fn on_fetch(&self, request: &Request) -> Result<Response, Error> {
        let route = if self.is_controlling() { self.classifier.classify(request) } else { None };

        let Some(route) = route else {
            return self.network.fetch(request).await;
        };

        tracing::debug!(url = %request.url, kind = ?route.kind, strategy = ?route.strategy, "routed");
        let generation = self.generations.get(route.role);
        Ok(self.executor.execute(route.strategy, request, &generation).await)
    }

    /// Handle a control command; `None` for commands without a reply.
    pub async fn on_message(&self, command: Command) -> Option<Reply> {
        match command {
            Command::SkipWaiting => {
                if let Err(e) = self.skip_waiting().await {
                    tracing::warn!(error = %e, "skip waiting failed");
                }
                None
            }
            Command::GetCacheSize => Some(Reply::Size { size: self.cache_size().await }),
            Command::ClearCache { name } => Some(Reply::Success { success: self.clear_cache(name.as_deref()).await }),
            Command::PreloadRoutes { routes } => {
                self.preload_routes(&routes).await;
                None
            }
        }
    }

    /// Bytes stored across every generation; 0 if the store cannot answer.
    pub async fn cache_size(&self) -> u64 {
        self.db.total_size().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to compute cache size");
            0
        })
    }

    /// Delete one generation, or all of them when `name` is absent or blank.
    /// `false` if a named generation does not exist or any deletion failed.
    pub async fn clear_cache(&self, name: Option<&str>) -> bool {
        let names = match name.filter(|n| !n.trim().is_empty()) {
            Some(name) => vec![name.to_string()],
            None => match self.db.list_generations().await {
                Ok(generations) => generations.into_iter().map(|g| g.name).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to list generations");
                    return false;
                }
            },
        };

        let mut success = true;
        for name in names {
            match self.db.delete_generation(&name).await {
                Ok(true) => tracing::info!(generation = %name, "cleared generation"),
                Ok(false) => success = false,
                Err(e) => {
                    tracing::warn!(generation = %name, error = %e, "failed to clear generation");
                    success = false;
                }
            }
        }
        success
    }

    /// Fetch `routes` concurrently and keep the successful answers in the
    /// dynamic generation. A failing route never stops the others.
    pub async fn preload_routes(&self, routes: &[String]) -> PreloadReport {
        let dynamic = self.generations.get(GenerationRole::Dynamic);
        let mut report = PreloadReport::default();
        let mut join_set = JoinSet::new();

        for route in routes {
            let url = match resolve(&self.origin, route) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(route = %route, error = %e, "cannot preload route");
                    report.failed.push(route.clone());
                    continue;
                }
            };
            let network = self.network.clone();
            let dynamic = dynamic.clone();
            let route = route.clone();
            join_set.spawn(async move {
                let request = Request::get(url);
                let result = match network.fetch(&request).await {
                    Ok(response) if response.is_success() => dynamic.store(&request, &response).await,
                    Ok(response) => Err(Error::Network(format!("status {}", response.status))),
                    Err(e) => Err(e),
                };
                (route, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((route, Ok(()))) => report.stored.push(route),
                Ok((route, Err(e))) => {
                    tracing::warn!(route = %route, error = %e, "preload failed");
                    report.failed.push(route);
                }
                Err(e) => tracing::warn!(error = %e, "preload task panicked"),
            }
        }

        tracing::info!(stored = report.stored.len(), failed = report.failed.len(), "routes preloaded");
        report
    }

    /// Handle a sync event. Only [`SYNC_TAG`] drains the queue.
    pub async fn on_sync(&self, tag: &str) -> Result<Option<DrainReport>, Error> {
        if tag != SYNC_TAG {
            tracing::debug!(tag, "ignoring sync tag");
            return Ok(None);
        }
        self.queue.drain().await.map(Some)
    }

    /// Connectivity came back: drain the queue without waiting for a sync tag.
    pub async fn on_online(&self) -> Result<DrainReport, Error> {
        tracing::info!("back online");
        self.queue.drain().await
    }

    pub async fn enqueue_task(&self, kind: TaskKind, payload: Value, endpoint: Option<&str>) -> Result<i64, Error> {
        self.queue.enqueue(kind, payload, endpoint).await
    }

    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<Option<Notification>, Error> {
        self.notifications.on_push(data).await
    }

    pub async fn on_notification_click(
        &self, notification: &Notification, action: Option<&str>,
    ) -> Result<ClickOutcome, Error> {
        self.notifications.on_click(notification, action).await
    }

    /// Run one eviction sweep now.
    pub async fn sweep_now(&self) -> Result<SweepReport, Error> {
        self.sweeper.sweep().await
    }

    /// Start the periodic sweeper. Calling it again while running does nothing.
    pub async fn start(&self) {
        let mut job = self.sweeper_job.lock().await;
        if job.is_none() {
            *job = Some(self.sweeper.clone().spawn(self.config.sweep_interval()));
            tracing::info!(interval_secs = self.config.sweep_interval_secs, "sweeper started");
        }
    }

    /// Stop the sweeper and cancel background refreshes still in flight.
    /// A cancelled refresh leaves the previous entry in place.
    pub async fn shutdown(&self) {
        if let Some(job) = self.sweeper_job.lock().await.take() {
            job.stop().await;
        }
        self.background.abort_all();
        self.background.wait_idle().await;
        tracing::info!("engine stopped");
    }

    /// Wait for every background refresh started so far.
    pub async fn wait_for_background(&self) {
        self.background.wait_idle().await;
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn queue(&self) -> &DeferredQueue {
        &self.queue
    }

    pub fn generations(&self) -> &GenerationManager {
        &self.generations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{InMemoryWindows, LogPresenter};
    use crate::testing::{ScriptedNetwork, get, test_config};
    use serde_json::json;
    use waystation_core::Method;
    use waystation_core::http::http_date;

    struct Harness {
        engine: Engine,
        network: Arc<ScriptedNetwork>,
        windows: Arc<InMemoryWindows>,
        db: CacheDb,
    }

    async fn harness_with(config: AppConfig) -> Harness {
        let network = ScriptedNetwork::new();
        network.respond("/", 200, "<html>store</html>");
        network.respond("/manifest.json", 200, r#"{"name":"store"}"#);
        let db = CacheDb::open_in_memory().await.unwrap();
        let windows = Arc::new(InMemoryWindows::new());
        let engine = Engine::new(config, db.clone(), network.clone(), Arc::new(LogPresenter), windows.clone()).unwrap();
        Harness { engine, network, windows, db }
    }

    async fn harness() -> Harness {
        harness_with(test_config()).await
    }

    async fn installed() -> Harness {
        let h = harness().await;
        h.engine.on_install().await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_install_activates_when_skipping_waiting() {
        let h = installed().await;
        assert_eq!(h.engine.lifecycle(), Lifecycle::Activated);
        assert!(h.engine.is_controlling());
    }

    #[tokio::test]
    async fn test_install_waits_without_skip_waiting() {
        let h = harness_with(AppConfig { skip_waiting_on_install: false, ..test_config() }).await;
        h.engine.on_install().await.unwrap();
        assert_eq!(h.engine.lifecycle(), Lifecycle::Installed);
        assert!(!h.engine.is_controlling());

        assert_eq!(h.engine.on_message(Command::SkipWaiting).await, None);
        assert!(h.engine.is_controlling());
    }

    #[tokio::test]
    async fn test_failed_install_can_retry() {
        let h = harness().await;
        h.network.fail("/manifest.json");
        assert!(matches!(h.engine.on_install().await, Err(Error::InstallFailed(_))));
        assert_eq!(h.engine.lifecycle(), Lifecycle::Parsed);

        h.network.respond("/manifest.json", 200, "{}");
        h.engine.on_install().await.unwrap();
        assert!(h.engine.is_controlling());
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let h = harness().await;
        assert!(h.engine.on_activate().await.is_err());
    }

    #[tokio::test]
    async fn test_scenario_a_precached_root_served_offline() {
        let h = installed().await;
        h.network.set_offline(true);

        let response = h.engine.on_fetch(&get("/")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_ref(), b"<html>store</html>");

        h.engine.wait_for_background().await;
        let entry = h.engine.generations().get(GenerationRole::Static).lookup(&get("/")).await.unwrap();
        assert_eq!(entry.unwrap().response.body.as_ref(), b"<html>store</html>");
    }

    #[tokio::test]
    async fn test_scenario_b_api_falls_back_to_stored_json() {
        let h = installed().await;
        h.network.respond("/api/cart", 200, r#"{"items":[{"id":1}]}"#);

        let live = h.engine.on_fetch(&get("/api/cart")).await.unwrap();
        assert_eq!(live.status, 200);

        h.network.fail("/api/cart");
        let fallback = h.engine.on_fetch(&get("/api/cart")).await.unwrap();
        assert_eq!(fallback.status, 200);
        let body: Value = fallback.json().unwrap();
        assert_eq!(body, json!({"items": [{"id": 1}]}));
    }

    #[tokio::test]
    async fn test_scenario_c_preload_is_best_effort() {
        let h = installed().await;
        h.network.fail("/a");
        h.network.respond("/b", 200, "b");

        let reply = h.engine.on_message(Command::PreloadRoutes { routes: vec!["/a".into(), "/b".into()] }).await;
        assert_eq!(reply, None);

        let dynamic = h.engine.generations().get(GenerationRole::Dynamic);
        assert!(dynamic.lookup(&get("/b")).await.unwrap().is_some());
        assert!(dynamic.lookup(&get("/a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preload_report_lists_outcomes() {
        let h = installed().await;
        h.network.fail("/a");
        h.network.respond("/b", 200, "b");

        let report = h.engine.preload_routes(&["/a".into(), "/b".into(), "/missing".into()]).await;
        assert_eq!(report.stored, vec!["/b".to_string()]);
        let mut failed = report.failed.clone();
        failed.sort();
        assert_eq!(failed, vec!["/a".to_string(), "/missing".to_string()]);
    }

    #[tokio::test]
    async fn test_scenario_d_push_then_click_opens_or_focuses() {
        let h = installed().await;
        let notification = h
            .engine
            .on_push(Some(br#"{"title":"T","body":"B","url":"/orders"}"#))
            .await
            .unwrap()
            .unwrap();

        let first = h.engine.on_notification_click(&notification, Some("open")).await.unwrap();
        let ClickOutcome::Opened(window) = first else {
            panic!("expected a new window, got {first:?}");
        };
        assert_eq!(window.url.path(), "/orders");

        let second = h.engine.on_notification_click(&notification, Some("open")).await.unwrap();
        assert_eq!(second, ClickOutcome::Focused(window));
        assert_eq!(h.windows.len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_anywhere_is_503_json() {
        let h = installed().await;
        h.network.set_offline(true);

        for path in ["/api/products", "/items/unknown.png", "/about"] {
            let response = h.engine.on_fetch(&get(path)).await.unwrap();
            assert_eq!(response.status, 503, "{path}");
            assert_eq!(response.header("content-type"), Some("application/json"));
            let body: Value = response.json().unwrap();
            assert!(body.get("error").is_some());
        }
    }

    #[tokio::test]
    async fn test_non_get_bypasses_store() {
        let h = installed().await;
        h.network.respond("/api/order", 201, "{}");
        let mut request = get("/api/order");
        request.method = Method::Post;

        let response = h.engine.on_fetch(&request).await.unwrap();
        assert_eq!(response.status, 201);
        assert!(h.engine.generations().get(GenerationRole::Dynamic).lookup(&get("/api/order")).await.unwrap().is_none());

        h.network.set_offline(true);
        assert!(h.engine.on_fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_not_controlling_passes_through() {
        let h = harness().await;
        h.network.respond("/api/products", 200, "[]");
        h.engine.on_fetch(&get("/api/products")).await.unwrap();
        assert_eq!(h.engine.cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_clear_all_then_size_is_zero() {
        let h = installed().await;
        h.network.respond("/api/products", 200, "[1,2,3]");
        h.engine.on_fetch(&get("/api/products")).await.unwrap();
        assert!(h.engine.cache_size().await > 0);

        let reply = h.engine.on_message(Command::ClearCache { name: None }).await;
        assert_eq!(reply, Some(Reply::Success { success: true }));
        assert_eq!(h.engine.on_message(Command::GetCacheSize).await, Some(Reply::Size { size: 0 }));

        let again = h.engine.on_message(Command::ClearCache { name: None }).await;
        assert_eq!(again, Some(Reply::Success { success: true }));
    }

    #[tokio::test]
    async fn test_blank_cache_name_clears_everything() {
        let h = installed().await;
        assert!(h.engine.clear_cache(Some("")).await);
        assert!(h.db.list_generations().await.unwrap().is_empty());

        h.engine.on_install().await.ok();
        let reply = h.engine.on_message(Command::ClearCache { name: Some("  ".into()) }).await;
        assert_eq!(reply, Some(Reply::Success { success: true }));
        assert_eq!(h.engine.cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_fragment_shares_cache_entry() {
        let h = installed().await;
        h.network.respond("/api/cart#top", 200, r#"{"n":1}"#);
        assert_eq!(h.engine.on_fetch(&get("/api/cart#top")).await.unwrap().status, 200);

        h.network.set_offline(true);
        let response = h.engine.on_fetch(&get("/api/cart")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_ref(), br#"{"n":1}"#);
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let h = installed().await;
        h.network.set_offline(true);
        h.engine.enqueue_task(TaskKind::FlushAnalytics, json!([{"event": "view"}]), None).await.unwrap();

        let offline = h.engine.on_online().await.unwrap();
        assert_eq!((offline.completed, offline.remaining), (0, 1));

        h.network.set_offline(false);
        h.network.respond("/api/analytics", 200, "{}");
        let report = h.engine.on_online().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn test_clear_named_generation() {
        let h = installed().await;
        assert!(h.engine.clear_cache(Some("test-static-v1")).await);
        assert!(!h.engine.clear_cache(Some("test-static-v1")).await);
        assert!(h.db.has_generation("test-dynamic-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_activation_preserves_current_generations() {
        let h = harness().await;
        h.db.put_entry("test-dynamic-v0", &get("/old"), &Response::new(200, "old")).await.unwrap();
        h.db.put_entry("test-dynamic-v1", &get("/keep"), &Response::new(200, "keep")).await.unwrap();

        h.engine.on_install().await.unwrap();

        let mut names: Vec<String> = h.db.list_generations().await.unwrap().into_iter().map(|g| g.name).collect();
        names.sort();
        assert_eq!(names, vec!["test-dynamic-v1".to_string(), "test-static-v1".to_string()]);
        let dynamic = h.engine.generations().get(GenerationRole::Dynamic);
        assert!(dynamic.lookup(&get("/keep")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_evicts_stale_dynamic_entries() {
        let h = installed().await;
        let stale = Response::new(200, "stale").with_header("date", http_date(chrono::Utc::now() - chrono::Duration::days(2)));
        let dynamic = h.engine.generations().get(GenerationRole::Dynamic);
        dynamic.store(&get("/stale"), &stale).await.unwrap();
        h.network.respond("/fresh", 200, "fresh");
        h.engine.on_fetch(&get("/fresh")).await.unwrap();

        let report = h.engine.sweep_now().await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(dynamic.lookup(&get("/stale")).await.unwrap().is_none());
        assert!(dynamic.lookup(&get("/fresh")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sync_tag_drains_queue() {
        let h = installed().await;
        h.network.respond("/api/cart/sync", 200, "{}");
        h.engine.enqueue_task(TaskKind::SyncCart, json!({"items": []}), None).await.unwrap();

        assert_eq!(h.engine.on_sync("other-tag").await.unwrap(), None);
        assert_eq!(h.engine.queue().pending().await.unwrap(), 1);

        let report = h.engine.on_sync(SYNC_TAG).await.unwrap().unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(h.engine.queue().pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let h = installed().await;
        h.engine.start().await;
        h.engine.start().await;
        h.engine.shutdown().await;
    }
}
