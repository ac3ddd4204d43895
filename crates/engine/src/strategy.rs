//! Strategy Executor.
//!
//! Both strategies are terminal: they always produce a response. When neither
//! the network nor the store can answer, the caller gets the synthetic 503.
//! Store failures are logged and treated as misses.

use std::sync::Arc;

use waystation_core::{Network, Request, Response};

use crate::background::BackgroundTasks;
use crate::classifier::Strategy;
use crate::generations::GenerationHandle;

pub struct StrategyExecutor {
    network: Arc<dyn Network>,
    background: BackgroundTasks,
}

impl StrategyExecutor {
    pub fn new(network: Arc<dyn Network>, background: BackgroundTasks) -> Self {
        Self { network, background }
    }

    pub async fn execute(&self, strategy: Strategy, request: &Request, generation: &GenerationHandle) -> Response {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, generation).await,
            Strategy::NetworkFirst => self.network_first(request, generation).await,
        }
    }

    /// Serve from the store when possible and refresh the entry in the
    /// background; otherwise go to the network and keep a copy.
    pub async fn cache_first(&self, request: &Request, generation: &GenerationHandle) -> Response {
        match generation.lookup(request).await {
            Ok(Some(entry)) => {
                tracing::debug!(url = %request.url, generation = generation.name(), "cache hit");
                self.spawn_refresh(request.clone(), generation.clone());
                return entry.response;
            }
            Ok(None) => tracing::debug!(url = %request.url, generation = generation.name(), "cache miss"),
            Err(e) => tracing::warn!(url = %request.url, error = %e, "cache lookup failed; treating as miss"),
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    store(generation, request, &response).await;
                }
                response
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "cache-first: network failed on miss");
                Response::offline()
            }
        }
    }

    /// Prefer a live answer; fall back to the stored one only when the
    /// network call itself fails. HTTP error statuses are returned as-is.
    pub async fn network_first(&self, request: &Request, generation: &GenerationHandle) -> Response {
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    store(generation, request, &response).await;
                }
                return response;
            }
            Err(e) => e,
        };

        tracing::debug!(url = %request.url, error = %error, "network failed, trying cache");

        match generation.lookup(request).await {
            Ok(Some(entry)) => entry.response,
            Ok(None) => Response::offline(),
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "cache fallback failed");
                Response::offline()
            }
        }
    }

    fn spawn_refresh(&self, request: Request, generation: GenerationHandle) {
        let network = self.network.clone();
        self.background.spawn(async move {
            match network.fetch(&request).await {
                Ok(response) if response.is_success() => match generation.store(&request, &response).await {
                    Ok(()) => tracing::debug!(url = %request.url, "background refresh stored"),
                    Err(e) => tracing::warn!(url = %request.url, error = %e, "background refresh could not store"),
                },
                Ok(response) => {
                    tracing::debug!(url = %request.url, status = response.status, "background refresh kept cached entry")
                }
                Err(e) => tracing::warn!(url = %request.url, error = %e, "background fetch failed"),
            }
        });
    }
}

async fn store(generation: &GenerationHandle, request: &Request, response: &Response) {
    if let Err(e) = generation.store(request, response).await {
        tracing::warn!(url = %request.url, generation = generation.name(), error = %e, "failed to store response");
    }
}
