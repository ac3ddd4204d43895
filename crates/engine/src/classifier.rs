//! Request Classifier.
//!
//! Maps a GET request to a route: the caching strategy to run and the
//! generation it reads and writes. Rules are checked in a fixed order and the
//! first match wins; the last rule always matches.

use std::collections::HashSet;

use waystation_core::{Destination, Request};

use crate::generations::GenerationRole;

/// Caching algorithm a route runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
}

/// Which rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    StaticAsset,
    Api,
    Image,
    Font,
    External,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub kind: RouteKind,
    pub strategy: Strategy,
    pub role: GenerationRole,
}

impl Route {
    const fn new(kind: RouteKind, strategy: Strategy, role: GenerationRole) -> Self {
        Self { kind, strategy, role }
    }
}

const API_PREFIX: &str = "/api/";

#[derive(Debug, Clone)]
pub struct Classifier {
    manifest: HashSet<String>,
    allowlist: Vec<String>,
}

impl Classifier {
    /// `manifest` holds exact paths; `allowlist` holds absolute URL prefixes
    /// or, for entries starting with `/`, path prefixes.
    pub fn new<M, A>(manifest: M, allowlist: A) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            manifest: manifest.into_iter().map(Into::into).collect(),
            allowlist: allowlist.into_iter().map(Into::into).collect(),
        }
    }

    /// Route for `request`, or `None` for non-GET requests, which bypass the
    /// engine entirely.
    pub fn classify(&self, request: &Request) -> Option<Route> {
        if !request.method.is_get() {
            return None;
        }

        let path = request.url.path();

        let route = if self.manifest.contains(path) {
            Route::new(RouteKind::StaticAsset, Strategy::CacheFirst, GenerationRole::Static)
        } else if path.starts_with(API_PREFIX) {
            Route::new(RouteKind::Api, Strategy::NetworkFirst, GenerationRole::Dynamic)
        } else if request.destination == Destination::Image {
            Route::new(RouteKind::Image, Strategy::CacheFirst, GenerationRole::Dynamic)
        } else if request.destination == Destination::Font {
            Route::new(RouteKind::Font, Strategy::CacheFirst, GenerationRole::Static)
        } else if self.is_allowlisted(request) {
            Route::new(RouteKind::External, Strategy::NetworkFirst, GenerationRole::Dynamic)
        } else {
            Route::new(RouteKind::Default, Strategy::NetworkFirst, GenerationRole::Dynamic)
        };

        Some(route)
    }

    fn is_allowlisted(&self, request: &Request) -> bool {
        let url = request.url.as_str();
        let path = request.url.path();
        self.allowlist.iter().any(|prefix| {
            if prefix.starts_with('/') { path.starts_with(prefix.as_str()) } else { url.starts_with(prefix.as_str()) }
        })
    }
}
