//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WAYSTATION_*)
//! 2. TOML config file (if WAYSTATION_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WAYSTATION_*)
/// 2. TOML config file (if WAYSTATION_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite file holding cache generations and deferred tasks.
    ///
    /// Set via WAYSTATION_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin the engine serves; relative paths resolve against it.
    ///
    /// Set via WAYSTATION_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// User-Agent string for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Network request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest response body accepted from the network.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Prefix of every generation name.
    #[serde(default = "default_cache_namespace")]
    pub cache_namespace: String,

    /// Version suffix of the current generations. Bumping it makes the
    /// previous generations obsolete on the next activation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Paths precached into the static generation at install time.
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,

    /// URL prefixes (absolute, or paths starting with `/`) routed network-first.
    #[serde(default = "default_external_allowlist")]
    pub external_allowlist: Vec<String>,

    /// Dynamic entries older than this are evicted by the sweeper.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// How often the sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Activate immediately after a successful install.
    #[serde(default = "default_true")]
    pub skip_waiting_on_install: bool,

    /// Where analytics flushes are posted.
    #[serde(default = "default_analytics_endpoint")]
    pub analytics_endpoint: String,

    /// Where cart snapshots are posted.
    #[serde(default = "default_cart_sync_endpoint")]
    pub cart_sync_endpoint: String,

    #[serde(default = "default_notification_icon")]
    pub notification_icon: String,

    #[serde(default = "default_notification_badge")]
    pub notification_badge: String,

    #[serde(default = "default_vibration_pattern")]
    pub vibration_pattern: Vec<u32>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./waystation-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:3000".into()
}

fn default_user_agent() -> String {
    "waystation/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_cache_namespace() -> String {
    "waystation".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_static_manifest() -> Vec<String> {
    [
        "/",
        "/manifest.json",
        "/favicon.ico",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
        "/src/App.css",
        "/src/App.jsx",
        "/src/main.jsx",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_external_allowlist() -> Vec<String> {
    [
        "https://api.steampowered.com/",
        "https://steamcommunity.com/",
        "/api/",
        "https://fonts.googleapis.com/",
        "https://fonts.gstatic.com/",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_true() -> bool {
    true
}

fn default_analytics_endpoint() -> String {
    "/api/analytics".into()
}

fn default_cart_sync_endpoint() -> String {
    "/api/cart/sync".into()
}

fn default_notification_icon() -> String {
    "/icons/icon-192x192.png".into()
}

fn default_notification_badge() -> String {
    "/icons/badge-72x72.png".into()
}

fn default_vibration_pattern() -> Vec<u32> {
    vec![200, 100, 200]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            cache_namespace: default_cache_namespace(),
            cache_version: default_cache_version(),
            static_manifest: default_static_manifest(),
            external_allowlist: default_external_allowlist(),
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            skip_waiting_on_install: true,
            analytics_endpoint: default_analytics_endpoint(),
            cart_sync_endpoint: default_cart_sync_endpoint(),
            notification_icon: default_notification_icon(),
            notification_badge: default_notification_badge(),
            vibration_pattern: default_vibration_pattern(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Name of the current static generation.
    pub fn static_generation(&self) -> String {
        format!("{}-static-{}", self.cache_namespace, self.cache_version)
    }

    /// Name of the current dynamic generation.
    pub fn dynamic_generation(&self) -> String {
        format!("{}-dynamic-{}", self.cache_namespace, self.cache_version)
    }

    /// The origin parsed as a URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `origin` is not an absolute URL.
    pub fn origin_url(&self) -> Result<url::Url, ConfigError> {
        url::Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WAYSTATION_`
    /// 2. TOML file from `WAYSTATION_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WAYSTATION_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WAYSTATION_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
