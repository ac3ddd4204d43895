//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` is not an absolute http(s) URL
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_age_secs` or `sweep_interval_secs` is 0
    /// - `cache_namespace`, `cache_version` or `user_agent` is empty
    /// - a manifest or allow-list entry is empty
    ///
    /// Returns `ConfigError::Missing` if the analytics or cart endpoint is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = self.origin_url()?;
        if origin.scheme() != "http" && origin.scheme() != "https" {
            return Err(invalid("origin", "must use http or https"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_age_secs == 0 {
            return Err(invalid("max_age_secs", "must be greater than 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs", "must be greater than 0"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.cache_namespace.is_empty() {
            return Err(invalid("cache_namespace", "must not be empty"));
        }
        if self.cache_version.is_empty() {
            return Err(invalid("cache_version", "must not be empty"));
        }

        if self.static_manifest.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid("static_manifest", "entries must not be empty"));
        }
        if self.external_allowlist.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid("external_allowlist", "entries must not be empty"));
        }

        if self.analytics_endpoint.is_empty() {
            return Err(ConfigError::Missing {
                field: "analytics_endpoint".into(),
                hint: "Set WAYSTATION_ANALYTICS_ENDPOINT environment variable".into(),
            });
        }
        if self.cart_sync_endpoint.is_empty() {
            return Err(ConfigError::Missing {
                field: "cart_sync_endpoint".into(),
                hint: "Set WAYSTATION_CART_SYNC_ENDPOINT environment variable".into(),
            });
        }

        if self.sweep_interval_secs > self.max_age_secs {
            tracing::warn!(
                sweep_interval_secs = self.sweep_interval_secs,
                max_age_secs = self.max_age_secs,
                "sweep interval exceeds max age; entries may outlive max age by up to one interval"
            );
        }

        Ok(())
    }
}
