//! Offline layer configuration.
//!
//! The version number is the only upgrade trigger: bumping it produces a new
//! generation name, which install seeds and activate promotes.

use offkit_common::{OffkitError, Result as CommonResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::ServiceWorkerError;

/// Configuration for the offline layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OfflineConfig {
    /// Origin the worker is scoped to (e.g. `https://farm.example/`).
    pub origin: String,

    /// Generation name prefix.
    pub cache_prefix: String,

    /// Current version. Generation name is `<cache_prefix>-v<version>`.
    pub version: u32,

    /// Own-origin pages seeded at install.
    pub precache_pages: Vec<String>,

    /// Own static asset seeded with the pages (the worker script itself).
    pub static_self_path: String,

    /// Third-party URLs populated best-effort at install.
    pub third_party_precache: Vec<String>,

    /// Cross-origin URL prefixes that may be intercepted and cached.
    pub third_party_allowlist: Vec<String>,

    /// Path prefix of JSON API endpoints.
    pub api_prefix: String,

    /// Path prefix of static assets.
    pub static_prefix: String,

    /// Cached pages served, in order, when a navigation cannot be resolved.
    pub fallback_pages: Vec<String>,

    /// Sync tag that signals the external synchronization hook.
    pub sync_tag: String,

    /// Attempts made on the sync hook before reporting failure.
    pub sync_max_attempts: u32,

    /// Delay before the second sync attempt, in milliseconds.
    pub sync_initial_delay_ms: u64,

    /// Largest body a single entry may hold; `None` is unbounded.
    pub max_entry_bytes: Option<usize>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8000/".to_string(),
            cache_prefix: "farm-management".to_string(),
            version: 1,
            precache_pages: vec!["/".to_string(), "/scan/".to_string()],
            static_self_path: "/static/farm_app/service-worker.js".to_string(),
            third_party_precache: vec![
                "https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js".to_string(),
            ],
            third_party_allowlist: vec!["https://unpkg.com/html5-qrcode".to_string()],
            api_prefix: "/api/".to_string(),
            static_prefix: "/static/".to_string(),
            fallback_pages: vec!["/".to_string(), "/scan/".to_string()],
            sync_tag: "sync-activities".to_string(),
            sync_max_attempts: 3,
            sync_initial_delay_ms: 500,
            max_entry_bytes: None,
        }
    }
}

impl OfflineConfig {
    /// Default configuration for the given origin.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> CommonResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| OffkitError::config_with_source("invalid offline config", e))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CommonResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!(
            path = %path.display(),
            generation = %config.generation_name(),
            "Loaded offline config"
        );
        Ok(config)
    }

    /// Name of the generation this configuration installs.
    pub fn generation_name(&self) -> String {
        format!("{}-v{}", self.cache_prefix, self.version)
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> Result<Url, ServiceWorkerError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ServiceWorkerError::Config(format!("origin '{}': {e}", self.origin)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(ServiceWorkerError::Config(format!(
                "origin '{}' must be an http(s) URL with a host",
                self.origin
            )));
        }
        Ok(url)
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        let origin = self.origin_url()?;

        if self.cache_prefix.trim().is_empty() {
            return Err(ServiceWorkerError::Config("cache_prefix is empty".into()));
        }
        if self.version == 0 {
            return Err(ServiceWorkerError::Config("version must be at least 1".into()));
        }

        let prefixes = [
            ("api_prefix", &self.api_prefix),
            ("static_prefix", &self.static_prefix),
        ];
        for (field, prefix) in prefixes {
            if !prefix.starts_with('/') {
                return Err(ServiceWorkerError::Config(format!(
                    "{field} '{prefix}' must start with '/'"
                )));
            }
        }

        let own_paths = self
            .precache_pages
            .iter()
            .chain(std::iter::once(&self.static_self_path))
            .chain(self.fallback_pages.iter());
        for path in own_paths {
            let resolved = origin
                .join(path)
                .map_err(|e| ServiceWorkerError::Config(format!("path '{path}': {e}")))?;
            if resolved.origin() != origin.origin() {
                return Err(ServiceWorkerError::Config(format!(
                    "'{path}' does not belong to {}",
                    origin.origin().ascii_serialization()
                )));
            }
        }

        for prefix in &self.third_party_allowlist {
            Url::parse(prefix).map_err(|e| {
                ServiceWorkerError::Config(format!("allow-list entry '{prefix}': {e}"))
            })?;
        }

        for url in &self.third_party_precache {
            Url::parse(url)
                .map_err(|e| ServiceWorkerError::Config(format!("third-party URL '{url}': {e}")))?;
            if !self.third_party_allowlist.iter().any(|p| url.starts_with(p)) {
                return Err(ServiceWorkerError::Config(format!(
                    "third-party URL '{url}' is not covered by the allow-list"
                )));
            }
        }

        Ok(())
    }
}
