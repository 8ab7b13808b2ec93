//! # Offkit Service Worker
//!
//! Offline-first request handling for a single web origin.
//!
//! ## Features
//!
//! - **Resource store**: named generations of request → response snapshots
//! - **Versioning**: install creates a generation, activate deletes the rest
//! - **Classification**: every request is sorted into one class before any I/O
//! - **Policies**: cache-first for assets and API data, a fallback chain for pages
//! - **Lifecycle**: install, activate, fetch and sync events
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (lifecycle)
//!     ├── VersionManager ──► ResourceStore
//!     │                          └── generation "<prefix>-v<N>"
//!     │                                  └── URL → CacheEntry
//!     └── PolicyEngine
//!             ├── RequestClassifier
//!             ├── NavigationResolver
//!             └── Network
//! ```

use offkit_common::OffkitError;
use thiserror::Error;

pub mod classify;
pub mod clients;
pub mod config;
pub mod navigation;
pub mod offline;
pub mod policy;
pub mod store;
pub mod sync;
pub mod version;
pub mod worker;

#[cfg(test)]
mod testing;

pub use classify::{RequestClass, RequestClassifier};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::OfflineConfig;
pub use navigation::{MatchStrategy, NavigationResolver, NavigationResult, Resolution};
pub use policy::{FetchOutcome, PolicyEngine, Strategy};
pub use store::{
    cache_key, CacheEntry, GenerationHandle, MatchOptions, ResourceStore, StoreSnapshot,
    StoreStatsSnapshot,
};
pub use sync::{LogSyncHook, SyncHook, SyncOutcome, SyncRegistration};
pub use version::{Cleanup, GenerationStatus, VersionManager};
pub use worker::{
    ActivateReport, InstallReport, ServiceWorker, ServiceWorkerEvent, WorkerId, WorkerState,
};

// ==================== Errors ====================

/// Errors that can occur in offline layer operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Entry for {url} is {size} bytes, limit is {limit}")]
    QuotaExceeded {
        url: String,
        size: usize,
        limit: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ServiceWorkerError> for OffkitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Config(message) => OffkitError::config(message),
            ServiceWorkerError::StateError(message) => OffkitError::State(message),
            ServiceWorkerError::NotFound(message) => OffkitError::NotFound(message),
            ServiceWorkerError::Sync(message) => OffkitError::sync(message),
            ServiceWorkerError::Io(e) => OffkitError::Io(e),
            other @ (ServiceWorkerError::CacheError(_)
            | ServiceWorkerError::QuotaExceeded { .. }
            | ServiceWorkerError::Serialization(_)) => OffkitError::store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_keeps_category() {
        let cases = [
            (ServiceWorkerError::Config("x".into()), "config"),
            (ServiceWorkerError::StateError("x".into()), "state"),
            (ServiceWorkerError::CacheError("x".into()), "store"),
            (
                ServiceWorkerError::QuotaExceeded {
                    url: "https://farm.example/".into(),
                    size: 10,
                    limit: 4,
                },
                "store",
            ),
            (ServiceWorkerError::Sync("x".into()), "sync"),
        ];
        for (err, category) in cases {
            assert_eq!(OffkitError::from(err).category(), category);
        }
    }

    #[test]
    fn test_quota_message() {
        let err = ServiceWorkerError::QuotaExceeded {
            url: "https://farm.example/".into(),
            size: 10,
            limit: 4,
        };
        assert_eq!(
            err.to_string(),
            "Entry for https://farm.example/ is 10 bytes, limit is 4"
        );
    }
}
