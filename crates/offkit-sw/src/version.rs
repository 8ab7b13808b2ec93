//! Store generation versioning.
//!
//! Install only ever creates; activate is the only place old generations are
//! deleted. Until activate runs, the previous generation stays servable by the
//! worker that owns it.

use tracing::{debug, info};

use crate::store::{GenerationHandle, ResourceStore};
use crate::ServiceWorkerError;

/// Split a generation name like `farm-management-v3` into prefix and version.
pub fn parse_generation(name: &str) -> Option<(&str, u32)> {
    let (prefix, version) = name.rsplit_once("-v")?;
    if prefix.is_empty() {
        return None;
    }
    version.parse().ok().map(|v| (prefix, v))
}

/// Whether install created the generation or found it from an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Created,
    Reused,
}

/// Result of activation cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cleanup {
    /// The generation left active.
    pub active: String,
    /// Generations deleted, in creation order.
    pub deleted: Vec<String>,
}

/// Tracks the current generation and garbage-collects the rest.
#[derive(Debug, Clone)]
pub struct VersionManager {
    store: ResourceStore,
    current: String,
}

impl VersionManager {
    /// Create a manager for the given current generation name.
    pub fn new(store: ResourceStore, current: impl Into<String>) -> Self {
        Self {
            store,
            current: current.into(),
        }
    }

    /// Current generation name.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Handle to the current generation (may not exist before install).
    pub fn handle(&self) -> GenerationHandle {
        self.store.handle(&self.current)
    }

    /// Open or create the current generation. Deletes nothing.
    pub async fn install_generation(
        &self,
    ) -> Result<(GenerationHandle, GenerationStatus), ServiceWorkerError> {
        let status = if self.store.has(&self.current).await {
            GenerationStatus::Reused
        } else {
            GenerationStatus::Created
        };

        let handle = self.store.open(&self.current).await?;

        let others: Vec<String> = self
            .store
            .keys()
            .await
            .into_iter()
            .filter(|name| *name != self.current)
            .collect();
        if !others.is_empty() {
            debug!(
                generation = %self.current,
                previous = ?others,
                "Previous generations kept until activation"
            );
        }

        info!(generation = %self.current, ?status, "Generation ready");
        Ok((handle, status))
    }

    /// Delete every generation other than the current one.
    pub async fn activate(&self) -> Cleanup {
        let mut deleted = Vec::new();

        for name in self.store.keys().await {
            if name == self.current {
                continue;
            }
            if self.store.delete(&name).await {
                match (parse_generation(&name), parse_generation(&self.current)) {
                    (Some((_, old)), Some((_, new))) => {
                        info!(generation = %name, from = old, to = new, "Deleting old generation")
                    }
                    _ => info!(generation = %name, "Deleting old generation"),
                }
                deleted.push(name);
            }
        }

        Cleanup {
            active: self.current.clone(),
            deleted,
        }
    }
}
