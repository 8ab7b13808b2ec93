//! Deferred synchronization hook.
//!
//! The offline layer never replays writes itself. When the platform reports
//! connectivity for the configured tag, it hands control to a [`SyncHook`]
//! supplied by the application.

use futures::future::BoxFuture;
use offkit_common::{retry_when, OffkitError, RetryConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::OfflineConfig;
use crate::ServiceWorkerError;

/// Application-provided work to run when a sync signal arrives.
pub trait SyncHook: Send + Sync {
    /// Run the synchronization for `tag`. Errors are retried.
    fn on_sync<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, offkit_common::Result<()>>;
}

/// Hook that only records the signal. Used when the application supplies none.
#[derive(Debug, Default)]
pub struct LogSyncHook;

impl SyncHook for LogSyncHook {
    fn on_sync<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, offkit_common::Result<()>> {
        Box::pin(async move {
            info!(tag, "Sync signal received, no hook installed");
            Ok(())
        })
    }
}

/// What a sync signal led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The tag is not the one this layer listens for.
    Ignored,
    /// The hook ran to completion after `attempts` tries.
    Completed { attempts: u32 },
}

/// Which tag to react to and how hard to retry the hook.
#[derive(Debug, Clone)]
pub struct SyncRegistration {
    tag: String,
    retry: RetryConfig,
}

impl SyncRegistration {
    pub fn new(tag: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            tag: tag.into(),
            retry,
        }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        Self::new(
            config.sync_tag.clone(),
            RetryConfig::with_attempts(
                config.sync_max_attempts,
                Duration::from_millis(config.sync_initial_delay_ms),
            ),
        )
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Run `hook` if `tag` matches, retrying transient failures with backoff.
    pub async fn dispatch(
        &self,
        hook: &dyn SyncHook,
        tag: &str,
    ) -> Result<SyncOutcome, ServiceWorkerError> {
        if tag != self.tag {
            debug!(tag, expected = %self.tag, "Ignoring sync tag");
            return Ok(SyncOutcome::Ignored);
        }

        let attempts = AtomicU32::new(0);
        let result: Result<(), OffkitError> =
            retry_when(&self.retry, OffkitError::is_retryable, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                hook.on_sync(tag)
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(()) => {
                info!(tag, attempts, "Sync completed");
                Ok(SyncOutcome::Completed { attempts })
            }
            Err(e) => Err(ServiceWorkerError::Sync(format!(
                "'{tag}' failed after {attempts} attempts: {e}"
            ))),
        }
    }
}
