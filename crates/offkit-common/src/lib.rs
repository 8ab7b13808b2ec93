//! # Offkit Common
//!
//! Pieces every offkit crate shares:
//!
//! - [`OffkitError`], the error type that crosses crate and host boundaries
//! - [`init_logging`] for binaries
//! - [`retry_with_backoff`] for hooks that fail while connectivity settles

use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_when, retry_with_backoff, RetryConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type shared by the offkit crates and their hosts.
#[derive(Error, Debug)]
pub enum OffkitError {
    /// The origin could not be reached or answered with garbage.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A resource store read or write failed.
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Bad or unreadable configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The host's synchronization hook failed.
    #[error("Sync error: {message}")]
    Sync {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An event arrived in a lifecycle state that cannot handle it.
    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl OffkitError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            source: None,
        }
    }

    /// Config error caused by `source` (a parse or I/O failure).
    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether trying again later could succeed.
    ///
    /// Connectivity and I/O problems are transient; bad input and
    /// lifecycle misuse are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OffkitError::Network { .. } | OffkitError::Sync { .. } | OffkitError::Io(_)
        )
    }

    /// Short label for the `category` log field.
    pub fn category(&self) -> &'static str {
        match self {
            OffkitError::Network { .. } => "network",
            OffkitError::Store { .. } => "store",
            OffkitError::Config { .. } => "config",
            OffkitError::Sync { .. } => "sync",
            OffkitError::State(_) => "state",
            OffkitError::Io(_) => "io",
            OffkitError::NotFound(_) => "not_found",
            OffkitError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

pub type Result<T> = std::result::Result<T, OffkitError>;
