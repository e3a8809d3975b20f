//! Error taxonomy for the dispatch logbook core.
//!
//! Storage errors (`NotFound`, `DuplicateKey`) propagate up to the
//! lifecycle controller uncaught; it translates them into user-facing
//! rejections. A skipped-as-duplicate sync is *not* an error — see
//! `SyncOutcome` in the `sync` module.

use std::time::Duration;

use thiserror::Error;

/// Core result type
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Read or update targeting a missing dispatch or scan.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insert collision on `dispatch_id` or `dispatch_no`. Indicates an
    /// allocator or caller bug; not retryable.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Mutating a COMPLETED dispatch, discarding it, re-finalizing it,
    /// or finalizing an empty one.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Errors creating/connecting/querying the SQLite store.
    #[error("store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Config file unreadable or unparseable.
    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The webhook upload exceeded its configured deadline. Retryable;
    /// the dispatch is left unmarked.
    #[error("sync timed out after {0:?}")]
    SyncTimeout(Duration),

    /// Transport or HTTP-level upload failure, distinct from timeout.
    #[error("sync failed: {message}")]
    SyncFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DispatchError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::DuplicateKey(message.into())
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition(message.into())
    }

    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn sync_failure(message: impl Into<String>) -> Self {
        Self::SyncFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn sync_failure_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SyncFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
