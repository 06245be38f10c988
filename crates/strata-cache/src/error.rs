//! Cache and backend error types.

use std::sync::Arc;
use std::time::Duration;

use strata_common::{CodecError, WorldError};
use thiserror::Error;

/// Errors raised by a backend store or knowledge provider.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes did not decode
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Serde or compression failure
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The store does not accept writes
    #[error("{0} store is read-only")]
    ReadOnly(&'static str),
    /// The store cannot be reached
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors delivered to cache callers.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// A backend call failed; cache state is unchanged
    #[error("backend failed for {kind} {key}: {source}")]
    Backend {
        /// Entity kind of the cache
        kind: &'static str,
        /// Debug rendering of the key
        key: String,
        /// Underlying failure
        source: Arc<BackendError>,
    },
    /// The backend handle could not be constructed
    #[error("cache setup failed: {0}")]
    Setup(String),
    /// Too many requests arrived before the cache became ready
    #[error("stash full ({capacity} requests queued during startup)")]
    StashOverflow {
        /// Configured stash capacity
        capacity: usize,
    },
    /// No reply arrived in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The cache task has stopped
    #[error("cache is closed")]
    Closed,
    /// Writes are not accepted by this cache
    #[error("{0} cache is read-only")]
    ReadOnly(&'static str),
    /// A lookup over cached chunks failed to decode
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Cached chunks are inconsistent with the world tree
    #[error(transparent)]
    World(#[from] WorldError),
}

impl CacheError {
    /// Wraps a backend failure for `kind`/`key`.
    pub fn backend(kind: &'static str, key: &impl std::fmt::Debug, source: BackendError) -> Self {
        Self::backend_shared(kind, key, Arc::new(source))
    }

    pub(crate) fn backend_shared(
        kind: &'static str,
        key: &impl std::fmt::Debug,
        source: Arc<BackendError>,
    ) -> Self {
        Self::Backend {
            kind,
            key: format!("{key:?}"),
            source,
        }
    }
}

/// Result type for cache requests.
pub type CacheResult<T> = Result<T, CacheError>;
