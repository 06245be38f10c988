//! Cache tuning parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizes and timeouts shared by the concrete caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Bounded mailbox size per cache
    pub mailbox_capacity: usize,
    /// Requests held while a cache is starting up
    pub stash_capacity: usize,
    /// Default request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Chunks kept in memory
    pub chunk_capacity: usize,
    /// Map objects kept in memory
    pub object_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            stash_capacity: 1024,
            request_timeout_ms: 5_000,
            chunk_capacity: 4_096,
            object_capacity: 16_384,
        }
    }
}

impl CacheSettings {
    /// Validate and clamp values to sensible ranges.
    pub fn validate(&mut self) {
        self.mailbox_capacity = self.mailbox_capacity.clamp(1, 65_536);
        self.stash_capacity = self.stash_capacity.clamp(1, 1 << 20);
        self.request_timeout_ms = self.request_timeout_ms.clamp(10, 600_000);
        // A world tree needs its root plus at least one path to a leaf resident.
        self.chunk_capacity = self.chunk_capacity.clamp(16, 65_535);
        self.object_capacity = self.object_capacity.max(1);
    }

    /// Default request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
