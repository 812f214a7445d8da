//! Configuration for the synchronization core.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the synchronization service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the conversation backend.
    pub base_url: String,
    /// Request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Number of records a refresh fetches when the caller does not name a limit.
    pub default_refresh_limit: usize,
    /// Side-cache configuration.
    pub cache: SideCacheConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            default_refresh_limit: 50,
            cache: SideCacheConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the default refresh limit.
    #[must_use]
    pub const fn with_refresh_limit(mut self, limit: usize) -> Self {
        self.default_refresh_limit = limit;
        self
    }

    /// Set the side-cache database path.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache.sqlite_path = path.into();
        self
    }
}

/// Side-cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SideCacheConfig {
    /// Path of the SQLite database holding cached artifacts.
    pub sqlite_path: PathBuf,
    /// Capacity of the in-memory read-through front.
    pub lru_capacity: usize,
}

impl Default for SideCacheConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("chatlens-cache.sqlite"),
            lru_capacity: 256,
        }
    }
}

/// Serialize durations as whole seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
