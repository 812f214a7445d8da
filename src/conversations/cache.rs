//! Durable per-conversation side-artifact cache.
//!
//! Consumers (chat panel, chart views, progress displays) persist derived
//! data here keyed by conversation identity, one namespace per artifact kind.
//! The store drives deletion: when a conversation is confirmed gone, every
//! namespace for its id is removed in a single transaction so no derived data
//! can resurface if the id is ever reused.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;

use super::config::SideCacheConfig;
use super::ids::ConversationId;
use super::record::now_ms;

/// Boxed future type for cache operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for side-cache operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError(pub String);

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CacheError {}

impl From<tokio_rusqlite::Error> for CacheError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Result type for side-cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Derived-artifact kinds cached per conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Rendered message list.
    Messages,
    /// Generated chart list.
    Charts,
    /// Analysis progress.
    Progress,
    /// Whether the conversation has a data source attached.
    HasDataSource,
}

impl ArtifactKind {
    /// Every namespace, in the order they are cleared.
    pub const ALL: [Self; 4] = [
        Self::Messages,
        Self::Charts,
        Self::Progress,
        Self::HasDataSource,
    ];

    /// Key prefix owned by this namespace.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Messages => "conv_messages",
            Self::Charts => "conv_charts",
            Self::Progress => "conv_progress",
            Self::HasDataSource => "conv_has_data_source",
        }
    }

    /// Full cache key for a conversation.
    #[must_use]
    pub fn key(self, id: &ConversationId) -> String {
        format!("{}_{}", self.prefix(), id)
    }
}

/// Keyed storage of per-conversation derived artifacts.
///
/// Entries are written by whichever consumer produced them, without
/// cross-namespace coordination. `clear` removes every namespace for an id
/// atomically and is a no-op when nothing was stored.
pub trait SideCache: Send + Sync {
    /// Read a cached artifact.
    fn get(
        &self,
        kind: ArtifactKind,
        id: &ConversationId,
    ) -> CacheFuture<'_, CacheResult<Option<Value>>>;

    /// Write a cached artifact, replacing any previous payload.
    fn put(
        &self,
        kind: ArtifactKind,
        id: &ConversationId,
        payload: Value,
    ) -> CacheFuture<'_, CacheResult<()>>;

    /// Remove every namespace for `id`.
    fn clear(&self, id: &ConversationId) -> CacheFuture<'_, CacheResult<()>>;
}

/// `SQLite` implementation of the side cache with an LRU read-through front.
pub struct SqliteSideCache {
    conn: Connection,
    hot: Mutex<LruCache<String, Value>>,
}

impl SqliteSideCache {
    /// Open (or create) the cache database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(config: &SideCacheConfig) -> CacheResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(conn, config.lru_capacity).await
    }

    /// Open an in-memory cache (tests, throwaway sessions).
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub async fn open_in_memory(lru_capacity: usize) -> CacheResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn, lru_capacity).await
    }

    async fn with_connection(conn: Connection, lru_capacity: usize) -> CacheResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS side_cache (
                    cache_key TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
            )?;
            Ok(())
        })
        .await?;

        let capacity = NonZeroUsize::new(lru_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            conn,
            hot: Mutex::new(LruCache::new(capacity)),
        })
    }
}

impl SideCache for SqliteSideCache {
    fn get(
        &self,
        kind: ArtifactKind,
        id: &ConversationId,
    ) -> CacheFuture<'_, CacheResult<Option<Value>>> {
        let key = kind.key(id);
        Box::pin(async move {
            if let Some(payload) = self.hot.lock().await.get(&key).cloned() {
                return Ok(Some(payload));
            }

            let lookup = key.clone();
            let stored = self
                .conn
                .call(move |conn| {
                    let mut stmt =
                        conn.prepare("SELECT payload FROM side_cache WHERE cache_key = ?1")?;
                    let row: Option<String> = stmt
                        .query_row(rusqlite::params![lookup], |row| row.get(0))
                        .ok();
                    Ok(row)
                })
                .await?;

            match stored {
                Some(json) => {
                    let payload: Value = serde_json::from_str(&json)?;
                    self.hot.lock().await.put(key, payload.clone());
                    Ok(Some(payload))
                }
                None => Ok(None),
            }
        })
    }

    fn put(
        &self,
        kind: ArtifactKind,
        id: &ConversationId,
        payload: Value,
    ) -> CacheFuture<'_, CacheResult<()>> {
        let key = kind.key(id);
        Box::pin(async move {
            let json = serde_json::to_string(&payload)?;
            let stored_key = key.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO side_cache (cache_key, payload, updated_at)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![stored_key, json, now_ms()],
                    )?;
                    Ok(())
                })
                .await?;

            self.hot.lock().await.put(key, payload);
            Ok(())
        })
    }

    fn clear(&self, id: &ConversationId) -> CacheFuture<'_, CacheResult<()>> {
        let keys: Vec<String> = ArtifactKind::ALL.iter().map(|kind| kind.key(id)).collect();
        Box::pin(async move {
            let deleted = keys.clone();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    for key in &deleted {
                        tx.execute(
                            "DELETE FROM side_cache WHERE cache_key = ?1",
                            rusqlite::params![key],
                        )?;
                    }
                    tx.commit()?;
                    Ok(())
                })
                .await?;

            let mut hot = self.hot.lock().await;
            for key in &keys {
                hot.pop(key);
            }
            Ok(())
        })
    }
}
