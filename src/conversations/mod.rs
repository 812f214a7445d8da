//! Conversation-session synchronization core.
//!
//! This module keeps the conversation list consistent across every UI
//! surface that shows it:
//! - One authoritative [`ConversationStore`] per process
//! - Snapshot and lifecycle-event subscriptions
//! - Network-backed refresh/create/rename/delete with optimistic updates,
//!   rollback, and stale-response discard
//! - Durable per-conversation side-artifact cache, invalidated on deletion

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod record;
pub mod store;

pub use cache::{ArtifactKind, CacheError, SideCache, SqliteSideCache};
pub use config::{SideCacheConfig, SyncConfig};
pub use error::{GatewayError, GatewayResult, SyncError, SyncResult};
pub use gateway::{ConversationGateway, ConversationPatch, HttpConversationGateway};
pub use ids::ConversationId;
pub use record::{ConversationRecord, UNTITLED_TITLE};
pub use store::{ConversationStore, StoreEvent, StoreSnapshot, Subscription};

use std::sync::Arc;

/// Build a fully wired store: HTTP gateway plus SQLite side cache.
///
/// # Errors
/// Returns an error if the configuration is invalid or the cache database
/// cannot be opened.
pub async fn connect(config: SyncConfig) -> SyncResult<Arc<ConversationStore>> {
    let gateway = HttpConversationGateway::new(&config)?;
    let cache = SqliteSideCache::open(&config.cache).await?;
    Ok(Arc::new(ConversationStore::new(
        Arc::new(gateway),
        Arc::new(cache),
        config,
    )))
}
