//! Conversation metadata model.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::ConversationId;

/// Title used when a conversation has not been named yet.
pub const UNTITLED_TITLE: &str = "Untitled Conversation";

fn default_title() -> String {
    UNTITLED_TITLE.to_string()
}

/// Metadata for one conversation, as held by the store and exchanged with the
/// backend.
///
/// Fields the core does not know about (a data-source reference, feature
/// flags, whatever the backend grows next) are captured in `extra` and echoed
/// back unmodified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique identifier, immutable for the record's lifetime.
    pub id: ConversationId,
    /// Display title; falls back to [`UNTITLED_TITLE`] when the backend omits it.
    #[serde(default = "default_title")]
    pub title: String,
    /// Creation timestamp in milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Last-modification timestamp in milliseconds since the Unix epoch;
    /// the recency sort key.
    pub updated_at: i64,
    /// Backend fields carried through unmodified.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConversationRecord {
    /// Create a record with a fresh identity and the untitled sentinel.
    #[must_use]
    pub fn new(now_ms: i64) -> Self {
        Self::with_id(ConversationId::generate(), now_ms)
    }

    /// Create a record for an existing identity.
    #[must_use]
    pub fn with_id(id: ConversationId, now_ms: i64) -> Self {
        Self {
            id,
            title: default_title(),
            created_at: now_ms,
            updated_at: now_ms,
            extra: Map::new(),
        }
    }

    /// Presentation ordering: `updated_at` descending, ties broken by
    /// `created_at` descending, then by `id` for determinism.
    #[must_use]
    pub fn recency_order(a: &Self, b: &Self) -> Ordering {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Whether `incoming` replaces this record under last-write-wins.
    ///
    /// Strictly newer wins; a tie keeps the resident record, so an
    /// equal-timestamp refresh cannot clobber an in-flight optimistic value.
    #[must_use]
    pub fn superseded_by(&self, incoming: &Self) -> bool {
        incoming.updated_at > self.updated_at
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
