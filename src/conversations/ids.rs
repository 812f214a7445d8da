//! Identifier type for conversations.
//!
//! The backend owns identity: whatever string it hands out is carried through
//! untouched, so the newtype is a transparent wrapper around `String` rather
//! than a parsed UUID. Generation of *fresh* identifiers (reference backend,
//! tests) is feature-gated.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: time-ordered `UUIDv7` generation via `uuid/v7`.
//! - `ulid_ids`: ULID-based identifiers.
//! - `nanoid_ids`: NanoID-based identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Generate the string form of a fresh identifier.
///
/// The strategy is chosen at compile time: NanoID, then ULID, then
/// time-ordered `UUIDv7`, falling back to random `UUIDv4`.
#[must_use]
fn generated_id() -> String {
    #[cfg(feature = "nanoid_ids")]
    {
        nanoid::nanoid!()
    }
    #[cfg(all(feature = "ulid_ids", not(feature = "nanoid_ids")))]
    {
        ulid::Ulid::new().to_string()
    }
    #[cfg(all(
        feature = "uuid_v7",
        not(feature = "ulid_ids"),
        not(feature = "nanoid_ids")
    ))]
    {
        uuid::Uuid::now_v7().to_string()
    }
    #[cfg(not(any(feature = "uuid_v7", feature = "ulid_ids", feature = "nanoid_ids")))]
    {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Opaque conversation identity, immutable for the record's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a fresh identifier using the compiled-in strategy.
    #[must_use]
    pub fn generate() -> Self {
        Self(generated_id())
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying `String`.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConversationId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
