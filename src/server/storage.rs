//! SQLite catalog behind the conversation routes.

use std::fmt;
use std::path::Path;

use tokio_rusqlite::Connection;

use crate::conversations::ids::ConversationId;
use crate::conversations::record::{ConversationRecord, now_ms};

/// Error type for catalog operations.
#[derive(Debug)]
pub struct CatalogError(pub String);

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CatalogError {}

impl From<tokio_rusqlite::Error> for CatalogError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Raw row shape handed out of the SQLite worker.
type CatalogRow = (String, String, i64, i64, String);

fn row_to_record(row: CatalogRow) -> CatalogResult<ConversationRecord> {
    let (id, title, created_at, updated_at, extra_json) = row;
    let extra = serde_json::from_str(&extra_json)?;
    Ok(ConversationRecord {
        id: ConversationId::from(id),
        title,
        created_at,
        updated_at,
        extra,
    })
}

/// `SQLite`-backed conversation catalog.
pub struct ConversationCatalog {
    conn: Connection,
}

impl ConversationCatalog {
    /// Open the catalog database and create the schema.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::with_connection(conn).await
    }

    /// Open an in-memory catalog (tests, demos).
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn open_in_memory() -> CatalogResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> CatalogResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    extra TEXT NOT NULL DEFAULT '{}'
                );
                CREATE INDEX IF NOT EXISTS idx_conversations_updated
                    ON conversations (updated_at DESC);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// List the `limit` most recently updated conversations.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn list(&self, limit: usize) -> CatalogResult<Vec<ConversationRecord>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, created_at, updated_at, extra
                     FROM conversations
                     ORDER BY updated_at DESC, created_at DESC, id ASC
                     LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit as i64], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<CatalogRow>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Create a new conversation record.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn create(&self) -> CatalogResult<ConversationRecord> {
        let record = ConversationRecord::new(now_ms());
        let id = record.id.to_string();
        let title = record.title.clone();
        let created_at = record.created_at;
        let updated_at = record.updated_at;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO conversations (id, title, created_at, updated_at, extra)
                     VALUES (?1, ?2, ?3, ?4, '{}')",
                    rusqlite::params![id, title, created_at, updated_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(record)
    }

    /// Update a conversation's title, bumping `updated_at`.
    ///
    /// Returns the updated record, or `None` when the id is unknown.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn update_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> CatalogResult<Option<ConversationRecord>> {
        let id_str = id.to_string();
        let title = title.to_string();
        let updated_at = now_ms();

        let row = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![title, updated_at, id_str],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let mut stmt = conn.prepare(
                    "SELECT id, title, created_at, updated_at, extra
                     FROM conversations WHERE id = ?1",
                )?;
                let row: Option<CatalogRow> = stmt
                    .query_row(rusqlite::params![id_str], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })
                    .ok();
                Ok(row)
            })
            .await?;

        row.map(row_to_record).transpose()
    }

    /// Delete a conversation; `true` when a row was removed.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn delete(&self, id: &ConversationId) -> CatalogResult<bool> {
        let id_str = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM conversations WHERE id = ?1",
                    rusqlite::params![id_str],
                )?;
                Ok(removed > 0)
            })
            .await?;
        Ok(removed)
    }
}
