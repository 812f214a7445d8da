//! Application state shared across all request handlers.

use std::path::Path;
use std::sync::Arc;

use super::storage::ConversationCatalog;

/// Shared application state.
pub struct AppState {
    /// Conversation catalog backing the REST surface.
    pub catalog: ConversationCatalog,
}

impl AppState {
    /// Create state backed by the given database path.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be opened.
    pub async fn new(
        db_path: impl AsRef<Path>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let catalog = ConversationCatalog::open(db_path)
            .await
            .map_err(|e| format!("Failed to open conversation catalog: {e}"))?;
        Ok(Arc::new(Self { catalog }))
    }

    /// In-memory state for tests and demos.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be initialized.
    pub async fn in_memory() -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let catalog = ConversationCatalog::open_in_memory()
            .await
            .map_err(|e| format!("Failed to open conversation catalog: {e}"))?;
        Ok(Arc::new(Self { catalog }))
    }
}
