//! Startup helpers for the ChatLens conversation backend.

use std::process::ExitCode;
use std::sync::Arc;

use crate::server::{self, AppState};

/// Default path of the catalog database.
const DEFAULT_DB_PATH: &str = "chatlens-backend.sqlite";

/// Run the backend (used by the `chatlens-backend` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting ChatLens backend v{}", env!("CARGO_PKG_VERSION"));

    let db_path = get_db_path();
    tracing::info!("Catalog database: {db_path}");

    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let state = match rt.block_on(AppState::new(&db_path)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server(state, port)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub async fn initialize() -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    AppState::new(get_db_path()).await
}

/// Get the configured catalog database path.
#[must_use]
pub fn get_db_path() -> String {
    std::env::var("CHATLENS_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/// Get the configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var("CHATLENS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
