//! HTTP route handlers for the conversation backend.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::conversations::ids::ConversationId;
use crate::conversations::record::ConversationRecord;

use super::state::AppState;

/// Number of conversations returned when a listing names no limit.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/{id}",
            axum::routing::put(update_conversation).delete(delete_conversation),
        )
        .with_state(state)
}

/// Error body returned on rejection.
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn reject(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatlens-backend",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Listing query parameters.
#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// Listing envelope.
#[derive(Debug, Serialize)]
struct ListResponse {
    items: Vec<ConversationRecord>,
}

/// Handle conversation listings.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, (StatusCode, Json<ErrorBody>)> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let items = state.catalog.list(limit).await.map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list conversations: {e}"),
        )
    })?;
    Ok(Json(ListResponse { items }))
}

/// Handle conversation creation.
async fn create_conversation(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConversationRecord>, (StatusCode, Json<ErrorBody>)> {
    let record = state.catalog.create().await.map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to create conversation: {e}"),
        )
    })?;
    tracing::info!(id = %record.id, "created conversation");
    Ok(Json(record))
}

/// Rename request body.
#[derive(Debug, Deserialize)]
struct UpdateRequest {
    title: String,
}

/// Handle conversation renames.
async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<ConversationRecord>, (StatusCode, Json<ErrorBody>)> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            "title must not be empty",
        ));
    }

    let id = ConversationId::from(id);
    let updated = state.catalog.update_title(&id, title).await.map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to update conversation: {e}"),
        )
    })?;

    match updated {
        Some(record) => {
            tracing::debug!(%id, title, "renamed conversation");
            Ok(Json(record))
        }
        None => Err(reject(StatusCode::NOT_FOUND, "conversation not found")),
    }
}

/// Deletion envelope.
#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
}

/// Handle conversation deletion.
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, (StatusCode, Json<ErrorBody>)> {
    let id = ConversationId::from(id);
    let removed = state.catalog.delete(&id).await.map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to delete conversation: {e}"),
        )
    })?;

    if removed {
        tracing::info!(%id, "deleted conversation");
        Ok(Json(DeleteResponse { success: true }))
    } else {
        Err(reject(StatusCode::NOT_FOUND, "conversation not found"))
    }
}
