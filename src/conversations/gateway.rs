//! Network boundary to the conversation backend.

use std::future::Future;
use std::pin::Pin;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use super::config::SyncConfig;
use super::error::{GatewayError, GatewayResult, SyncError};
use super::ids::ConversationId;
use super::record::ConversationRecord;

/// Boxed future type for gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Partial update applied to a conversation's mutable fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationPatch {
    /// New display title, when renaming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ConversationPatch {
    /// Patch that renames the conversation.
    #[must_use]
    pub fn rename(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }
}

/// Remote operations the synchronization core needs from the backend.
///
/// Each call stands alone; no ordering is guaranteed between concurrent
/// calls for different conversations. Timeouts are enforced here, not in the
/// store.
pub trait ConversationGateway: Send + Sync {
    /// List the `limit` most recently updated conversations.
    fn list(&self, limit: usize) -> GatewayFuture<'_, GatewayResult<Vec<ConversationRecord>>>;

    /// Create a new conversation and return its record.
    fn create(&self) -> GatewayFuture<'_, GatewayResult<ConversationRecord>>;

    /// Apply a partial update and return the updated record.
    fn update(
        &self,
        id: ConversationId,
        patch: ConversationPatch,
    ) -> GatewayFuture<'_, GatewayResult<ConversationRecord>>;

    /// Delete a conversation; `true` when the backend removed it.
    fn delete(&self, id: ConversationId) -> GatewayFuture<'_, GatewayResult<bool>>;
}

/// Listing envelope returned by `GET /conversations`.
#[derive(Debug, Deserialize)]
struct ListEnvelope {
    items: Vec<ConversationRecord>,
}

/// Deletion envelope returned by `DELETE /conversations/{id}`.
#[derive(Debug, Deserialize)]
struct DeleteEnvelope {
    success: bool,
}

/// Rejection body shapes the backend may produce.
#[derive(Debug, Default, Deserialize)]
struct RejectionBody {
    message: Option<String>,
    detail: Option<String>,
    error: Option<String>,
}

impl RejectionBody {
    fn into_message(self) -> Option<String> {
        self.message.or(self.detail).or(self.error)
    }
}

/// HTTP implementation of the gateway.
pub struct HttpConversationGateway {
    client: reqwest::Client,
    base: String,
}

impl HttpConversationGateway {
    /// Build a gateway from the sync configuration.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be created.
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        Url::parse(&config.base_url)
            .map_err(|e| SyncError::Config(format!("invalid base url: {e}")))?;
        let base = config.base_url.trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;

        Ok(Self { client, base })
    }

    /// Turn a non-2xx response into the error taxonomy.
    async fn read_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return GatewayError::NotFound;
        }
        let message = response
            .json::<RejectionBody>()
            .await
            .ok()
            .and_then(RejectionBody::into_message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_string()
            });
        GatewayError::Rejected {
            status: status.as_u16(),
            message,
        }
    }

    async fn decode_record(response: reqwest::Response) -> GatewayResult<ConversationRecord> {
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        response
            .json::<ConversationRecord>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

impl ConversationGateway for HttpConversationGateway {
    fn list(&self, limit: usize) -> GatewayFuture<'_, GatewayResult<Vec<ConversationRecord>>> {
        Box::pin(async move {
            let url = format!("{}/conversations?limit={limit}", self.base);
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(Self::read_error(response).await);
            }
            let envelope: ListEnvelope = response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))?;
            Ok(envelope.items)
        })
    }

    fn create(&self) -> GatewayFuture<'_, GatewayResult<ConversationRecord>> {
        Box::pin(async move {
            let url = format!("{}/conversations", self.base);
            let response = self.client.post(&url).send().await?;
            Self::decode_record(response).await
        })
    }

    fn update(
        &self,
        id: ConversationId,
        patch: ConversationPatch,
    ) -> GatewayFuture<'_, GatewayResult<ConversationRecord>> {
        Box::pin(async move {
            let url = format!("{}/conversations/{id}", self.base);
            let response = self.client.put(&url).json(&patch).send().await?;
            Self::decode_record(response).await
        })
    }

    fn delete(&self, id: ConversationId) -> GatewayFuture<'_, GatewayResult<bool>> {
        Box::pin(async move {
            let url = format!("{}/conversations/{id}", self.base);
            let response = self.client.delete(&url).send().await?;
            if !response.status().is_success() {
                return Err(Self::read_error(response).await);
            }
            let envelope: DeleteEnvelope = response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))?;
            Ok(envelope.success)
        })
    }
}
