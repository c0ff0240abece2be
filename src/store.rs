//! Seams between the reconciler and the daemon.

use async_trait::async_trait;
use daemon_api::{
    CancellationSignal, DaemonApiClient, DaemonApiError, Fragment, PersistedMessage,
};

/// Starts one streamed agent turn.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Streams the reply to `message`, calling `on_fragment` in arrival order.
    ///
    /// Returns once the response body ends. Implementations must stop reading
    /// and return [`DaemonApiError::Cancelled`] once `cancellation` is set.
    async fn stream(
        &self,
        conversation_id: &str,
        message: &str,
        cancellation: &CancellationSignal,
        on_fragment: &mut (dyn FnMut(Fragment) + Send),
    ) -> Result<(), DaemonApiError>;
}

/// Read-only access to persisted conversation history.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Full ordered message list for one conversation. Must be idempotent.
    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<PersistedMessage>, DaemonApiError>;
}

#[async_trait]
impl StreamTransport for DaemonApiClient {
    async fn stream(
        &self,
        conversation_id: &str,
        message: &str,
        cancellation: &CancellationSignal,
        on_fragment: &mut (dyn FnMut(Fragment) + Send),
    ) -> Result<(), DaemonApiError> {
        self.stream_with_handler(conversation_id, message, Some(cancellation), |fragment| {
            on_fragment(fragment)
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl DurableStore for DaemonApiClient {
    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<PersistedMessage>, DaemonApiError> {
        let conversation = self.fetch_conversation(conversation_id).await?;
        Ok(conversation.messages)
    }
}
