// Client side of the generation service's method calls

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::session::SessionId;

/// The two calls the coordinator makes on the service. Chunks come back
/// separately as bus signals.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts a generation and returns the id its signals will carry.
    async fn request_start(&self, prompt: &str) -> Result<SessionId, BackendError>;

    /// Asks the service to stop whatever it is currently generating.
    async fn request_stop(&self) -> Result<bool, BackendError>;
}

#[async_trait]
impl<B: GenerationBackend + ?Sized> GenerationBackend for Arc<B> {
    async fn request_start(&self, prompt: &str) -> Result<SessionId, BackendError> {
        (**self).request_start(prompt).await
    }

    async fn request_stop(&self) -> Result<bool, BackendError> {
        (**self).request_stop().await
    }
}
