//! Streaming session coordinator.
//!
//! One coordinator owns one "active generation" slot for a whole bus
//! connection. A start request fills the slot when its reply arrives, chunk
//! and completion signals reach the registered handler only while their id
//! matches the slot, and everything else is dropped. Ids that arrive before
//! the start reply that names them are dropped as well; there is no buffering.

use std::future::Future;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backend::GenerationBackend;
use crate::config::CoordinatorConfig;
use crate::error::{BackendError, CoordinatorError};
use crate::handler::StreamHandler;
use crate::notification::{Notification, RawSignal};
use crate::session::{
    ActiveGeneration, Channel, GenerationSession, GenerationState, SessionId, SessionState,
};

/// Returned by a successful start.
///
/// The token fires once the generation leaves the active slot, whether it
/// completed, was stopped, superseded or cleared.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    id: SessionId,
    cancellation_token: CancellationToken,
}

impl GenerationHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn into_id(self) -> SessionId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub async fn finished(&self) {
        self.cancellation_token.cancelled().await
    }
}

pub struct Coordinator<B> {
    backend: B,
    state: Mutex<GenerationState>,
    call_timeout: Option<Duration>,
}

impl<B: GenerationBackend> Coordinator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: Mutex::new(GenerationState::default()),
            call_timeout: None,
        }
    }

    pub fn with_config(backend: B, config: &CoordinatorConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            ..Self::new(backend)
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Asks the backend for a new generation and makes it the active one.
    ///
    /// Whichever start reply resolves last owns the slot, regardless of the
    /// order the requests were made in. On failure nothing is registered and
    /// the current active generation, if any, is left alone.
    pub async fn start_generation<H>(
        &self,
        prompt: &str,
        handler: H,
    ) -> Result<GenerationHandle, CoordinatorError>
    where
        H: StreamHandler + 'static,
    {
        if prompt.trim().is_empty() {
            return Err(CoordinatorError::InvalidPrompt);
        }

        let id = self
            .call(self.backend.request_start(prompt))
            .await
            .inspect_err(|e| log::warn!("start request failed: {}", e))?;
        let cancellation_token = CancellationToken::new();

        let replaced = self.state.lock().await.activate(ActiveGeneration {
            id: id.clone(),
            handler: Box::new(handler),
            cancellation_token: cancellation_token.clone(),
        });
        if let Some(previous) = replaced {
            log::info!("generation {} superseded by {}", previous.id, id);
            previous.cancellation_token.cancel();
        }
        log::info!("generation {} active", id);

        Ok(GenerationHandle {
            id,
            cancellation_token,
        })
    }

    /// Stops the active generation and returns its id.
    ///
    /// Only the generation that was active when the stop was sent is
    /// cancelled; if a newer one took the slot meanwhile it keeps running.
    pub async fn stop_generation(&self) -> Result<SessionId, CoordinatorError> {
        let id = self
            .state
            .lock()
            .await
            .active_id()
            .cloned()
            .ok_or(CoordinatorError::NoActiveSession)?;

        let accepted = self
            .call(self.backend.request_stop())
            .await
            .inspect_err(|e| log::warn!("stop request for {} failed: {}", id, e))?;
        if !accepted {
            return Err(BackendError::Rejected(format!("stop of {} refused", id)).into());
        }

        let stopped = self.state.lock().await.finish(&id, SessionState::Cancelled);
        match stopped {
            Some(generation) => {
                generation.cancellation_token.cancel();
                log::info!("generation {} cancelled", id);
            }
            None => log::debug!("generation {} left the active slot before stop resolved", id),
        }

        Ok(id)
    }

    /// Drops the active generation without telling the backend.
    pub async fn clear(&self) -> Option<SessionId> {
        let cleared = self.state.lock().await.clear()?;
        cleared.cancellation_token.cancel();
        log::info!("generation {} cleared", cleared.id);
        Some(cleared.id)
    }

    /// Routes one chunk. Returns whether the handler saw it.
    pub async fn on_chunk_notification(&self, id: &SessionId, channel: Channel, text: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.matching(id) {
            Some(generation) => {
                generation.handler.on_chunk(channel, text);
                true
            }
            None => {
                log::debug!("dropping stale {} chunk for {}", channel, id);
                false
            }
        }
    }

    /// Completes the active generation if `id` names it. Repeats are no-ops.
    pub async fn on_terminal_notification(&self, id: &SessionId) -> bool {
        let finished = self.state.lock().await.finish(id, SessionState::Completed);
        match finished {
            Some(mut generation) => {
                generation.handler.on_complete();
                generation.cancellation_token.cancel();
                log::info!("generation {} completed", id);
                true
            }
            None => {
                log::debug!("ignoring completion of inactive generation {}", id);
                false
            }
        }
    }

    pub async fn dispatch(&self, notification: Notification) -> bool {
        match notification {
            Notification::Chunk { id, channel, text } => {
                self.on_chunk_notification(&id, channel, &text).await
            }
            Notification::Complete { id } => self.on_terminal_notification(&id).await,
        }
    }

    /// Decodes and routes a raw bus signal. Malformed payloads are logged and
    /// dropped; signals for other members are ignored.
    pub async fn dispatch_signal(&self, signal: RawSignal) -> bool {
        match Notification::decode(signal) {
            Ok(Some(notification)) => self.dispatch(notification).await,
            Ok(None) => false,
            Err(e) => {
                log::warn!("dropping malformed notification: {}", e);
                false
            }
        }
    }

    /// Pumps signals into the coordinator until the stream ends.
    pub async fn run<S>(&self, signals: S)
    where
        S: Stream<Item = RawSignal>,
    {
        futures_util::pin_mut!(signals);
        while let Some(signal) = signals.next().await {
            self.dispatch_signal(signal).await;
        }
        log::info!("notification stream closed");
    }

    pub async fn active_session(&self) -> Option<SessionId> {
        self.state.lock().await.active_id().cloned()
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.state()
    }

    /// The most recent generation that completed or was stopped.
    pub async fn last_finished(&self) -> Option<GenerationSession> {
        self.state.lock().await.last_finished.clone()
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| BackendError::Timeout(limit))?,
            None => request.await,
        }
    }
}
