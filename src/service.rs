// Runs generations against the local model and publishes them as bus signals

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::backend::GenerationBackend;
use crate::config::ServiceConfig;
use crate::constant::GENERATION_ID_PREFIX;
use crate::error::{BackendError, ModelError, ServiceError};
use crate::history::{Exchange, History, InMemoryHistory};
use crate::notification::{
    Notification, RawSignal, HISTORY_CLEARED, MODEL_CHANGED, REASONING_CHANGED,
};
use crate::reasoning::{split_reasoning, ThinkSplitter};
use crate::session::{Channel, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    Response(String),
    Reasoning(String),
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, ModelError>>;

/// The inference server as seen by the service.
#[async_trait]
pub trait ChatModel: Send + Sync + 'static {
    async fn stream_chat(
        &self,
        prompt: &str,
        context: &[Exchange],
    ) -> Result<ModelStream, ModelError>;

    /// Aborts any request in flight. Streams already handed out may still end
    /// on their own.
    async fn stop(&self) {}

    async fn current_model(&self) -> String;

    async fn set_model(&self, model_id: &str) -> Result<(), ModelError> {
        Err(ModelError::Unsupported(format!("switching to {}", model_id)))
    }

    async fn supports_reasoning(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Ready,
    Thinking,
    Error,
}

struct CurrentGeneration {
    id: SessionId,
    cancellation_token: CancellationToken,
}

enum Outcome {
    Finished,
    Stopped,
    Failed(ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReasoningSource {
    Model,
    Inline,
}

#[derive(Default)]
struct Transcript {
    response: String,
    reasoning: String,
    last_reasoning: Option<ReasoningSource>,
}

impl Transcript {
    fn push_response(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.response.push_str(text);
        self.last_reasoning = None;
    }

    // Consecutive chunks from one source form a block; blocks go on separate lines.
    fn push_reasoning(&mut self, text: &str, source: ReasoningSource) {
        if text.is_empty() {
            return;
        }
        if self.last_reasoning != Some(source) && !self.reasoning.is_empty() {
            self.reasoning.push('\n');
        }
        self.reasoning.push_str(text);
        self.last_reasoning = Some(source);
    }

    fn into_exchange(mut self, prompt: impl Into<String>, keep_reasoning: bool) -> Exchange {
        let (inline, answer) = split_reasoning(&self.response);
        if let Some(inline) = inline.filter(|_| keep_reasoning) {
            self.last_reasoning = None;
            self.push_reasoning(&inline, ReasoningSource::Inline);
        }
        Exchange::new(prompt, answer).with_reasoning(Some(self.reasoning))
    }
}

// Per-generation bookkeeping for the streaming task.
struct Run {
    id: SessionId,
    cancellation_token: CancellationToken,
    reasoning_enabled: bool,
    transcript: Transcript,
}

struct Inner<M, H> {
    model: M,
    history: H,
    config: ServiceConfig,
    signals: broadcast::Sender<RawSignal>,
    current: Mutex<Option<CurrentGeneration>>,
    status: Mutex<ServiceStatus>,
    reasoning_enabled: AtomicBool,
    last_id_micros: AtomicI64,
}

/// In-process generation service. Each started generation streams on its own
/// task; only the most recent one may publish chunks.
pub struct StreamingService<M, H = InMemoryHistory> {
    inner: Arc<Inner<M, H>>,
}

impl<M, H> Clone for StreamingService<M, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ChatModel> StreamingService<M, InMemoryHistory> {
    pub fn with_memory(model: M, config: ServiceConfig) -> Self {
        let history = InMemoryHistory::new(config.history_capacity);
        Self::new(model, history, config)
    }
}

impl<M: ChatModel, H: History + 'static> StreamingService<M, H> {
    pub fn new(model: M, history: H, config: ServiceConfig) -> Self {
        let (signals, _) = broadcast::channel(config.signal_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                model,
                history,
                reasoning_enabled: AtomicBool::new(config.reasoning_enabled),
                config,
                signals,
                current: Mutex::new(None),
                status: Mutex::new(ServiceStatus::Ready),
                last_id_micros: AtomicI64::new(0),
            }),
        }
    }

    pub fn history(&self) -> &H {
        &self.inner.history
    }

    pub fn model(&self) -> &M {
        &self.inner.model
    }

    /// Every signal emitted from now on. A subscriber that falls behind loses
    /// the oldest signals and keeps going.
    pub fn subscribe(&self) -> impl Stream<Item = RawSignal> + Send + 'static {
        BroadcastStream::new(self.inner.signals.subscribe()).filter_map(|item| async move {
            match item {
                Ok(signal) => Some(signal),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    log::warn!("signal subscriber lagged, {} signals lost", missed);
                    None
                }
            }
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        *self.inner.status.lock().await
    }

    pub async fn current_generation(&self) -> Option<SessionId> {
        self.inner
            .current
            .lock()
            .await
            .as_ref()
            .map(|current| current.id.clone())
    }

    /// Answers `message` in one piece without publishing any chunk signals.
    /// The exchange is recorded like a streamed one.
    pub async fn send_message(&self, message: &str) -> Result<String, ServiceError> {
        if message.trim().is_empty() {
            return Err(ServiceError::EmptyMessage);
        }

        log::info!("received message ({} chars)", message.len());
        self.inner.set_idle_status(ServiceStatus::Thinking).await;

        match self.inner.complete(message).await {
            Ok(answer) => {
                self.inner.set_idle_status(ServiceStatus::Ready).await;
                log::info!("response generated ({} chars)", answer.len());
                Ok(answer)
            }
            Err(e) => {
                log::error!("error processing message: {}", e);
                self.inner.set_idle_status(ServiceStatus::Error).await;
                Err(e.into())
            }
        }
    }

    /// Starts streaming a reply and returns its generation id right away;
    /// the reply itself arrives as signals tagged with that id.
    pub async fn send_message_streaming(&self, message: &str) -> Result<SessionId, ServiceError> {
        if message.trim().is_empty() {
            return Err(ServiceError::EmptyMessage);
        }

        let id = self.next_generation_id();
        let cancellation_token = CancellationToken::new();

        {
            let mut current = self.inner.current.lock().await;
            let replaced = current.replace(CurrentGeneration {
                id: id.clone(),
                cancellation_token: cancellation_token.clone(),
            });
            if let Some(previous) = replaced {
                log::info!("generation {} superseded by {}", previous.id, id);
                previous.cancellation_token.cancel();
            }
            *self.inner.status.lock().await = ServiceStatus::Thinking;
        }

        log::info!("starting generation: {}", id);
        let run = Run {
            id: id.clone(),
            cancellation_token,
            reasoning_enabled: self.reasoning_enabled(),
            transcript: Transcript::default(),
        };
        let inner = self.inner.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            inner.run_generation(run, message).await;
        });

        Ok(id)
    }

    /// Stops the current generation. Always reports success, even when
    /// nothing was running.
    pub async fn stop_generation(&self) -> bool {
        log::info!("stop generation requested");

        {
            let mut current = self.inner.current.lock().await;
            if let Some(stopped) = current.take() {
                stopped.cancellation_token.cancel();
            }
            *self.inner.status.lock().await = ServiceStatus::Ready;
        }
        self.inner.model.stop().await;

        true
    }

    pub async fn clear_history(&self) {
        self.inner.forget().await;
        log::info!("conversation history cleared");
    }

    /// Starts over with an empty context. Running generations are left alone.
    pub async fn new_conversation(&self) {
        self.inner.forget().await;
        log::info!("started new conversation");
    }

    pub fn reasoning_enabled(&self) -> bool {
        self.inner.reasoning_enabled.load(Ordering::Relaxed)
    }

    /// Turns the reasoning channel on or off for generations started after
    /// this call.
    pub fn set_reasoning_enabled(&self, enabled: bool) {
        self.inner.reasoning_enabled.store(enabled, Ordering::Relaxed);
        log::info!("reasoning {}", if enabled { "enabled" } else { "disabled" });
        self.inner.announce_reasoning(enabled);
    }

    pub async fn supports_reasoning(&self) -> bool {
        self.inner.model.supports_reasoning().await
    }

    pub async fn current_model(&self) -> String {
        self.inner.model.current_model().await
    }

    /// Switches the model. Reasoning follows what the new model supports.
    pub async fn set_model(&self, model_id: &str) -> Result<(), ServiceError> {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return Err(ServiceError::EmptyModel);
        }

        let previous = self.inner.model.current_model().await;
        self.inner
            .model
            .set_model(model_id)
            .await
            .inspect_err(|e| log::error!("error setting model {}: {}", model_id, e))?;
        log::info!("model changed: {} -> {}", previous, model_id);

        let supported = self.inner.model.supports_reasoning().await;
        if self.inner.reasoning_enabled.swap(supported, Ordering::Relaxed) != supported {
            self.inner.announce_reasoning(supported);
        }
        self.inner
            .emit(RawSignal::new(MODEL_CHANGED, vec![Value::from(model_id)]));

        Ok(())
    }

    fn next_generation_id(&self) -> SessionId {
        let now = Utc::now().timestamp_micros();
        let previous = self
            .inner
            .last_id_micros
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);

        SessionId::new(format!("{}{}", GENERATION_ID_PREFIX, now.max(previous + 1)))
    }
}

impl<M: ChatModel, H: History> Inner<M, H> {
    async fn run_generation(&self, mut run: Run, prompt: String) {
        let context = self.history.recent(self.config.context_limit).await;
        log::debug!("generation {}: {} exchanges of context", run.id, context.len());

        let mut splitter = self.config.split_inline_reasoning.then(ThinkSplitter::new);
        let cancellation_token = run.cancellation_token.clone();

        let outcome = match self.model.stream_chat(&prompt, &context).await {
            Ok(mut stream) => loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break Outcome::Stopped,
                    event = stream.next() => match event {
                        Some(Ok(ModelEvent::Response(text))) => match splitter.as_mut() {
                            Some(splitter) => {
                                for (channel, part) in splitter.push(&text) {
                                    self.publish(&mut run, channel, part, ReasoningSource::Inline);
                                }
                            }
                            None => self.publish(&mut run, Channel::Response, text, ReasoningSource::Inline),
                        },
                        Some(Ok(ModelEvent::Reasoning(text))) => {
                            self.publish(&mut run, Channel::Reasoning, text, ReasoningSource::Model);
                        }
                        Some(Err(e)) => break Outcome::Failed(e),
                        None => break Outcome::Finished,
                    },
                }
            },
            Err(e) => Outcome::Failed(e),
        };

        if let Outcome::Finished = outcome {
            if let Some((channel, part)) = splitter.as_mut().and_then(ThinkSplitter::finish) {
                self.publish(&mut run, channel, part, ReasoningSource::Inline);
            }
        }

        let Run {
            id,
            reasoning_enabled,
            transcript,
            ..
        } = run;

        match outcome {
            Outcome::Finished => {
                let exchange = transcript.into_exchange(prompt, reasoning_enabled);
                log::info!("generation {} completed ({} chars)", id, exchange.response.len());
                self.history.record(exchange).await;

                self.release(&id, ServiceStatus::Ready).await;
                self.emit(Notification::Complete { id }.into_signal());
            }
            Outcome::Stopped => {
                log::info!("generation stopped or superseded: {}", id);
                self.release(&id, ServiceStatus::Ready).await;
                self.emit(Notification::Complete { id }.into_signal());
            }
            Outcome::Failed(e) => {
                log::error!("error in streaming response for {}: {}", id, e);
                self.emit(
                    Notification::Chunk {
                        id: id.clone(),
                        channel: Channel::Response,
                        text: format!("\n\n❌ Error: {}", e),
                    }
                    .into_signal(),
                );
                self.release(&id, ServiceStatus::Error).await;
                self.emit(Notification::Complete { id }.into_signal());
            }
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let context = self.history.recent(self.config.context_limit).await;
        let reasoning_enabled = self.reasoning_enabled.load(Ordering::Relaxed);

        let mut stream = self.model.stream_chat(prompt, &context).await?;
        let mut transcript = Transcript::default();
        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::Response(text) => transcript.push_response(&text),
                ModelEvent::Reasoning(text) if reasoning_enabled => {
                    transcript.push_reasoning(&text, ReasoningSource::Model)
                }
                ModelEvent::Reasoning(_) => {}
            }
        }

        let exchange = transcript.into_exchange(prompt, reasoning_enabled);
        let answer = exchange.response.clone();
        self.history.record(exchange).await;
        Ok(answer)
    }

    // Clears the current slot and settles the status, if the slot still
    // belongs to `id`. Status is only ever written under the `current` lock.
    async fn release(&self, id: &SessionId, status: ServiceStatus) -> bool {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|current| &current.id == id) {
            *current = None;
            *self.status.lock().await = status;
            true
        } else {
            false
        }
    }

    // A running streaming generation owns the status; leave it alone then.
    async fn set_idle_status(&self, status: ServiceStatus) {
        let current = self.current.lock().await;
        if current.is_none() {
            *self.status.lock().await = status;
        }
    }

    async fn forget(&self) {
        self.history.clear().await;
        self.emit(RawSignal::new(HISTORY_CLEARED, Vec::new()));
    }

    fn announce_reasoning(&self, enabled: bool) {
        self.emit(RawSignal::new(REASONING_CHANGED, vec![Value::from(enabled)]));
    }

    fn publish(&self, run: &mut Run, channel: Channel, text: String, source: ReasoningSource) {
        if run.cancellation_token.is_cancelled() {
            log::debug!("skipping {} chunk for stopped generation {}", channel, run.id);
            return;
        }

        match channel {
            Channel::Response => run.transcript.push_response(&text),
            Channel::Reasoning if run.reasoning_enabled => {
                run.transcript.push_reasoning(&text, source)
            }
            Channel::Reasoning => {
                log::debug!("reasoning disabled, dropping chunk for {}", run.id);
                return;
            }
        }
        self.emit(
            Notification::Chunk {
                id: run.id.clone(),
                channel,
                text,
            }
            .into_signal(),
        );
    }

    fn emit(&self, signal: RawSignal) {
        if self.signals.send(signal).is_err() {
            log::debug!("no signal subscribers");
        }
    }
}

#[async_trait]
impl<M: ChatModel, H: History + 'static> GenerationBackend for StreamingService<M, H> {
    async fn request_start(&self, prompt: &str) -> Result<SessionId, BackendError> {
        self.send_message_streaming(prompt)
            .await
            .map_err(|e| BackendError::Rejected(e.to_string()))
    }

    async fn request_stop(&self) -> Result<bool, BackendError> {
        Ok(self.stop_generation().await)
    }
}
