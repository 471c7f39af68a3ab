// Consumer callbacks for a running generation

use tokio::sync::mpsc::UnboundedSender;

use crate::session::Channel;

/// Receives the chunks of the currently active generation.
///
/// Calls happen synchronously while the coordinator routes a notification, so
/// implementations should hand work off rather than block.
pub trait StreamHandler: Send {
    fn on_chunk(&mut self, channel: Channel, text: &str);

    fn on_complete(&mut self) {}
}

type TextCallback = Box<dyn FnMut(&str) + Send>;
type DoneCallback = Box<dyn FnMut() + Send>;

/// Closure-based handler: one callback per channel plus an optional
/// completion callback. Unset callbacks silently discard.
#[derive(Default)]
pub struct Handlers {
    on_response: Option<TextCallback>,
    on_reasoning: Option<TextCallback>,
    on_complete: Option<DoneCallback>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_response_chunk(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_response = Some(Box::new(callback));
        self
    }

    pub fn on_reasoning_chunk(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_reasoning = Some(Box::new(callback));
        self
    }

    pub fn on_done(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl StreamHandler for Handlers {
    fn on_chunk(&mut self, channel: Channel, text: &str) {
        let callback = match channel {
            Channel::Response => self.on_response.as_mut(),
            Channel::Reasoning => self.on_reasoning.as_mut(),
        };

        if let Some(callback) = callback {
            callback(text);
        }
    }

    fn on_complete(&mut self) {
        if let Some(callback) = self.on_complete.as_mut() {
            callback();
        }
    }
}

/// What a channel-based consumer sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk { channel: Channel, text: String },
    Complete,
}

impl StreamHandler for UnboundedSender<StreamEvent> {
    fn on_chunk(&mut self, channel: Channel, text: &str) {
        // receiver gone means the consumer stopped listening
        let _ = self.send(StreamEvent::Chunk {
            channel,
            text: text.to_string(),
        });
    }

    fn on_complete(&mut self) {
        let _ = self.send(StreamEvent::Complete);
    }
}
