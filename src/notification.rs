//! Bus signal payloads and their typed form.
//!
//! A transport hands over signals as a member name plus loosely typed
//! arguments. Only the three streaming members are decoded here; anything
//! else on the bus is passed over.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NotificationError;
use crate::session::{Channel, SessionId};

pub const RESPONSE_CHUNK: &str = "ResponseChunk";
pub const THINKING_CHUNK: &str = "ThinkingChunk";
pub const STREAMING_COMPLETE: &str = "StreamingComplete";
pub const HISTORY_CLEARED: &str = "HistoryCleared";
pub const MODEL_CHANGED: &str = "ModelChanged";
pub const REASONING_CHANGED: &str = "ReasoningChanged";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub member: String,
    pub args: Vec<Value>,
}

impl RawSignal {
    pub fn new(member: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            member: member.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Chunk {
        id: SessionId,
        channel: Channel,
        text: String,
    },
    Complete {
        id: SessionId,
    },
}

impl Notification {
    pub fn id(&self) -> &SessionId {
        match self {
            Notification::Chunk { id, .. } | Notification::Complete { id } => id,
        }
    }

    /// Decodes a streaming signal. `Ok(None)` means the member is not one of
    /// ours; `Err` means it is, but the payload is unusable.
    pub fn decode(signal: RawSignal) -> Result<Option<Self>, NotificationError> {
        let channel = match signal.member.as_str() {
            RESPONSE_CHUNK => Some(Channel::Response),
            THINKING_CHUNK => Some(Channel::Reasoning),
            STREAMING_COMPLETE => None,
            _ => return Ok(None),
        };

        let RawSignal { member, args } = signal;
        let expected = if channel.is_some() { 2 } else { 1 };
        if args.len() != expected {
            return Err(NotificationError::Arity {
                member,
                expected,
                found: args.len(),
            });
        }

        let mut strings = Vec::with_capacity(expected);
        for (index, arg) in args.into_iter().enumerate() {
            match arg {
                Value::String(text) => strings.push(text),
                _ => return Err(NotificationError::ArgumentType { member, index }),
            }
        }

        let mut strings = strings.into_iter();
        let id = strings.next().unwrap_or_default();
        if id.is_empty() {
            return Err(NotificationError::EmptyId { member });
        }
        let id = SessionId::from(id);

        Ok(Some(match channel {
            Some(channel) => Notification::Chunk {
                id,
                channel,
                text: strings.next().unwrap_or_default(),
            },
            None => Notification::Complete { id },
        }))
    }

    pub fn into_signal(self) -> RawSignal {
        match self {
            Notification::Chunk { id, channel, text } => {
                let member = match channel {
                    Channel::Response => RESPONSE_CHUNK,
                    Channel::Reasoning => THINKING_CHUNK,
                };
                RawSignal::new(member, vec![Value::from(id.as_str()), Value::from(text)])
            }
            Notification::Complete { id } => {
                RawSignal::new(STREAMING_COMPLETE, vec![Value::from(id.as_str())])
            }
        }
    }
}
