use std::time::Duration;

use thiserror::Error;

/// Failures talking to the generation service.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("prompt must not be empty")]
    InvalidPrompt,

    #[error("connection error: {0}")]
    Connection(#[from] BackendError),

    #[error("no active generation")]
    NoActiveSession,
}

/// A bus signal whose payload does not have the expected shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("{member}: expected {expected} arguments, got {found}")]
    Arity {
        member: String,
        expected: usize,
        found: usize,
    },

    #[error("{member}: argument {index} is not a string")]
    ArgumentType { member: String, index: usize },

    #[error("{member}: empty generation id")]
    EmptyId { member: String },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("inference server unavailable: {0}")]
    Unavailable(String),

    #[error("generation failed: {0}")]
    Failed(String),

    #[error("not supported by this model: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("model id must not be empty")]
    EmptyModel,

    #[error(transparent)]
    Model(#[from] ModelError),
}
