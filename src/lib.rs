//! Client and in-process service for streaming assistant replies over a
//! message bus.
//!
//! The [`Coordinator`] sits on the client side of the bus: it starts and
//! stops generations through a [`GenerationBackend`] and routes the chunk
//! signals that come back to whichever handler belongs to the active
//! generation. [`StreamingService`] is the other end, running generations
//! against a [`ChatModel`] and publishing their output as signals.

pub mod backend;
pub mod config;
pub mod constant;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod history;
pub mod notification;
pub mod reasoning;
pub mod service;
pub mod session;

pub use backend::GenerationBackend;
pub use crate::config::HenzaiConfig;
pub use coordinator::{Coordinator, GenerationHandle};
pub use error::{BackendError, CoordinatorError, ModelError, NotificationError, ServiceError};
pub use handler::{Handlers, StreamEvent, StreamHandler};
pub use history::{Exchange, History, InMemoryHistory};
pub use notification::{Notification, RawSignal};
pub use service::{ChatModel, ModelEvent, ModelStream, ServiceStatus, StreamingService};
pub use session::{Channel, GenerationSession, SessionId, SessionState};
