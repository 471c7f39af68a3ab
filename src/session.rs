// Generation sessions and the single active slot they occupy

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::handler::StreamHandler;

/// Opaque generation identifier issued by the backend service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which stream a chunk of generated text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Response,
    Reasoning,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Response => "response",
            Channel::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSession {
    pub id: SessionId,
    pub state: SessionState,
}

pub(crate) struct ActiveGeneration {
    pub id: SessionId,
    pub handler: Box<dyn StreamHandler>,
    pub cancellation_token: CancellationToken,
}

/// The coordinator's one mutable slot. Completed and cancelled sessions fold
/// straight back to idle; only a record of the last one is kept.
#[derive(Default)]
pub(crate) struct GenerationState {
    pub active: Option<ActiveGeneration>,
    pub last_finished: Option<GenerationSession>,
}

impl GenerationState {
    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    pub fn active_id(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|generation| &generation.id)
    }

    /// Installs a new active generation and hands back whatever it replaced.
    pub fn activate(&mut self, generation: ActiveGeneration) -> Option<ActiveGeneration> {
        self.active.replace(generation)
    }

    /// Borrows the active generation only if its id matches.
    pub fn matching(&mut self, id: &SessionId) -> Option<&mut ActiveGeneration> {
        self.active.as_mut().filter(|generation| &generation.id == id)
    }

    /// Removes the active generation if `id` matches and records the outcome.
    pub fn finish(&mut self, id: &SessionId, outcome: SessionState) -> Option<ActiveGeneration> {
        if self.active_id() != Some(id) {
            return None;
        }

        let generation = self.active.take()?;
        self.last_finished = Some(GenerationSession {
            id: generation.id.clone(),
            state: outcome,
        });
        Some(generation)
    }

    pub fn clear(&mut self) -> Option<ActiveGeneration> {
        self.active.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handlers;

    fn generation(id: &str) -> ActiveGeneration {
        ActiveGeneration {
            id: SessionId::from(id),
            handler: Box::new(Handlers::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    #[test]
    fn starts_idle() {
        let state = GenerationState::default();
        assert_eq!(state.state(), SessionState::Idle);
        assert!(state.active_id().is_none());
        assert!(state.last_finished.is_none());
    }

    #[test]
    fn activate_returns_the_replaced_generation() {
        let mut state = GenerationState::default();
        assert!(state.activate(generation("gen_1")).is_none());

        let replaced = state.activate(generation("gen_2")).unwrap();
        assert_eq!(replaced.id.as_str(), "gen_1");
        assert_eq!(state.active_id().unwrap().as_str(), "gen_2");
        assert!(state.last_finished.is_none());
    }

    #[test]
    fn finish_ignores_other_ids() {
        let mut state = GenerationState::default();
        state.activate(generation("gen_1"));

        assert!(state.finish(&SessionId::from("gen_0"), SessionState::Completed).is_none());
        assert_eq!(state.state(), SessionState::Active);

        assert!(state.finish(&SessionId::from("gen_1"), SessionState::Cancelled).is_some());
        assert_eq!(state.state(), SessionState::Idle);
        assert_eq!(
            state.last_finished,
            Some(GenerationSession {
                id: SessionId::from("gen_1"),
                state: SessionState::Cancelled,
            })
        );
    }

    #[test]
    fn channel_names() {
        assert_eq!(Channel::Response.to_string(), "response");
        assert_eq!(Channel::Reasoning.as_str(), "reasoning");
        assert_eq!(serde_json::to_string(&Channel::Reasoning).unwrap(), "\"reasoning\"");
    }
}
