// Conversation history the service feeds back to the model as context

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One finished prompt/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            reasoning: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning.filter(|text| !text.is_empty());
        self
    }
}

#[async_trait]
pub trait History: Send + Sync {
    /// The newest `limit` exchanges, oldest first.
    async fn recent(&self, limit: usize) -> Vec<Exchange>;

    async fn record(&self, exchange: Exchange);

    async fn clear(&self);
}

/// Bounded history kept in memory; the oldest exchange is dropped first.
pub struct InMemoryHistory {
    capacity: usize,
    exchanges: Mutex<VecDeque<Exchange>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            exchanges: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.exchanges.lock().await.len()
    }
}

#[async_trait]
impl History for InMemoryHistory {
    async fn recent(&self, limit: usize) -> Vec<Exchange> {
        let exchanges = self.exchanges.lock().await;
        let skip = exchanges.len().saturating_sub(limit);
        exchanges.iter().skip(skip).cloned().collect()
    }

    async fn record(&self, exchange: Exchange) {
        if self.capacity == 0 {
            return;
        }

        let mut exchanges = self.exchanges.lock().await;
        while exchanges.len() >= self.capacity {
            exchanges.pop_front();
        }
        exchanges.push_back(exchange);
    }

    async fn clear(&self) {
        self.exchanges.lock().await.clear();
    }
}
