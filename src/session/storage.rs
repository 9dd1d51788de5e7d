//! Session storage seam and an in-memory implementation

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::types::Message;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Closed,
}

/// Derived per-session statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    pub tool_messages: usize,
    pub tool_call_count: usize,
    pub estimated_tokens: usize,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Persistable session snapshot (everything but the live agent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub mode: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub description: String,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub stats: SessionStats,
}

/// Storage adapter for sessions and their message logs.
///
/// Concrete backends (SQLite, files) live outside the core.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, record: &SessionRecord) -> Result<()>;
    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>>;
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;
    async fn delete_session(&self, id: &str) -> Result<()>;
    async fn save_messages(&self, id: &str, messages: &[Message]) -> Result<()>;
    async fn load_messages(&self, id: &str) -> Result<Vec<Message>>;
    /// Case-insensitive match over name, description, and tags
    async fn search_sessions(&self, query: &str) -> Result<Vec<SessionRecord>>;
}

/// In-memory store for development and tests
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, record: &SessionRecord) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> = self
            .records
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
        self.messages
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
        Ok(())
    }

    async fn save_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        self.messages
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn load_messages(&self, id: &str) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_sessions(&self, query: &str) -> Result<Vec<SessionRecord>> {
        let needle = query.to_lowercase();
        let mut matches: Vec<SessionRecord> = self
            .records
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle)
                    || r.description.to_lowercase().contains(&needle)
                    || r.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matches)
    }
}
