//! Session - owns one agent and its conversation state

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::Agent;
use crate::cache::FileCache;
use crate::error::{CoreError, Result};
use crate::history::ConversationHistory;
use crate::llm::types::{Message, Role};
use crate::tokens::estimate_messages;
use crate::trace::ToolCallHistory;

use super::storage::{SessionRecord, SessionStats, SessionStatus};

#[derive(Debug, Clone)]
struct SessionMeta {
    name: String,
    mode: String,
    status: SessionStatus,
    description: String,
    tags: Vec<String>,
    metadata: HashMap<String, String>,
    updated_at: DateTime<Utc>,
}

/// One conversation workspace: a session exclusively owns its agent and
/// shares read handles to the history, cache, and trace the agent writes.
///
/// Lifecycle: Active while a run is in flight, Idle on quiescence, Closed
/// on explicit close. Closed sessions reject further runs.
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    meta: RwLock<SessionMeta>,
    history: Arc<ConversationHistory>,
    cache: Arc<FileCache>,
    trace: Arc<ToolCallHistory>,
    agent: tokio::sync::Mutex<Agent>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Serializable snapshot used by export/import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub record: SessionRecord,
    pub messages: Vec<Message>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Uuid,
        name: String,
        mode: String,
        status: SessionStatus,
        created_at: DateTime<Utc>,
        agent: Agent,
        history: Arc<ConversationHistory>,
        cache: Arc<FileCache>,
        trace: Arc<ToolCallHistory>,
    ) -> Self {
        Self {
            id,
            created_at,
            meta: RwLock::new(SessionMeta {
                name,
                mode,
                status,
                description: String::new(),
                tags: Vec::new(),
                metadata: HashMap::new(),
                updated_at: created_at,
            }),
            history,
            cache,
            trace,
            agent: tokio::sync::Mutex::new(agent),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn mode(&self) -> String {
        self.read().mode.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    pub fn description(&self) -> String {
        self.read().description.clone()
    }

    pub fn tags(&self) -> Vec<String> {
        self.read().tags.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.read().updated_at
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    pub fn trace(&self) -> &Arc<ToolCallHistory> {
        &self.trace
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.read().status == SessionStatus::Closed
    }

    /// Drive one agent turn. The session is Active for the duration and
    /// returns to Idle on quiescence.
    pub async fn run(&self, message: &str) -> Result<String> {
        if self.is_closed() {
            return Err(CoreError::SessionClosed {
                id: self.id.to_string(),
            });
        }
        self.set_status(SessionStatus::Active);

        let cancel = self.cancel.child_token();
        let agent = self.agent.lock().await;
        let result = agent.run(message, &cancel).await;
        drop(agent);

        // Only an explicit close may override Closed
        if !self.is_closed() {
            self.set_status(SessionStatus::Idle);
        }
        self.touch();
        result
    }

    /// Cancel in-flight work and reject further runs
    pub fn close(&self) {
        self.cancel.cancel();
        self.set_status(SessionStatus::Closed);
        self.touch();
    }

    pub fn rename(&self, name: impl Into<String>) {
        let mut meta = self.write();
        meta.name = name.into();
        meta.updated_at = Utc::now();
    }

    pub fn set_description(&self, description: impl Into<String>) {
        let mut meta = self.write();
        meta.description = description.into();
        meta.updated_at = Utc::now();
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        let mut meta = self.write();
        if !meta.tags.contains(&tag) {
            meta.tags.push(tag);
            meta.updated_at = Utc::now();
        }
    }

    pub fn remove_tag(&self, tag: &str) {
        let mut meta = self.write();
        meta.tags.retain(|t| t != tag);
        meta.updated_at = Utc::now();
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut meta = self.write();
        meta.metadata.insert(key.into(), value.into());
        meta.updated_at = Utc::now();
    }

    /// Statistics derived from the live history and trace
    pub fn stats(&self) -> SessionStats {
        let snapshot = self.history.snapshot();
        let mut stats = SessionStats {
            message_count: snapshot.len(),
            estimated_tokens: estimate_messages(&snapshot),
            tool_call_count: self.trace.len(),
            last_active_at: Some(self.updated_at()),
            ..SessionStats::default()
        };
        for msg in &snapshot {
            match msg.role {
                Role::User => stats.user_messages += 1,
                Role::Assistant => stats.assistant_messages += 1,
                Role::System => stats.system_messages += 1,
                Role::Tool => stats.tool_messages += 1,
            }
        }
        stats
    }

    /// Persistable snapshot of the session fields
    pub fn record(&self) -> SessionRecord {
        let meta = self.read().clone();
        SessionRecord {
            id: self.id.to_string(),
            name: meta.name,
            mode: meta.mode,
            status: meta.status,
            created_at: self.created_at,
            updated_at: meta.updated_at,
            description: meta.description,
            tags: meta.tags,
            metadata: meta.metadata,
            stats: self.stats(),
        }
    }

    /// Plain-map snapshot of all fields and messages
    pub fn export(&self) -> Result<serde_json::Value> {
        let snapshot = SessionSnapshot {
            record: self.record(),
            messages: self.history.snapshot(),
        };
        Ok(serde_json::to_value(snapshot)?)
    }

    pub(crate) fn restore_meta(&self, record: &SessionRecord) {
        let mut meta = self.write();
        meta.description = record.description.clone();
        meta.tags = record.tags.clone();
        meta.metadata = record.metadata.clone();
        meta.updated_at = record.updated_at;
    }

    fn set_status(&self, status: SessionStatus) {
        self.write().status = status;
    }

    fn touch(&self) {
        self.write().updated_at = Utc::now();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionMeta> {
        self.meta.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionMeta> {
        self.meta.write().unwrap_or_else(|p| p.into_inner())
    }
}
