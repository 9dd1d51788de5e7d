//! Session manager - lifecycle for concurrent sessions plus auto-save

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::Agent;
use crate::bus::{types as event_types, EventBus};
use crate::cache::FileCache;
use crate::config::SessionSettings;
use crate::error::{CoreError, Result};
use crate::history::ConversationHistory;
use crate::trace::ToolCallHistory;

use super::session::{Session, SessionSnapshot};
use super::storage::{SessionRecord, SessionStatus, SessionStore};

/// Shared handles the factory wires into the agent it builds
pub struct SessionHandle {
    pub session_id: Uuid,
    pub history: Arc<ConversationHistory>,
    pub cache: Arc<FileCache>,
    pub trace: Arc<ToolCallHistory>,
}

/// Builds the agent owned by a new session; injected by the embedder.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, handle: &SessionHandle) -> Result<Agent>;
}

struct AutosaveTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the live session map and the current-session pointer.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    current: RwLock<Option<Uuid>>,
    storage: Arc<dyn SessionStore>,
    factory: Arc<dyn AgentFactory>,
    settings: SessionSettings,
    bus: Option<Arc<EventBus>>,
    autosave: Mutex<Option<AutosaveTask>>,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn SessionStore>,
        factory: Arc<dyn AgentFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            storage,
            factory,
            settings,
            bus: None,
            autosave: Mutex::new(None),
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    // ── lifecycle ──────────────────────────────────────────────────────

    /// Create a session: cap check, agent factory, initial save.
    pub async fn create(&self, name: &str, mode: &str) -> Result<Arc<Session>> {
        if self.len() >= self.settings.max_sessions {
            return Err(CoreError::SessionLimit {
                max: self.settings.max_sessions,
            });
        }

        let id = Uuid::new_v4();
        let history = Arc::new(ConversationHistory::new());
        let cache = Arc::new(FileCache::new());
        let trace = Arc::new(ToolCallHistory::new());
        let handle = SessionHandle {
            session_id: id,
            history: Arc::clone(&history),
            cache: Arc::clone(&cache),
            trace: Arc::clone(&trace),
        };
        let agent = self.factory.build(&handle).await?;

        let session = Arc::new(Session::new(
            id,
            name.to_string(),
            mode.to_string(),
            SessionStatus::Active,
            Utc::now(),
            agent,
            history,
            cache,
            trace,
        ));

        self.storage.save_session(&session.record()).await?;
        self.insert(Arc::clone(&session));
        self.publish(event_types::SESSION_CREATED, &session);
        tracing::info!(id = %id, name, "session created");
        Ok(session)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.read_sessions().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self.read_sessions().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        sessions
    }

    pub fn len(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_sessions().is_empty()
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        let id = (*self.current.read().unwrap_or_else(|p| p.into_inner()))?;
        self.get(id)
    }

    /// Close a session: cancel, persist, remove from the live map.
    pub async fn close(&self, id: Uuid) -> Result<()> {
        let session = self.get(id).ok_or_else(|| CoreError::SessionNotFound {
            id: id.to_string(),
        })?;

        session.close();
        self.storage.save_session(&session.record()).await?;
        self.storage
            .save_messages(&id.to_string(), &session.history().snapshot())
            .await?;

        self.write_sessions().remove(&id);
        {
            let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
            if *current == Some(id) {
                *current = None;
            }
        }
        self.publish(event_types::SESSION_CLOSED, &session);
        tracing::info!(id = %id, "session closed");
        Ok(())
    }

    /// Make a session current. The target must be alive (Active or Idle);
    /// Closed sessions are rejected.
    pub fn switch(&self, id: Uuid) -> Result<()> {
        let session = self.get(id).ok_or_else(|| CoreError::SessionNotFound {
            id: id.to_string(),
        })?;
        if session.is_closed() {
            return Err(CoreError::SessionClosed {
                id: id.to_string(),
            });
        }
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(id);
        self.publish(event_types::SESSION_SWITCHED, &session);
        Ok(())
    }

    // ── metadata ───────────────────────────────────────────────────────

    pub async fn rename(&self, id: Uuid, name: &str) -> Result<()> {
        self.mutate(id, |s| s.rename(name)).await
    }

    pub async fn set_description(&self, id: Uuid, description: &str) -> Result<()> {
        self.mutate(id, |s| s.set_description(description)).await
    }

    pub async fn add_tag(&self, id: Uuid, tag: &str) -> Result<()> {
        self.mutate(id, |s| s.add_tag(tag)).await
    }

    pub async fn remove_tag(&self, id: Uuid, tag: &str) -> Result<()> {
        self.mutate(id, |s| s.remove_tag(tag)).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SessionRecord>> {
        self.storage.search_sessions(query).await
    }

    // ── export / import ────────────────────────────────────────────────

    pub fn export(&self, id: Uuid) -> Result<serde_json::Value> {
        let session = self.get(id).ok_or_else(|| CoreError::SessionNotFound {
            id: id.to_string(),
        })?;
        session.export()
    }

    /// Reconstruct a session from an exported snapshot. Duplicate ids are
    /// rejected.
    pub async fn import(&self, snapshot: serde_json::Value) -> Result<Arc<Session>> {
        let snapshot: SessionSnapshot = serde_json::from_value(snapshot)?;
        let id = Uuid::parse_str(&snapshot.record.id)
            .map_err(|e| CoreError::Storage(format!("invalid session id: {}", e)))?;

        if self.get(id).is_some() {
            return Err(CoreError::DuplicateSession { id: id.to_string() });
        }
        if self.len() >= self.settings.max_sessions {
            return Err(CoreError::SessionLimit {
                max: self.settings.max_sessions,
            });
        }

        let history = Arc::new(ConversationHistory::new());
        history.replace(snapshot.messages);
        let cache = Arc::new(FileCache::new());
        let trace = Arc::new(ToolCallHistory::new());
        let handle = SessionHandle {
            session_id: id,
            history: Arc::clone(&history),
            cache: Arc::clone(&cache),
            trace: Arc::clone(&trace),
        };
        let agent = self.factory.build(&handle).await?;

        let session = Arc::new(Session::new(
            id,
            snapshot.record.name.clone(),
            snapshot.record.mode.clone(),
            snapshot.record.status,
            snapshot.record.created_at,
            agent,
            history,
            cache,
            trace,
        ));
        session.restore_meta(&snapshot.record);

        self.storage.save_session(&session.record()).await?;
        self.insert(Arc::clone(&session));
        Ok(session)
    }

    // ── auto-save ──────────────────────────────────────────────────────

    /// Start the background auto-save task. Per-session failures are
    /// logged and tolerated; the task stops when cancelled or when the
    /// manager is dropped.
    pub fn start_autosave(manager: &Arc<SessionManager>) {
        let weak = Arc::downgrade(manager);
        let interval = manager.settings.autosave_interval();
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        manager.save_all().await;
                    }
                }
            }
            tracing::debug!("auto-save task stopped");
        });

        let previous = manager
            .autosave
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(AutosaveTask { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    pub async fn stop_autosave(&self) {
        let task = self
            .autosave
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(task) = task {
            task.token.cancel();
            let _ = task.handle.await;
        }
    }

    /// Persist every live session, tolerating per-session failures.
    pub async fn save_all(&self) {
        for session in self.list() {
            let id = session.id().to_string();
            if let Err(e) = self.storage.save_session(&session.record()).await {
                tracing::warn!(id = %id, error = %e, "auto-save of session record failed");
                continue;
            }
            if let Err(e) = self
                .storage
                .save_messages(&id, &session.history().snapshot())
                .await
            {
                tracing::warn!(id = %id, error = %e, "auto-save of messages failed");
            }
        }
    }

    /// Stop auto-save and close every live session.
    pub async fn shutdown(&self) {
        self.stop_autosave().await;
        let ids: Vec<Uuid> = self.read_sessions().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.close(id).await {
                tracing::warn!(id = %id, error = %e, "session close during shutdown failed");
            }
        }
    }

    // ── internals ──────────────────────────────────────────────────────

    async fn mutate(&self, id: Uuid, apply: impl FnOnce(&Session)) -> Result<()> {
        let session = self.get(id).ok_or_else(|| CoreError::SessionNotFound {
            id: id.to_string(),
        })?;
        apply(&session);
        self.storage.save_session(&session.record()).await
    }

    fn insert(&self, session: Arc<Session>) {
        let id = session.id();
        self.write_sessions().insert(id, session);
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        if current.is_none() {
            *current = Some(id);
        }
    }

    fn publish(&self, event_type: &str, session: &Session) {
        if let Some(bus) = &self.bus {
            let data = HashMap::from([
                ("session_id".to_string(), json!(session.id().to_string())),
                ("name".to_string(), json!(session.name())),
            ]);
            if let Err(e) = bus.publish(event_type, data) {
                tracing::debug!(event_type, error = %e, "session event dropped");
            }
        }
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(|p| p.into_inner())
    }
}
