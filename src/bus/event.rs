//! Event type - string-typed domain events with priority and metadata

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Priority carried on the event.
///
/// The queue itself is a single FIFO; priority affects handler ordering and
/// logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A domain event.
///
/// Event types are dotted lowercase identifiers (`category.action`); the
/// default vocabulary lives in [`types`].
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, Value>,
    pub priority: EventPriority,
    pub metadata: Option<HashMap<String, String>>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
            priority: EventPriority::Normal,
            metadata: None,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// String view of a data field, if present and a string
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key).map(|s| s.as_str())
    }
}

/// Validate the `category.action` grammar: dotted lowercase identifiers.
pub fn is_valid_event_type(event_type: &str) -> bool {
    let mut parts = event_type.split('.');
    let (Some(category), Some(action), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let well_formed = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    well_formed(category) && well_formed(action)
}

/// Default event vocabulary
pub mod types {
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_CLOSED: &str = "session.closed";
    pub const SESSION_SWITCHED: &str = "session.switched";

    pub const MESSAGE_ADDED: &str = "message.added";

    pub const AGENT_STARTED: &str = "agent.started";
    pub const AGENT_COMPLETED: &str = "agent.completed";
    pub const AGENT_ERROR: &str = "agent.error";

    pub const TOOL_START: &str = "tool.start";
    pub const TOOL_OUTPUT: &str = "tool.output";
    pub const TOOL_COMPLETE: &str = "tool.complete";
    pub const TOOL_ERROR: &str = "tool.error";

    pub const LLM_REQUEST_START: &str = "llm.request_start";
    pub const LLM_REQUEST_COMPLETE: &str = "llm.request_complete";
    pub const LLM_TOKEN_START: &str = "llm.token_start";
    pub const LLM_TOKEN_DELTA: &str = "llm.token_delta";
    pub const LLM_TOKEN_COMPLETE: &str = "llm.token_complete";
    pub const LLM_ERROR: &str = "llm.error";

    pub const UI_STATUS: &str = "ui.status";
}
