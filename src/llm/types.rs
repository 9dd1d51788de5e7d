//! Provider-agnostic conversation and streaming types

use serde::{Deserialize, Serialize};

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A message in the conversation.
///
/// `tool_calls` is populated only on assistant messages; `tool_call_id`
/// back-references the originating call on tool messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the LLM.
///
/// Built incrementally during streaming: deltas sharing an id concatenate
/// their argument fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider
    pub id: String,
    /// Tool name
    pub name: String,
    /// JSON argument string
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One event from the provider's response stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text content delta
    Content(String),
    /// Tool-call fragment; a new id opens a new call, a repeated id
    /// appends to the in-progress argument string
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments: String,
    },
    /// Informational mid-stream error; the stream may still complete
    Error(String),
    /// Generation finished
    Done,
}

/// Request handed to the LLM provider
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// LLM-specific errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Failed to open stream: {message}")]
    StreamOpen { message: String },

    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u32 },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Provider error: {status} - {message}")]
    ProviderError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Stream interrupted")]
    StreamInterrupted,

    #[error("Parse error: {message}")]
    ParseError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::tool("call-1", r#"{"result":"ok"}"#);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_message_serde_roundtrip() {
        let msg = Message::assistant(
            "thinking",
            vec![ToolCall::new("c1", "read_file", r#"{"path":"a.rs"}"#)],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].name, "read_file");
    }

    #[test]
    fn test_plain_message_omits_tool_fields() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn test_default_request_is_empty() {
        let request = LlmRequest::default();
        assert!(request.messages.is_empty());
        assert!(request.max_tokens.is_none());
        assert!(request.temperature.is_none());
    }
}
