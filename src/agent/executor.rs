//! Tool executor seam and the tool-message JSON contract

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::types::ToolCall;

/// Canonical tool names the loop treats specially
pub const READ_FILE_TOOL: &str = "read_file";
pub const WRITE_FILE_TOOL: &str = "write_file";

/// Recorded as the tool output when the user declines a confirmation
pub const REJECTION_MESSAGE: &str = "User rejected the operation";

/// Error during tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    Unknown { name: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation denied by policy: {message}")]
    Denied { message: String },

    #[error("Execution failed: {message}")]
    Failed { message: String },

    #[error("Execution cancelled")]
    Cancelled,
}

/// External executor for concrete tools.
///
/// The result string is either pre-formatted JSON or an arbitrary string
/// the loop wraps per the tool-message contract. Implementations honour the
/// cancellation token but impose no wall-clock bound of their own.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, cancel: &CancellationToken)
        -> Result<String, ToolError>;
}

// ── tool-message JSON contract ─────────────────────────────────────────

/// Success wrapping: raw JSON passes through; anything else becomes
/// `{"result": <string>}`.
pub fn wrap_success(raw: &str) -> String {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        raw.to_string()
    } else {
        serde_json::json!({ "result": raw }).to_string()
    }
}

/// Error wrapping: `{"error": <message>}`
pub fn wrap_error(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Rejection wrapping for declined confirmations
pub fn rejection_json() -> String {
    wrap_error(REJECTION_MESSAGE)
}

/// Cache-hit synthesis: `{"content": ..., "cached": true, "message": ...}`
pub fn cache_hit_json(content: &str, message: &str) -> String {
    serde_json::json!({
        "content": content,
        "cached": true,
        "message": message,
    })
    .to_string()
}

/// Short human-readable payload extracted from known argument fields,
/// used for tool-progress notifications.
pub fn extract_payload(arguments: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(arguments) else {
        return String::new();
    };
    for key in ["path", "pattern", "cmd", "command", "query"] {
        if let Some(field) = value.get(key).and_then(|v| v.as_str()) {
            return field.to_string();
        }
    }
    String::new()
}

/// `path` field of a tool-call argument object, if any
pub fn extract_path(arguments: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()?
        .get("path")?
        .as_str()
        .map(|s| s.to_string())
}

/// `path` and `content` fields of a write-style argument object
pub fn extract_path_and_content(arguments: &str) -> Option<(String, String)> {
    let value = serde_json::from_str::<serde_json::Value>(arguments).ok()?;
    let path = value.get("path")?.as_str()?.to_string();
    let content = value.get("content")?.as_str()?.to_string();
    Some((path, content))
}
