//! UI seam - required surface plus an optional tool-progress extension

use async_trait::async_trait;

/// Required UI surface for the agent loop.
///
/// Implementations must serialize their own confirmation prompts; the core
/// calls [`request_confirm`](Ui::request_confirm) from concurrent tool tasks
/// without extra locking.
#[async_trait]
pub trait Ui: Send + Sync {
    /// Forward streamed assistant text
    async fn send_stream(&self, text: &str);

    /// Show a transient status line
    async fn show_status(&self, text: &str);

    /// Ask the user to approve a tool invocation
    async fn request_confirm(&self, name: &str, args: &str) -> bool;

    /// Ask the user to approve a file change, rendered as a diff
    async fn request_confirm_with_diff(&self, path: &str, diff: &str) -> bool;

    /// Optional tool-progress capability; `None` when unsupported
    fn tool_progress(&self) -> Option<&dyn ToolProgress> {
        None
    }
}

/// Extended notifications around tool execution, probed via
/// [`Ui::tool_progress`].
#[async_trait]
pub trait ToolProgress: Send + Sync {
    /// Announce that a tool is about to run; `payload` is a short
    /// human-readable argument extract (path, pattern, command)
    async fn start_tool_execution(&self, name: &str, payload: &str);

    /// Report the outcome of the announced tool
    async fn end_tool_execution(&self, success: bool, error: Option<&str>);
}

/// No-op UI that approves everything; useful for headless runs and tests.
#[derive(Debug, Default, Clone)]
pub struct HeadlessUi;

#[async_trait]
impl Ui for HeadlessUi {
    async fn send_stream(&self, _text: &str) {}

    async fn show_status(&self, text: &str) {
        tracing::debug!(status = %text, "ui status");
    }

    async fn request_confirm(&self, _name: &str, _args: &str) -> bool {
        true
    }

    async fn request_confirm_with_diff(&self, _path: &str, _diff: &str) -> bool {
        true
    }
}
