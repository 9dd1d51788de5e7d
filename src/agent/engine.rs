//! Agent loop - the ReAct driver
//!
//! State machine per run: build prompt → call LLM → consume stream →
//! maybe execute tools → loop → done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{types as event_types, EventBus};
use crate::cache::FileCache;
use crate::config::AgentSettings;
use crate::context::ContextManager;
use crate::error::{CoreError, Result};
use crate::history::ConversationHistory;
use crate::llm::provider::{EventStream, LlmProvider};
use crate::llm::types::{LlmRequest, Message, StreamEvent, ToolCall};
use crate::trace::ToolCallHistory;
use crate::ui::Ui;

use super::executor::{
    cache_hit_json, extract_path, extract_path_and_content, extract_payload, rejection_json,
    wrap_error, wrap_success, ToolExecutor, READ_FILE_TOOL, REJECTION_MESSAGE, WRITE_FILE_TOOL,
};
use super::prompt::SystemPromptBuilder;

/// The agent: drives LLM ↔ tools ↔ history to convergence.
///
/// Owns its [`ContextManager`]; holds shared handles to the session's
/// history, cache, and trace; reaches UI, LLM, and tools through traits.
pub struct Agent {
    llm: Arc<dyn LlmProvider>,
    ui: Arc<dyn Ui>,
    context: ContextManager,
    prompt: SystemPromptBuilder,
    history: Arc<ConversationHistory>,
    runner: ToolRunner,
    settings: AgentSettings,
    bus: Option<Arc<EventBus>>,
}

/// Everything one tool call needs; cloned into parallel execution tasks
#[derive(Clone)]
struct ToolRunner {
    tools: Arc<dyn ToolExecutor>,
    ui: Arc<dyn Ui>,
    cache: Arc<FileCache>,
    trace: Arc<ToolCallHistory>,
    root: PathBuf,
    bus: Option<Arc<EventBus>>,
}

struct ToolOutcome {
    call_id: String,
    json: String,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolExecutor>,
        ui: Arc<dyn Ui>,
        context: ContextManager,
        history: Arc<ConversationHistory>,
        cache: Arc<FileCache>,
        trace: Arc<ToolCallHistory>,
        settings: AgentSettings,
    ) -> Self {
        let root = context.root().to_path_buf();
        let runner = ToolRunner {
            tools,
            ui: Arc::clone(&ui),
            cache,
            trace,
            root,
            bus: None,
        };
        Self {
            llm,
            ui,
            context,
            prompt: SystemPromptBuilder::default(),
            history,
            runner,
            settings,
            bus: None,
        }
    }

    pub fn with_prompt(mut self, prompt: SystemPromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    /// Attach an event bus for lifecycle events. Publish failures are
    /// logged and dropped; the loop never blocks on the bus.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.runner.bus = Some(Arc::clone(&bus));
        self.bus = Some(bus);
        self
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn trace(&self) -> &Arc<ToolCallHistory> {
        &self.runner.trace
    }

    pub fn ui(&self) -> &Arc<dyn Ui> {
        &self.ui
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Drive one top-level turn to convergence and return the final
    /// assistant content.
    pub async fn run(&self, user_message: &str, cancel: &CancellationToken) -> Result<String> {
        let project = self.context.build_context().await?;
        let system = self.prompt.build(&self.runner.trace.summary(), &project);
        self.history.append(Message::system(system));
        self.history.append(Message::user(user_message));

        tracing::info!(context_tokens = project.total_tokens, "agent run started");
        self.publish(
            event_types::AGENT_STARTED,
            HashMap::from([("message".to_string(), json!(preview(user_message)))]),
        );

        let result = self.drive_loop(cancel).await;
        match &result {
            Ok(reply) => self.publish(
                event_types::AGENT_COMPLETED,
                HashMap::from([("reply".to_string(), json!(preview(reply)))]),
            ),
            Err(e) => self.publish(
                event_types::AGENT_ERROR,
                HashMap::from([("error".to_string(), json!(e.to_string()))]),
            ),
        }
        result
    }

    async fn drive_loop(&self, cancel: &CancellationToken) -> Result<String> {
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            // Snapshot, never a live reference
            let request = LlmRequest {
                messages: self.history.snapshot(),
                max_tokens: Some(self.settings.max_tokens),
                temperature: Some(self.settings.temperature),
            };

            self.publish(event_types::LLM_REQUEST_START, HashMap::new());
            // A failure to open the stream fails the whole run
            let stream = self.llm.chat_stream(request).await?;
            let (content, tool_calls) = self.consume_stream(stream, cancel).await?;
            self.publish(event_types::LLM_REQUEST_COMPLETE, HashMap::new());

            // Some providers reject empty content alongside tool calls
            let content = if !tool_calls.is_empty() && content.trim().is_empty() {
                " ".to_string()
            } else {
                content
            };

            self.history
                .append(Message::assistant(content.clone(), tool_calls.clone()));

            if tool_calls.is_empty() {
                return Ok(content);
            }

            if self.settings.parallel_tools {
                self.execute_parallel(tool_calls, cancel).await;
            } else {
                self.execute_sequential(tool_calls, cancel).await;
            }
        }
    }

    /// Read stream events in arrival order, accumulating content and
    /// assembling tool-call fragments. Cancellation discards partial output.
    async fn consume_stream(
        &self,
        mut stream: EventStream,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<ToolCall>)> {
        let mut content = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                event = stream.next() => event,
            };
            match event {
                Some(StreamEvent::Content(text)) => {
                    self.ui.send_stream(&text).await;
                    content.push_str(&text);
                }
                Some(StreamEvent::ToolCallDelta {
                    id,
                    name,
                    arguments,
                }) => {
                    merge_tool_delta(&mut calls, id, name, arguments);
                }
                Some(StreamEvent::Error(message)) => {
                    // Informational; the stream may still complete
                    self.ui.send_stream(&format!("[Error: {}]", message)).await;
                }
                Some(StreamEvent::Done) | None => break,
            }
        }
        Ok((content, calls))
    }

    async fn execute_sequential(&self, calls: Vec<ToolCall>, cancel: &CancellationToken) {
        for call in calls {
            let outcome = self.runner.run_call(&call, cancel).await;
            self.history
                .append(Message::tool(outcome.call_id, outcome.json));
        }
    }

    /// One task per call; results are appended in completion order, never
    /// input order. Tool-call ids keep each result tied to its call, so the
    /// LLM does not depend on positional order.
    async fn execute_parallel(&self, calls: Vec<ToolCall>, cancel: &CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<ToolOutcome>(calls.len().max(1));
        for call in calls {
            let runner = self.runner.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = runner.run_call(&call, &cancel).await;
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            self.history
                .append(Message::tool(outcome.call_id, outcome.json));
        }
    }

    fn publish(&self, event_type: &str, data: HashMap<String, serde_json::Value>) {
        publish_best_effort(&self.bus, event_type, data);
    }
}

impl ToolRunner {
    async fn run_call(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolOutcome {
        // Confirmation comes first; a rejection never reaches the tool
        if !self.ui.request_confirm(&call.name, &call.arguments).await {
            self.trace
                .record(&call.id, &call.name, &call.arguments, REJECTION_MESSAGE, false);
            self.ui
                .show_status(&format!("Rejected {}", call.name))
                .await;
            return ToolOutcome {
                call_id: call.id.clone(),
                json: rejection_json(),
            };
        }

        if let Some(progress) = self.ui.tool_progress() {
            progress
                .start_tool_execution(&call.name, &extract_payload(&call.arguments))
                .await;
        }
        self.publish(
            event_types::TOOL_START,
            HashMap::from([("tool".to_string(), json!(call.name))]),
        );

        // Cache short-circuit for the canonical read tool
        if call.name == READ_FILE_TOOL {
            if let Some(path) = extract_path(&call.arguments) {
                let resolved = self.resolve(&path);
                if let Some(content) = self.cache.cached_unchanged(&resolved).await {
                    tracing::debug!(path = %path, "read served from cache");
                    self.trace
                        .record(&call.id, &call.name, &call.arguments, "(from cache)", true);
                    if let Some(progress) = self.ui.tool_progress() {
                        progress.end_tool_execution(true, None).await;
                    }
                    self.publish(
                        event_types::TOOL_COMPLETE,
                        HashMap::from([
                            ("tool".to_string(), json!(call.name)),
                            ("cached".to_string(), json!(true)),
                        ]),
                    );
                    return ToolOutcome {
                        call_id: call.id.clone(),
                        json: cache_hit_json(&content, "read from cache; file unchanged on disk"),
                    };
                }
            }
        }

        let result = self.tools.execute(call, cancel).await;
        let (json, success, error) = match result {
            Ok(raw) => (wrap_success(&raw), true, None),
            Err(e) => {
                let message = e.to_string();
                (wrap_error(&message), false, Some(message))
            }
        };

        // Successful writes populate the cache so same-session reads hit it
        if success && call.name == WRITE_FILE_TOOL {
            if let Some((path, content)) = extract_path_and_content(&call.arguments) {
                let resolved = self.resolve(&path);
                if let Err(e) = self.cache.update_after_write(&resolved, &content).await {
                    tracing::warn!(path = %path, error = %e, "cache update after write failed");
                }
            }
        }

        self.trace.record(
            &call.id,
            &call.name,
            &call.arguments,
            error.as_deref().unwrap_or(&json),
            success,
        );

        if let Some(progress) = self.ui.tool_progress() {
            progress.end_tool_execution(success, error.as_deref()).await;
        }
        let (event_type, mut data) = if success {
            (
                event_types::TOOL_COMPLETE,
                HashMap::from([("tool".to_string(), json!(call.name))]),
            )
        } else {
            (
                event_types::TOOL_ERROR,
                HashMap::from([("tool".to_string(), json!(call.name))]),
            )
        };
        if let Some(message) = &error {
            data.insert("error".to_string(), json!(message));
        }
        self.publish(event_type, data);

        ToolOutcome {
            call_id: call.id.clone(),
            json,
        }
    }

    /// Tool paths are interpreted relative to the project root
    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn publish(&self, event_type: &str, data: HashMap<String, serde_json::Value>) {
        publish_best_effort(&self.bus, event_type, data);
    }
}

/// Merge a streaming fragment into the in-progress call list: a new id
/// opens a call, a repeated id concatenates arguments.
pub(crate) fn merge_tool_delta(
    calls: &mut Vec<ToolCall>,
    id: String,
    name: Option<String>,
    arguments: String,
) {
    if let Some(existing) = calls.iter_mut().find(|c| c.id == id) {
        if existing.name.is_empty() {
            if let Some(name) = name {
                existing.name = name;
            }
        }
        existing.arguments.push_str(&arguments);
    } else {
        calls.push(ToolCall {
            id,
            name: name.unwrap_or_default(),
            arguments,
        });
    }
}

fn publish_best_effort(
    bus: &Option<Arc<EventBus>>,
    event_type: &str,
    data: HashMap<String, serde_json::Value>,
) {
    if let Some(bus) = bus {
        if let Err(e) = bus.publish(event_type, data) {
            tracing::debug!(event_type, error = %e, "lifecycle event dropped");
        }
    }
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 120;
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        text.chars().take(PREVIEW_CHARS).collect()
    }
}
