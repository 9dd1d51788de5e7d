//! Shared test doubles: scripted provider, recording UI, and executors

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::engine::Agent;
use crate::agent::executor::{ToolError, ToolExecutor};
use crate::cache::FileCache;
use crate::config::AgentSettings;
use crate::context::ContextManager;
use crate::history::ConversationHistory;
use crate::llm::provider::{EventStream, LlmProvider};
use crate::llm::types::{LlmError, LlmRequest, StreamEvent, ToolCall};
use crate::trace::ToolCallHistory;
use crate::ui::{ToolProgress, Ui};

// ── provider doubles ───────────────────────────────────────────────────

/// Replays one scripted event sequence per `chat_stream` call and records
/// every request for assertions. An exhausted script yields a bare `Done`.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<LlmRequest>>,
    model: Mutex<String>,
}

pub fn scripted(scripts: Vec<Vec<StreamEvent>>) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider {
        scripts: Mutex::new(scripts.into()),
        requests: Mutex::new(Vec::new()),
        model: Mutex::new("scripted-model".to_string()),
    })
}

impl ScriptedProvider {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> LlmRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(&self, request: LlmRequest) -> Result<EventStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::Done]);
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn set_model(&self, model: &str) {
        *self.model.lock().unwrap() = model.to_string();
    }

    fn model(&self) -> String {
        self.model.lock().unwrap().clone()
    }
}

/// Always fails to open the stream
pub struct FailingOpenProvider;

#[async_trait]
impl LlmProvider for FailingOpenProvider {
    async fn chat_stream(&self, _request: LlmRequest) -> Result<EventStream, LlmError> {
        Err(LlmError::StreamOpen {
            message: "connection refused".to_string(),
        })
    }

    fn set_model(&self, _model: &str) {}

    fn model(&self) -> String {
        "failing-model".to_string()
    }
}

// ── UI double ──────────────────────────────────────────────────────────

/// Records everything the agent sends to the UI; confirmation answers are
/// fixed at construction.
pub struct RecordingUi {
    approve: bool,
    with_progress: bool,
    streamed: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
    confirms: Mutex<Vec<(String, String)>>,
    progress: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn new(approve: bool, with_progress: bool) -> Self {
        Self {
            approve,
            with_progress,
            streamed: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            confirms: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
        }
    }

    pub fn streamed(&self) -> Vec<String> {
        self.streamed.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn confirms(&self) -> Vec<(String, String)> {
        self.confirms.lock().unwrap().clone()
    }

    pub fn progress_events(&self) -> Vec<String> {
        self.progress.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ui for RecordingUi {
    async fn send_stream(&self, text: &str) {
        self.streamed.lock().unwrap().push(text.to_string());
    }

    async fn show_status(&self, text: &str) {
        self.statuses.lock().unwrap().push(text.to_string());
    }

    async fn request_confirm(&self, name: &str, args: &str) -> bool {
        self.confirms
            .lock()
            .unwrap()
            .push((name.to_string(), args.to_string()));
        self.approve
    }

    async fn request_confirm_with_diff(&self, path: &str, _diff: &str) -> bool {
        self.confirms
            .lock()
            .unwrap()
            .push(("diff".to_string(), path.to_string()));
        self.approve
    }

    fn tool_progress(&self) -> Option<&dyn ToolProgress> {
        if self.with_progress {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl ToolProgress for RecordingUi {
    async fn start_tool_execution(&self, name: &str, payload: &str) {
        self.progress
            .lock()
            .unwrap()
            .push(format!("start {} {}", name, payload));
    }

    async fn end_tool_execution(&self, success: bool, _error: Option<&str>) {
        self.progress
            .lock()
            .unwrap()
            .push(format!("end {}", if success { "success" } else { "failure" }));
    }
}

// ── executor doubles ───────────────────────────────────────────────────

/// Rejects every call as unknown
pub struct NullExecutor;

#[async_trait]
impl ToolExecutor for NullExecutor {
    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        Err(ToolError::Unknown {
            name: call.name.clone(),
        })
    }
}

/// Maps tool names to canned results with per-tool latency
pub struct DelayedExecutor {
    results: HashMap<String, (String, Duration)>,
    calls: Mutex<Vec<ToolCall>>,
}

impl DelayedExecutor {
    pub fn new(results: HashMap<String, (String, Duration)>) -> Self {
        Self {
            results,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for DelayedExecutor {
    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(call.clone());
        match self.results.get(&call.name) {
            Some((result, delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(result.clone())
            }
            None => Err(ToolError::Unknown {
                name: call.name.clone(),
            }),
        }
    }
}

/// Real read/write tools against a temp workspace
pub struct WorkspaceExecutor {
    root: PathBuf,
    calls: Mutex<Vec<ToolCall>>,
}

impl WorkspaceExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl ToolExecutor for WorkspaceExecutor {
    async fn execute(
        &self,
        call: &ToolCall,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(call.clone());
        let args: serde_json::Value =
            serde_json::from_str(&call.arguments).map_err(|e| ToolError::InvalidInput {
                message: e.to_string(),
            })?;

        match call.name.as_str() {
            "read_file" => {
                let path = args["path"].as_str().ok_or_else(|| ToolError::InvalidInput {
                    message: "missing path".to_string(),
                })?;
                let content =
                    std::fs::read_to_string(self.resolve(path)).map_err(|e| ToolError::Failed {
                        message: e.to_string(),
                    })?;
                Ok(serde_json::json!({ "content": content }).to_string())
            }
            "write_file" => {
                let path = args["path"].as_str().ok_or_else(|| ToolError::InvalidInput {
                    message: "missing path".to_string(),
                })?;
                let content = args["content"].as_str().unwrap_or_default();
                std::fs::write(self.resolve(path), content).map_err(|e| ToolError::Failed {
                    message: e.to_string(),
                })?;
                Ok("written".to_string())
            }
            other => Err(ToolError::Unknown {
                name: other.to_string(),
            }),
        }
    }
}

// ── agent fixture ──────────────────────────────────────────────────────

/// Fully wired agent over a temp workspace
pub struct AgentFixture<P: LlmProvider + 'static = ScriptedProvider> {
    pub agent: Agent,
    pub ui: Arc<RecordingUi>,
    pub provider: Arc<P>,
    pub cache: Arc<FileCache>,
    _dir: Option<tempfile::TempDir>,
}

impl<P: LlmProvider + 'static> AgentFixture<P> {
    pub fn builder(provider: Arc<P>) -> AgentFixtureBuilder<P> {
        AgentFixtureBuilder {
            provider,
            root: None,
            executor: None,
            approve: true,
            with_progress: false,
            parallel: false,
            tool_results: HashMap::new(),
        }
    }
}

/// Default fixture: approving UI, no executor, fresh temp workspace
pub async fn agent_fixture(provider: Arc<ScriptedProvider>) -> AgentFixture {
    AgentFixture::builder(provider).build().await
}

pub struct AgentFixtureBuilder<P: LlmProvider + 'static> {
    provider: Arc<P>,
    root: Option<PathBuf>,
    executor: Option<Arc<dyn ToolExecutor>>,
    approve: bool,
    with_progress: bool,
    parallel: bool,
    tool_results: HashMap<String, (String, Duration)>,
}

impl<P: LlmProvider + 'static> AgentFixtureBuilder<P> {
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn approve(mut self, approve: bool) -> Self {
        self.approve = approve;
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.with_progress = true;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn tool_result(
        mut self,
        name: impl Into<String>,
        result: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.tool_results.insert(name.into(), (result.into(), delay));
        self
    }

    pub async fn build(self) -> AgentFixture<P> {
        let (root, dir) = match self.root {
            Some(root) => (root, None),
            None => {
                let dir = tempfile::TempDir::new().unwrap();
                std::fs::write(dir.path().join("README.md"), "# fixture\n").unwrap();
                (dir.path().to_path_buf(), Some(dir))
            }
        };

        let executor: Arc<dyn ToolExecutor> = match self.executor {
            Some(executor) => executor,
            None if !self.tool_results.is_empty() => {
                Arc::new(DelayedExecutor::new(self.tool_results))
            }
            None => Arc::new(NullExecutor),
        };

        let ui = Arc::new(RecordingUi::new(self.approve, self.with_progress));
        let history = Arc::new(ConversationHistory::new());
        let cache = Arc::new(FileCache::new());
        let trace = Arc::new(ToolCallHistory::new());
        let context = ContextManager::new(&root).unwrap();
        let settings = AgentSettings {
            parallel_tools: self.parallel,
            ..AgentSettings::default()
        };

        let agent = Agent::new(
            Arc::clone(&self.provider) as Arc<dyn LlmProvider>,
            executor,
            Arc::clone(&ui) as Arc<dyn Ui>,
            context,
            history,
            Arc::clone(&cache),
            trace,
            settings,
        );

        AgentFixture {
            agent,
            ui,
            provider: self.provider,
            cache,
            _dir: dir,
        }
    }
}
