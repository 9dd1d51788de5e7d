//! Lathe - core runtime for an interactive coding agent
//!
//! The crate mediates between an LLM provider, executable tools, and UI
//! front-ends. Four subsystems carry the weight:
//!
//! - [`agent`] - the ReAct loop: streams LLM output, assembles tool-call
//!   fragments, dispatches them under a confirmation protocol, and feeds
//!   results back until convergence
//! - [`session`] - per-session ownership of history, caches, traces, and a
//!   live agent, safely observable from UI
//! - [`context`] - system-prompt assembly under a token budget with
//!   threshold-driven compression
//! - [`bus`] - prioritized typed pub/sub with middleware, back-pressure,
//!   and retry
//!
//! Concrete LLM transports, tool implementations, rendering, and storage
//! backends are external collaborators behind the traits in
//! [`llm`], [`agent::ToolExecutor`], [`ui`], and [`session::SessionStore`].

pub mod agent;
pub mod bus;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod llm;
pub mod logging;
pub mod session;
pub mod tokens;
pub mod trace;
pub mod ui;

#[cfg(test)]
pub(crate) mod testutil;

pub use agent::{Agent, LoopController, LoopOutcome, SystemPromptBuilder, ToolExecutor};
pub use bus::{Event, EventBus, EventFilter, EventPriority};
pub use cache::FileCache;
pub use config::CoreConfig;
pub use context::{ContextManager, ContextMonitor, ProjectContext};
pub use error::{CoreError, Result};
pub use history::ConversationHistory;
pub use llm::{LlmProvider, LlmRequest, Message, Role, StreamEvent, ToolCall};
pub use session::{AgentFactory, Session, SessionManager, SessionStore};
pub use trace::ToolCallHistory;
pub use ui::{ToolProgress, Ui};
