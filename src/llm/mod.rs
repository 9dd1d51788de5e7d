//! LLM abstraction layer - conversation types and the provider seam

pub mod provider;
pub mod types;

pub use provider::{EventStream, LlmProvider};
pub use types::{LlmError, LlmRequest, Message, Role, StreamEvent, ToolCall};
