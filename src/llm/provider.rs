//! Provider trait - the narrow seam to the concrete LLM transport

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{LlmError, LlmRequest, StreamEvent};

/// Stream of response events - boxed for trait object safety
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Unified LLM provider interface.
///
/// The concrete HTTP/SSE transport lives outside the core; the agent loop
/// only ever sees this trait. Opening the stream is the fallible step;
/// once open, failures arrive as [`StreamEvent::Error`] items.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Open a streaming chat completion for the request
    async fn chat_stream(&self, request: LlmRequest) -> Result<EventStream, LlmError>;

    /// Switch the active model
    fn set_model(&self, model: &str);

    /// Currently active model name
    fn model(&self) -> String;
}
