//! Error types for the core runtime

use std::path::PathBuf;
use thiserror::Error;

use crate::llm::types::LlmError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path escapes project root: {path}")]
    PathEscape { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Session is closed: {id}")]
    SessionClosed { id: String },

    #[error("Session limit reached ({max})")]
    SessionLimit { max: usize },

    #[error("Session already exists: {id}")]
    DuplicateSession { id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Agent factory error: {0}")]
    AgentFactory(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
