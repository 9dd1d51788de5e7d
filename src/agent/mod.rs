//! Agent loop - ReAct driver, tool execution, prompt assembly, and the
//! outer loop controller

pub mod controller;
pub mod engine;
pub mod executor;
pub mod prompt;

pub use controller::{LoopController, LoopOutcome};
pub use engine::Agent;
pub use executor::{
    cache_hit_json, extract_path, extract_path_and_content, extract_payload, rejection_json,
    wrap_error, wrap_success, ToolError, ToolExecutor, READ_FILE_TOOL, REJECTION_MESSAGE,
    WRITE_FILE_TOOL,
};
pub use prompt::SystemPromptBuilder;
