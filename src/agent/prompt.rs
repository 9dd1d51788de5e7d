//! System prompt builder - base role, tool guide, history digest, project
//! context, wall-clock time

use chrono::Local;

use crate::context::ProjectContext;

/// Builder for the per-run system prompt.
///
/// The final prompt concatenates: base role, tool-usage guide, the
/// tool-call-history digest, the rendered project context, and the current
/// wall-clock time.
#[derive(Debug, Clone)]
pub struct SystemPromptBuilder {
    role: String,
    tool_instructions: Vec<String>,
    coding_guidelines: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            tool_instructions: Vec::new(),
            coding_guidelines: Vec::new(),
        }
    }

    /// Default role for the coding agent
    pub fn coding_agent() -> Self {
        Self::new(
            "You are an expert AI coding assistant running inside a developer's \
             project. You help with writing code, debugging, explaining concepts, \
             and using the available tools. You are concise, accurate, and proactive.",
        )
        .add_tool_instruction("Use read_file before editing a file you have not seen")
        .add_tool_instruction("Prefer small, reviewable changes over sweeping rewrites")
        .add_tool_instruction("Tool arguments are JSON objects; keep them minimal")
    }

    pub fn add_tool_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.tool_instructions.push(instruction.into());
        self
    }

    pub fn add_coding_guideline(mut self, guideline: impl Into<String>) -> Self {
        self.coding_guidelines.push(guideline.into());
        self
    }

    /// Build the full system prompt for one run
    pub fn build(&self, tool_history_digest: &str, project: &ProjectContext) -> String {
        let mut parts = Vec::new();

        parts.push(self.role.clone());

        if !self.tool_instructions.is_empty() {
            parts.push(format!(
                "\n## Tool Usage\n{}",
                self.tool_instructions
                    .iter()
                    .map(|t| format!("- {}", t))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        if !self.coding_guidelines.is_empty() {
            parts.push(format!(
                "\n## Coding Guidelines\n{}",
                self.coding_guidelines
                    .iter()
                    .map(|g| format!("- {}", g))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        if !tool_history_digest.is_empty() {
            parts.push(format!("\n{}", tool_history_digest));
        }

        parts.push(format!("\n{}", project.render()));

        parts.push(format!(
            "\nCurrent time: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S %Z")
        ));

        parts.join("\n")
    }
}

impl Default for SystemPromptBuilder {
    fn default() -> Self {
        Self::coding_agent()
    }
}
