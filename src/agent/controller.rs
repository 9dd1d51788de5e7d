//! Outer loop controller - re-drives the agent until a terminal token
//! appears, compressing context between iterations when needed

use tokio_util::sync::CancellationToken;

use crate::config::AgentSettings;
use crate::context::{CompressionAdvice, ContextMonitor};
use crate::error::{CoreError, Result};
use crate::llm::types::{Message, Role};

use super::engine::Agent;

/// How the outer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The terminal token appeared in an assistant or tool message
    Terminal { iterations: usize },
    /// The iteration cap was reached without convergence
    MaxIterations { iterations: usize },
}

/// Keeps invoking [`Agent::run`] until the terminal token shows up, the
/// iteration cap is hit, or the caller cancels. Between iterations the
/// context monitor decides whether to warn or compress.
pub struct LoopController {
    terminal_token: String,
    max_iterations: usize,
    recent_tail: usize,
    model_max_tokens: usize,
    monitor: ContextMonitor,
}

impl LoopController {
    pub fn new(settings: &AgentSettings) -> Self {
        Self {
            terminal_token: settings.terminal_token.clone(),
            max_iterations: settings.max_iterations.max(1),
            recent_tail: settings.recent_tail.max(1),
            model_max_tokens: settings.model_max_tokens,
            monitor: ContextMonitor::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: ContextMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub async fn drive(
        &self,
        agent: &Agent,
        initial_message: &str,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome> {
        let mut message = initial_message.to_string();

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            agent.run(&message, cancel).await?;

            let snapshot = agent.history().snapshot();
            if self.turn_is_terminal(&snapshot) {
                tracing::info!(iteration, "terminal token reached");
                return Ok(LoopOutcome::Terminal { iterations: iteration });
            }

            match self.monitor.check(&snapshot, self.model_max_tokens) {
                CompressionAdvice::Compress => {
                    let prompt = self.monitor.build_compression_prompt(&snapshot);
                    agent.history().replace(vec![Message::user(prompt)]);
                    agent.ui().show_status("Context compressed").await;
                    tracing::info!(iteration, "history compressed");
                    message = format!(
                        "Continue the task from the summary above. Reply with {} when fully complete.",
                        self.terminal_token
                    );
                }
                CompressionAdvice::Warn => {
                    let percent =
                        (self.monitor.usage_ratio(&snapshot, self.model_max_tokens) * 100.0) as u32;
                    agent
                        .ui()
                        .show_status(&format!("Context usage at {}%", percent))
                        .await;
                    message = self.synthesize_next_turn(&snapshot);
                }
                CompressionAdvice::None => {
                    message = self.synthesize_next_turn(&snapshot);
                }
            }
        }

        Ok(LoopOutcome::MaxIterations {
            iterations: self.max_iterations,
        })
    }

    /// Scan the messages produced by the last turn (everything after the
    /// final user message): an assistant or tool message carrying the
    /// terminal token ends the loop.
    fn turn_is_terminal(&self, messages: &[Message]) -> bool {
        let token = self.terminal_token.to_lowercase();
        messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::User)
            .filter(|m| matches!(m.role, Role::Assistant | Role::Tool))
            .any(|m| m.content.to_lowercase().contains(&token))
    }

    /// Synthesize the next user turn from a bounded tail of recent messages.
    fn synthesize_next_turn(&self, messages: &[Message]) -> String {
        let mut out = String::from("Recent progress:\n");
        let start = messages.len().saturating_sub(self.recent_tail);
        for msg in &messages[start..] {
            if msg.content.trim().is_empty() {
                continue;
            }
            out.push_str(&format!("- [{}] {}\n", msg.role.as_str(), digest(&msg.content)));
        }
        out.push_str(&format!(
            "\nContinue working toward the goal. Reply with {} when fully complete.",
            self.terminal_token
        ));
        out
    }
}

fn digest(content: &str) -> String {
    const DIGEST_CHARS: usize = 160;
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= DIGEST_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(DIGEST_CHARS).collect();
        format!("{}…", cut)
    }
}
