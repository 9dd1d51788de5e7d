//! Context monitor - usage measurement and compression prompt construction

use regex::Regex;
use std::sync::OnceLock;

use crate::llm::types::{Message, Role};
use crate::tokens::estimate_messages;

/// Header that opens every compression prompt; its presence marks an
/// already-compressed history.
pub const SUMMARY_HEADER: &str = "## Conversation summary";

/// Messages digested into the "preserved context" section
const PRESERVED_TAIL: usize = 6;

/// Characters of each digested message carried into the summary
const DIGEST_CHARS: usize = 120;

/// Advice returned by [`ContextMonitor::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAdvice {
    None,
    Warn,
    Compress,
}

/// Watches estimated context usage against warn/compress thresholds.
#[derive(Debug, Clone)]
pub struct ContextMonitor {
    warn_threshold: f32,
    compress_threshold: f32,
}

impl Default for ContextMonitor {
    fn default() -> Self {
        Self {
            warn_threshold: 0.70,
            compress_threshold: 0.85,
        }
    }
}

impl ContextMonitor {
    pub fn new(warn_threshold: f32, compress_threshold: f32) -> Self {
        Self {
            warn_threshold,
            compress_threshold,
        }
    }

    /// Estimated usage as a fraction of the model window
    pub fn usage_ratio(&self, messages: &[Message], model_max_tokens: usize) -> f32 {
        if model_max_tokens == 0 {
            return 1.0;
        }
        estimate_messages(messages) as f32 / model_max_tokens as f32
    }

    pub fn check(&self, messages: &[Message], model_max_tokens: usize) -> CompressionAdvice {
        let ratio = self.usage_ratio(messages, model_max_tokens);
        if ratio >= self.compress_threshold {
            CompressionAdvice::Compress
        } else if ratio >= self.warn_threshold {
            CompressionAdvice::Warn
        } else {
            CompressionAdvice::None
        }
    }

    /// Build the user message that replaces the whole history.
    ///
    /// Re-running on an already-compressed history returns it unchanged, so
    /// the summary header is never duplicated.
    pub fn build_compression_prompt(&self, messages: &[Message]) -> String {
        if let [only] = messages {
            if only.role == Role::User && only.content.starts_with(SUMMARY_HEADER) {
                return only.content.clone();
            }
        }

        let mut out = String::from(SUMMARY_HEADER);
        out.push_str(&format!(
            "\nThe conversation below was compressed from {} earlier messages.\n",
            messages.len()
        ));

        if let Some(request) = last_user_request(messages) {
            out.push_str("\n### Current request\n");
            out.push_str(&request);
            out.push('\n');
        }

        let open_items = unchecked_items(messages);
        if !open_items.is_empty() {
            out.push_str("\n### Open items\n");
            for item in open_items {
                out.push_str(&format!("- [ ] {}\n", item));
            }
        }

        out.push_str("\n### Preserved context\n");
        let start = messages.len().saturating_sub(PRESERVED_TAIL);
        for msg in &messages[start..] {
            if msg.content.trim().is_empty() {
                continue;
            }
            out.push_str(&format!(
                "- [{}] {}\n",
                msg.role.as_str(),
                digest(&msg.content)
            ));
        }
        out.push_str("\nContinue the task from this summary.\n");
        out
    }
}

fn last_user_request(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && !m.content.starts_with(SUMMARY_HEADER))
        .map(|m| m.content.clone())
}

/// Unchecked `- [ ]` items scanned across every message
fn unchecked_items(messages: &[Message]) -> Vec<String> {
    static CHECKLIST: OnceLock<Regex> = OnceLock::new();
    let re = CHECKLIST.get_or_init(|| Regex::new(r"(?m)^\s*- \[( |x|X)\]\s*(.+)$").unwrap());

    let mut items = Vec::new();
    for msg in messages {
        for caps in re.captures_iter(&msg.content) {
            if &caps[1] == " " {
                let item = caps[2].trim().to_string();
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
    }
    items
}

fn digest(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= DIGEST_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(DIGEST_CHARS).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_history(chars_per_msg: usize, count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| Message::user(format!("{} {}", i, "x".repeat(chars_per_msg))))
            .collect()
    }

    #[test]
    fn test_check_thresholds() {
        let monitor = ContextMonitor::default();
        // ~25 tokens per message + role
        let quiet = long_history(100, 2);
        assert_eq!(monitor.check(&quiet, 10_000), CompressionAdvice::None);

        // 86% of a 200k budget
        let heavy = long_history(4000, 172);
        let advice = monitor.check(&heavy, 200_000);
        assert_eq!(advice, CompressionAdvice::Compress);
    }

    #[test]
    fn test_check_warn_band() {
        let monitor = ContextMonitor::default();
        // ~750 tokens against 1000: inside [0.70, 0.85)
        let messages = long_history(2980, 1);
        assert_eq!(monitor.check(&messages, 1_000), CompressionAdvice::Warn);
    }

    #[test]
    fn test_compression_prompt_contents() {
        let monitor = ContextMonitor::default();
        let messages = vec![
            Message::user("Refactor the parser.\n- [x] split lexer\n- [ ] add error spans"),
            Message::assistant("Working on it.\n- [ ] update tests", vec![]),
            Message::user("Also rename the module"),
        ];

        let prompt = monitor.build_compression_prompt(&messages);
        assert!(prompt.starts_with(SUMMARY_HEADER));
        assert!(prompt.contains("### Current request\nAlso rename the module"));
        assert!(prompt.contains("- [ ] add error spans"));
        assert!(prompt.contains("- [ ] update tests"));
        assert!(!prompt.contains("- [ ] split lexer"));
        assert!(prompt.contains("### Preserved context"));
    }

    #[test]
    fn test_compression_idempotent() {
        let monitor = ContextMonitor::default();
        let messages = vec![
            Message::user("Do the thing\n- [ ] step one"),
            Message::assistant("ok", vec![]),
        ];
        let first = monitor.build_compression_prompt(&messages);
        let compressed = vec![Message::user(first.clone())];
        let second = monitor.build_compression_prompt(&compressed);
        assert_eq!(first, second);
        assert_eq!(second.matches(SUMMARY_HEADER).count(), 1);
    }

    #[test]
    fn test_usage_drops_after_compression() {
        let monitor = ContextMonitor::default();
        let heavy = long_history(4000, 172);
        assert_eq!(monitor.check(&heavy, 200_000), CompressionAdvice::Compress);

        let prompt = monitor.build_compression_prompt(&heavy);
        let compressed = vec![Message::user(prompt)];
        let advice = monitor.check(&compressed, 200_000);
        assert!(matches!(advice, CompressionAdvice::None | CompressionAdvice::Warn));
    }

    #[test]
    fn test_zero_budget_is_full() {
        let monitor = ContextMonitor::default();
        assert_eq!(monitor.check(&[Message::user("x")], 0), CompressionAdvice::Compress);
    }
}
