//! Tool-call history - bounded ring of recent invocations with a digest

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Ring capacity; oldest records are evicted FIFO
pub const TOOL_HISTORY_CAPACITY: usize = 50;

/// Records shown in the markdown digest
const SUMMARY_COUNT: usize = 10;

/// Max characters of result text carried into the digest
const RESULT_TRUNCATE: usize = 100;

/// One recorded tool invocation
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub arguments: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Append-only ring of tool invocations.
///
/// Eviction is silent; position 0 is always the oldest surviving record.
#[derive(Debug, Default)]
pub struct ToolCallHistory {
    records: Mutex<VecDeque<ToolCallRecord>>,
}

impl ToolCallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) {
        let mut records = self.lock();
        if records.len() == TOOL_HISTORY_CAPACITY {
            records.pop_front();
        }
        records.push_back(ToolCallRecord {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
            result: result.into(),
            timestamp: Utc::now(),
            success,
        });
    }

    /// Markdown digest of the most recent records for the system prompt
    pub fn summary(&self) -> String {
        let records = self.lock();
        if records.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Recent tool calls\n");
        let start = records.len().saturating_sub(SUMMARY_COUNT);
        for record in records.iter().skip(start) {
            let glyph = if record.success { "✓" } else { "✗" };
            let text = truncate(&record.result, RESULT_TRUNCATE);
            out.push_str(&format!("- {} {} — {}\n", glyph, record.tool_name, text));
        }
        out
    }

    /// Most recent record for the named tool, scanning backward
    pub fn last_of(&self, tool_name: &str) -> Option<ToolCallRecord> {
        self.lock()
            .iter()
            .rev()
            .find(|r| r.tool_name == tool_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ToolCallRecord> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ToolCallRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}
