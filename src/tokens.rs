//! Token estimation - byte heuristic used for budget arithmetic, never billing

use crate::llm::types::Message;

/// Trait for estimating token counts in text
pub trait TokenEstimator: Send + Sync {
    /// Estimate tokens in raw text
    fn estimate(&self, text: &str) -> usize;
}

/// Heuristic estimator: CJK code points average ~3 per token, everything
/// else ~4 per token. Monotonic and deterministic; O(n) in byte length.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenEstimator;

impl TokenEstimator for HeuristicTokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate tokens in a string without constructing an estimator.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    cjk.div_ceil(3) + other.div_ceil(4)
}

/// Estimate tokens across a message sequence, including role strings.
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + estimate_tokens(m.role.as_str()))
        .sum()
}

/// CJK classification by Unicode block: Han ideographs, kana, hangul,
/// CJK punctuation, and fullwidth forms.
fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x1100..=0x11FF      // Hangul Jamo
        | 0x2E80..=0x2EFF    // CJK Radicals Supplement
        | 0x3000..=0x303F    // CJK Symbols and Punctuation
        | 0x3040..=0x30FF    // Hiragana, Katakana
        | 0x3130..=0x318F    // Hangul Compatibility Jamo
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xAC00..=0xD7AF    // Hangul Syllables
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0xFF00..=0xFFEF    // Halfwidth and Fullwidth Forms
        | 0x20000..=0x2A6DF  // CJK Extension B
    )
}
