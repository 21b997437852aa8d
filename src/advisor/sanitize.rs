//! Input sanitization to prevent prompt injection
//!
//! Strategy names, symbols and indicator keys arrive from outside the engine
//! and end up verbatim in prompts, so instruction keywords are filtered out of
//! them. Model reasoning comes back as free text and is only normalised and
//! truncated before it is handed to the caller.

use lazy_static::lazy_static;
use regex::Regex;

/// Longest reasoning text kept on a signal
pub const MAX_REASONING_CHARS: usize = 2000;

/// Longest label (name, symbol, indicator key) rendered into a prompt
pub const MAX_LABEL_CHARS: usize = 64;

lazy_static! {
    /// Pattern to detect potential LLM instruction keywords
    static ref INJECTION_PATTERNS: Regex = Regex::new(
        r"(?i)(ignore\s+previous|system:|assistant:|user:|<\|.*?\|>|```|human:|ai:|forget\s+all|disregard|new\s+instructions?)"
    ).expect("Failed to compile INJECTION_PATTERNS regex - this is a bug in the hardcoded pattern");

    /// Characters that would break table or list structure in a label
    static ref LABEL_BREAKERS: Regex = Regex::new(r"[|\r\n\t]+")
        .expect("Failed to compile LABEL_BREAKERS regex - this is a bug in the hardcoded pattern");
}

/// Sanitizes free text: strips instruction keywords, truncates on a char
/// boundary and normalizes whitespace
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let filtered = INJECTION_PATTERNS.replace_all(input, "[filtered]");
    truncate_text(&filtered, max_chars)
}

/// Collapses whitespace and truncates on a char boundary, preferring a word break
pub fn truncate_text(input: &str, max_chars: usize) -> String {
    let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    let target = max_chars.saturating_sub(3);
    let mut truncated: String = normalized.chars().take(target).collect();
    if let Some(pos) = truncated.rfind(char::is_whitespace) {
        truncated.truncate(pos);
    }
    truncated.push_str("...");
    truncated
}

/// Sanitizes a short label that is rendered inside a table cell or list item
pub fn sanitize_label(label: &str) -> String {
    let flattened = LABEL_BREAKERS.replace_all(label, " ");
    sanitize_text(&flattened, MAX_LABEL_CHARS)
}

/// Normalizes model reasoning before it is stored on a signal
///
/// Reasoning only flows out to the caller, never back into a prompt, so the
/// model's wording is kept as written.
pub fn sanitize_reasoning(reasoning: &str) -> String {
    truncate_text(reasoning, MAX_REASONING_CHARS)
}
