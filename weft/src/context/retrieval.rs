//! Retrieval mode auto-detection and keyword scoring shared by the keepers.

use std::collections::HashSet;

use crate::message::{estimate_tokens, Message};

/// How a retrieval request is served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrieveMode {
    /// Keyword-scored raw messages.
    Raw,
    /// One LLM call constrained to the stored context.
    Smart,
}

const INTERROGATIVES: &[&str] = &[
    "what", "how", "why", "where", "when", "who", "which", "did", "does", "is", "are", "was",
    "were", "can", "could", "should", "would",
];

/// A query that reads like a question goes to the smart path: trailing `?` or
/// a leading interrogative word.
pub fn detect_mode(query: &str) -> RetrieveMode {
    let trimmed = query.trim();
    if trimmed.ends_with('?') {
        return RetrieveMode::Smart;
    }
    let first_word = trimmed
        .split_whitespace()
        .next()
        .map(|w| w.to_lowercase())
        .unwrap_or_default();
    if INTERROGATIVES.contains(&first_word.as_str()) && trimmed.contains(' ') {
        return RetrieveMode::Smart;
    }
    RetrieveMode::Raw
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Keyword-overlap selection: score each message by shared downcased words
/// with the query, sort descending (stable), and keep the prefix that fits the
/// token budget.
pub fn keyword_select(messages: &[Message], query: &str, token_budget: u32) -> Vec<Message> {
    let query_words = word_set(query);
    let mut scored: Vec<(usize, usize, &Message)> = messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let overlap = word_set(&message.content)
                .intersection(&query_words)
                .count();
            (overlap, index, message)
        })
        .collect();
    // Highest overlap first; ties keep original order.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut used = 0u32;
    let mut kept = Vec::new();
    for (_, _, message) in scored {
        let cost = estimate_tokens(&message.content);
        if used + cost > token_budget {
            break;
        }
        used += cost;
        kept.push(message.clone());
    }
    kept
}

/// Renders messages as `[<role>]: <content>` lines.
pub fn render_lines(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
