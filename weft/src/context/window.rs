//! Token-budgeted message assembly for LLM calls.
//!
//! The window reserves budget for the system prompt, optional injected context
//! blocks, tool definitions, and the model's output, then fills the rest with
//! the tail of the history. The head is dropped silently. Invariants: the
//! output begins with the system message, the last input message is always
//! retained, and the total estimate never exceeds the model limit.

use once_cell::sync::Lazy;

use crate::message::{estimate_tokens, Message};

/// Context limit when the model is unknown.
pub const DEFAULT_MODEL_LIMIT: u32 = 128_000;

/// Output tokens reserved by default.
pub const DEFAULT_RESERVED_OUTPUT: u32 = 4096;

/// Flat allowance for tool definitions advertised alongside the messages.
const TOOL_DEFINITION_ALLOWANCE: u32 = 1024;

/// Known context limits by model-id fragment; first match wins.
static MODEL_LIMITS: Lazy<Vec<(&'static str, u32)>> = Lazy::new(|| {
    vec![
        ("claude", 200_000),
        ("gpt-5", 272_000),
        ("gpt-4", 128_000),
        ("glm", 128_000),
        ("deepseek", 64_000),
    ]
});

/// Total context limit for a model string (`provider:model_id` or bare id).
pub fn model_limit(model: &str) -> u32 {
    let id = model.split_once(':').map(|(_, id)| id).unwrap_or(model);
    MODEL_LIMITS
        .iter()
        .find(|(fragment, _)| id.contains(fragment))
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_MODEL_LIMIT)
}

#[derive(Clone, Debug, Default)]
pub struct WindowOptions {
    pub model: String,
    /// Overrides the model-table limit.
    pub max_tokens: Option<u32>,
    pub reserved_output: Option<u32>,
    /// Pre-rendered decision-context block, truncated to its cap.
    pub decision_context: Option<String>,
    pub decision_context_max: Option<u32>,
    /// Pre-rendered repo-map block, truncated to its cap.
    pub repo_map: Option<String>,
    pub repo_map_max: Option<u32>,
}

fn capped_block(text: &str, max_tokens: u32) -> String {
    let max_chars = (max_tokens.saturating_sub(4) as usize) * 4;
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

/// Builds the windowed message list to send to the LLM.
pub fn build_messages(
    history: &[Message],
    system_prompt: &str,
    options: &WindowOptions,
) -> Vec<Message> {
    let limit = options
        .max_tokens
        .unwrap_or_else(|| model_limit(&options.model));
    let reserved_output = options.reserved_output.unwrap_or(DEFAULT_RESERVED_OUTPUT);

    let mut prefix = vec![Message::system(system_prompt)];
    if let Some(block) = &options.decision_context {
        let cap = options.decision_context_max.unwrap_or(1024);
        prefix.push(Message::system(capped_block(block, cap)));
    }
    if let Some(block) = &options.repo_map {
        let cap = options.repo_map_max.unwrap_or(2048);
        prefix.push(Message::system(capped_block(block, cap)));
    }

    let reserved: u32 = prefix
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum::<u32>()
        + TOOL_DEFINITION_ALLOWANCE
        + reserved_output;
    let available = limit.saturating_sub(reserved);

    // Tail of the history, most recent first; the last message is always kept.
    let mut kept: Vec<&Message> = Vec::new();
    let mut used: u32 = 0;
    for (index, message) in history.iter().enumerate().rev() {
        let cost = estimate_tokens(&message.content);
        let is_last = index == history.len() - 1;
        if !is_last && used + cost > available {
            break;
        }
        used += cost;
        kept.push(message);
    }
    kept.reverse();

    prefix.extend(kept.into_iter().cloned());
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn system_first_and_last_message_kept() {
        let history = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        let out = build_messages(&history, "sys", &WindowOptions::default());
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[0].content, "sys");
        assert_eq!(out.last().unwrap().content, "c");
    }

    #[test]
    fn head_is_dropped_when_over_budget() {
        // ~254 tokens per message, budget below 3 messages worth of history.
        let big = "x".repeat(1000);
        let history = vec![
            Message::user(big.clone()),
            Message::user(big.clone()),
            Message::user("the last one"),
        ];
        let options = WindowOptions {
            max_tokens: Some(1500),
            reserved_output: Some(0),
            ..Default::default()
        };
        let out = build_messages(&history, "sys", &options);
        // Last message always present; oldest dropped first.
        assert_eq!(out.last().unwrap().content, "the last one");
        assert!(out.len() < 1 + history.len());
        let total: u32 = out.iter().map(|m| estimate_tokens(&m.content)).sum();
        assert!(total + 1024 <= 1500);
    }

    #[test]
    fn last_message_survives_even_when_alone_it_exceeds_budget() {
        let history = vec![Message::user("x".repeat(10_000))];
        let options = WindowOptions {
            max_tokens: Some(1200),
            reserved_output: Some(0),
            ..Default::default()
        };
        let out = build_messages(&history, "sys", &options);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content.len(), 10_000);
    }

    #[test]
    fn injected_blocks_sit_between_system_and_history() {
        let options = WindowOptions {
            decision_context: Some("decisions here".into()),
            repo_map: Some("src/lib.rs".into()),
            ..Default::default()
        };
        let out = build_messages(&[Message::user("hi")], "sys", &options);
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].content, "decisions here");
        assert_eq!(out[2].content, "src/lib.rs");
        assert_eq!(out[3].content, "hi");
    }

    #[test]
    fn injected_blocks_are_truncated_to_their_cap() {
        let options = WindowOptions {
            repo_map: Some("y".repeat(100_000)),
            repo_map_max: Some(100),
            ..Default::default()
        };
        let out = build_messages(&[Message::user("hi")], "sys", &options);
        assert!(out[1].content.len() <= 100 * 4);
    }

    #[test]
    fn model_limit_table_lookup() {
        assert_eq!(model_limit("anthropic:claude-sonnet-4-6"), 200_000);
        assert_eq!(model_limit("zai:glm-5"), 128_000);
        assert_eq!(model_limit("unknown:model-x"), DEFAULT_MODEL_LIMIT);
    }
}
