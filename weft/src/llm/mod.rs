//! LLM client abstraction for the ReAct loop.
//!
//! The loop depends on a callable that returns assistant text, optional tool
//! calls, and usage tallies; this module defines the trait and a scripted mock.
//! The concrete HTTP transport, token counting, and response parsing live in an
//! external client crate that implements [`LlmClient`].

mod mock;

pub use mock::MockLlm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::message::ToolCallRequest;

/// Token and cost usage for one LLM call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Running totals across loop iterations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub requests: u64,
}

impl UsageTotals {
    pub fn add(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_cost += usage.total_cost;
        self.requests += 1;
    }
}

/// Response from one LLM completion.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// Assistant text (may be empty alongside tool calls).
    pub text: String,
    /// Structured tool calls; empty means final answer.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

/// Classification of a response: act (tool calls) or done (final answer).
#[derive(Debug, PartialEq)]
pub enum Classified<'a> {
    ToolCalls(&'a [ToolCallRequest]),
    FinalAnswer(&'a str),
}

impl LlmResponse {
    pub fn classify(&self) -> Classified<'_> {
        if self.tool_calls.is_empty() {
            Classified::FinalAnswer(&self.text)
        } else {
            Classified::ToolCalls(&self.tool_calls)
        }
    }
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm call failed: {0}")]
    Call(String),
    #[error("llm call timed out after {0} s")]
    Timeout(u64),
}

/// A model identifier `<provider>:<model_id>`. Split on the first colon; a
/// missing provider falls back to the configured default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

/// Provider assumed when a model string has no `provider:` prefix.
pub const DEFAULT_PROVIDER: &str = "anthropic";

impl ModelRef {
    pub fn parse(model: &str) -> ModelRef {
        match model.split_once(':') {
            Some((provider, model_id)) if !provider.is_empty() => ModelRef {
                provider: provider.to_string(),
                model_id: model_id.to_string(),
            },
            _ => ModelRef {
                provider: DEFAULT_PROVIDER.to_string(),
                model_id: model.trim_start_matches(':').to_string(),
            },
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

/// External LLM client: one call in, text + tool calls + usage out.
///
/// **Interaction**: called by the loop inside a `tracing` span; implementations
/// own transport-level retry and cancellation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate one turn. `tools` is the list of JSON-schema tool descriptors
    /// advertised to the model (may be empty).
    async fn generate(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[serde_json::Value],
    ) -> Result<LlmResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_ref_splits_on_first_colon() {
        let m = ModelRef::parse("anthropic:claude-sonnet-4-6");
        assert_eq!(m.provider, "anthropic");
        assert_eq!(m.model_id, "claude-sonnet-4-6");

        let odd = ModelRef::parse("openai:ft:gpt-5:org");
        assert_eq!(odd.provider, "openai");
        assert_eq!(odd.model_id, "ft:gpt-5:org");
    }

    #[test]
    fn model_ref_defaults_provider() {
        let m = ModelRef::parse("claude-sonnet-4-6");
        assert_eq!(m.provider, DEFAULT_PROVIDER);
        assert_eq!(m.model_id, "claude-sonnet-4-6");
    }

    #[test]
    fn classify_empty_tool_calls_is_final_answer() {
        let r = LlmResponse {
            text: "done".into(),
            ..Default::default()
        };
        assert_eq!(r.classify(), Classified::FinalAnswer("done"));
    }

    #[test]
    fn usage_totals_accumulate() {
        let mut totals = UsageTotals::default();
        totals.add(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_cost: 0.01,
        });
        totals.add(&Usage {
            input_tokens: 20,
            output_tokens: 10,
            total_cost: 0.02,
        });
        assert_eq!(totals.input_tokens, 30);
        assert_eq!(totals.requests, 2);
        assert!((totals.total_cost - 0.03).abs() < 1e-9);
    }
}
