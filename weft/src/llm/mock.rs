//! Scripted mock client for tests: a queue of canned responses/failures,
//! popped one per `generate` call.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmResponse, Usage};
use crate::message::{Message, ToolCallRequest};

type Scripted = Result<LlmResponse, String>;

/// Mock LLM with a FIFO script. When the script runs dry it answers with a
/// fixed fallback so open-ended tests terminate.
#[derive(Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<Scripted>>,
    /// Models seen by `generate`, in call order.
    calls: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a final-answer response.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Ok(LlmResponse {
            text: text.into(),
            tool_calls: Vec::new(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_cost: 0.001,
            },
        }));
    }

    /// Queue a tool-call response.
    pub fn push_tool_calls(&self, text: impl Into<String>, calls: Vec<ToolCallRequest>) {
        self.push(Ok(LlmResponse {
            text: text.into(),
            tool_calls: calls,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_cost: 0.001,
            },
        }));
    }

    /// Queue a full response (caller controls usage).
    pub fn push_response(&self, response: LlmResponse) {
        self.push(Ok(response));
    }

    /// Queue a failure.
    pub fn push_error(&self, reason: impl Into<String>) {
        self.push(Err(reason.into()));
    }

    fn push(&self, entry: Scripted) {
        self.script.lock().unwrap().push_back(entry);
    }

    /// Models passed to `generate` so far (escalation tests assert on these).
    pub fn models_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(
        &self,
        model: &str,
        _messages: &[Message],
        _tools: &[serde_json::Value],
    ) -> Result<LlmResponse, LlmError> {
        self.calls.lock().unwrap().push(model.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(LlmError::Call(reason)),
            None => Ok(LlmResponse {
                text: "(mock: script exhausted)".to_string(),
                tool_calls: Vec::new(),
                usage: Usage::default(),
            }),
        }
    }
}
