//! The ReAct iterator: assemble messages, call the LLM, classify, dispatch
//! tool calls, suspend on pending permission, resume.
//!
//! Control flow is an explicit iterator, not a hidden generator: [`run`]
//! returns a terminal outcome or a serializable [`PendingHandle`] capturing
//! the interrupted tool batch, and [`resume`] accepts that handle plus the
//! tool-result text. One iteration:
//!
//! 1. build the context window;
//! 2. rate/budget gate (one bounded wait, then fail);
//! 3. LLM call inside a telemetry span;
//! 4. final answer → done; tool calls → append the assistant turn and walk
//!    the batch in declared order, appending one `role=tool` reply per call.
//!
//! Missing tools, denied permissions, tool errors, and tool timeouts are
//! rendered as error text replies and the loop continues; LLM failures,
//! rate/budget exhaustion, and the iteration cap terminate the run.

mod format;
mod options;

pub use format::format_tool_output;
pub use options::{
    EventCallback, ExecuteOverride, LoopEvent, LoopOptions, PermissionCallback,
    PermissionDecision, RateCallback, DEFAULT_MAX_ITERATIONS, LLM_TIMEOUT, RATE_WAIT_CAP,
    TOOL_TIMEOUT,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::Instrument;

use crate::context::window;
use crate::limits::RateDecision;
use crate::llm::{Classified, ModelRef, UsageTotals};
use crate::message::{Message, ToolCallRequest};
use crate::tools::{normalize_args, ToolError};

/// Terminal outcomes of a loop run.
#[derive(Debug)]
pub enum LoopOutcome {
    /// The model produced a final answer.
    Done {
        text: String,
        messages: Vec<Message>,
        usage: UsageTotals,
    },
    /// A tool call is waiting for interactive approval.
    Pending {
        handle: PendingHandle,
        messages: Vec<Message>,
    },
}

/// Serializable continuation for a suspended batch: the call that asked for
/// approval, the calls still to run, the iteration counter, running usage, and
/// the opaque payload from the permission callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingHandle {
    pub call: ToolCallRequest,
    pub remaining: Vec<ToolCallRequest>,
    pub iteration: u32,
    pub usage: UsageTotals,
    pub payload: Value,
}

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("max iterations ({limit}) exceeded")]
    MaxIterations { limit: u32, messages: Vec<Message> },
    #[error("rate limited by provider '{provider}'")]
    RateLimited { provider: String, messages: Vec<Message> },
    #[error("Budget exceeded ({scope}); cost ceiling reached, no further LLM calls")]
    BudgetExceeded { scope: String, messages: Vec<Message> },
    #[error("llm call failed: {reason}")]
    Llm { reason: String, messages: Vec<Message> },
    #[error("run cancelled")]
    Cancelled { messages: Vec<Message> },
}

impl LoopError {
    /// History accumulated up to the failure.
    pub fn messages(&self) -> &[Message] {
        match self {
            LoopError::MaxIterations { messages, .. }
            | LoopError::RateLimited { messages, .. }
            | LoopError::BudgetExceeded { messages, .. }
            | LoopError::Llm { messages, .. }
            | LoopError::Cancelled { messages } => messages,
        }
    }
}

enum Interrupt {
    RateLimited(String),
    BudgetExceeded(String),
    Llm(String),
    Cancelled,
}

enum BatchOutcome {
    Completed,
    Pending(PendingHandle),
}

/// Runs the loop over `history` until done, pending, or error.
pub async fn run(history: Vec<Message>, options: &LoopOptions) -> Result<LoopOutcome, LoopError> {
    run_inner(history, 0, UsageTotals::default(), None, options).await
}

/// Appends the tool result for the suspended call, then continues the batch
/// and the loop. Same three possible outcomes as [`run`].
pub async fn resume(
    tool_result_text: &str,
    handle: PendingHandle,
    mut messages: Vec<Message>,
    options: &LoopOptions,
) -> Result<LoopOutcome, LoopError> {
    let reply = Message::tool(tool_result_text, handle.call.id.clone());
    options.emit(LoopEvent::ToolComplete {
        id: handle.call.id.clone(),
        name: handle.call.name.clone(),
        output: tool_result_text.to_string(),
    });
    options.emit(LoopEvent::NewMessage(reply.clone()));
    messages.push(reply);
    run_inner(
        messages,
        handle.iteration,
        handle.usage,
        Some(handle.remaining),
        options,
    )
    .await
}

async fn run_inner(
    mut messages: Vec<Message>,
    mut iteration: u32,
    mut totals: UsageTotals,
    pending_batch: Option<Vec<ToolCallRequest>>,
    options: &LoopOptions,
) -> Result<LoopOutcome, LoopError> {
    // Finish an interrupted batch before calling the LLM again.
    if let Some(batch) = pending_batch {
        match run_batch(&mut messages, &batch, iteration, &totals, options).await {
            Ok(BatchOutcome::Completed) => iteration += 1,
            Ok(BatchOutcome::Pending(handle)) => {
                return Ok(LoopOutcome::Pending { handle, messages })
            }
            Err(interrupt) => return Err(raise(interrupt, messages)),
        }
    }

    loop {
        if iteration >= options.max_iterations {
            return Err(LoopError::MaxIterations {
                limit: options.max_iterations,
                messages,
            });
        }

        if let Err(interrupt) = rate_gate(options).await {
            return Err(raise(interrupt, messages));
        }

        let mut window_options = options.window.clone();
        window_options.model = options.model.clone();
        let windowed = window::build_messages(&messages, &options.system_prompt, &window_options);

        let response = match llm_call(&windowed, options).await {
            Ok(response) => response,
            Err(interrupt) => return Err(raise(interrupt, messages)),
        };
        totals.add(&response.usage);

        match response.classify() {
            Classified::FinalAnswer(text) => {
                let reply = Message::assistant(text);
                messages.push(reply.clone());
                options.emit(LoopEvent::NewMessage(reply));
                options.emit(LoopEvent::Usage(response.usage));
                return Ok(LoopOutcome::Done {
                    text: text.to_string(),
                    messages,
                    usage: totals,
                });
            }
            Classified::ToolCalls(calls) => {
                let calls = calls.to_vec();
                let turn = Message::assistant_with_calls(response.text.clone(), calls.clone());
                messages.push(turn.clone());
                options.emit(LoopEvent::NewMessage(turn));
                options.emit(LoopEvent::ToolCallsReceived { calls: calls.clone() });

                match run_batch(&mut messages, &calls, iteration, &totals, options).await {
                    Ok(BatchOutcome::Completed) => {
                        options.emit(LoopEvent::Usage(response.usage));
                        iteration += 1;
                    }
                    Ok(BatchOutcome::Pending(handle)) => {
                        return Ok(LoopOutcome::Pending { handle, messages })
                    }
                    Err(interrupt) => return Err(raise(interrupt, messages)),
                }
            }
        }
    }
}

fn raise(interrupt: Interrupt, messages: Vec<Message>) -> LoopError {
    match interrupt {
        Interrupt::RateLimited(provider) => LoopError::RateLimited { provider, messages },
        Interrupt::BudgetExceeded(scope) => LoopError::BudgetExceeded { scope, messages },
        Interrupt::Llm(reason) => LoopError::Llm { reason, messages },
        Interrupt::Cancelled => LoopError::Cancelled { messages },
    }
}

/// Rate/budget gate: on `Wait`, sleep (capped) and re-acquire once.
async fn rate_gate(options: &LoopOptions) -> Result<(), Interrupt> {
    let Some(rate_limit) = &options.rate_limit else {
        return Ok(());
    };
    let provider = ModelRef::parse(&options.model).provider;
    match rate_limit(&provider) {
        RateDecision::Ok => Ok(()),
        RateDecision::BudgetExceeded { scope } => Err(Interrupt::BudgetExceeded(scope)),
        RateDecision::Wait { ms } => {
            let wait = std::time::Duration::from_millis(ms).min(RATE_WAIT_CAP);
            tokio::time::sleep(wait).await;
            match rate_limit(&provider) {
                RateDecision::Ok => Ok(()),
                RateDecision::Wait { .. } => Err(Interrupt::RateLimited(provider)),
                RateDecision::BudgetExceeded { scope } => Err(Interrupt::BudgetExceeded(scope)),
            }
        }
    }
}

async fn llm_call(
    windowed: &[Message],
    options: &LoopOptions,
) -> Result<crate::llm::LlmResponse, Interrupt> {
    let descriptors = options.tools.descriptors();
    let span = tracing::info_span!(
        "llm_call",
        model = %options.model,
        agent = options.agent_name.as_deref().unwrap_or("session"),
    );
    let started = std::time::Instant::now();
    let call = async {
        tokio::time::timeout(
            options.llm_timeout,
            options.llm.generate(&options.model, windowed, &descriptors),
        )
        .await
    }
    .instrument(span);

    let result = tokio::select! {
        _ = options.cancel.cancelled() => return Err(Interrupt::Cancelled),
        result = call => result,
    };
    match result {
        Ok(Ok(response)) => {
            tracing::debug!(
                model = %options.model,
                duration_ms = started.elapsed().as_millis() as u64,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "llm call complete"
            );
            Ok(response)
        }
        Ok(Err(error)) => Err(Interrupt::Llm(error.to_string())),
        Err(_) => Err(Interrupt::Llm(format!(
            "timed out after {} s",
            options.llm_timeout.as_secs()
        ))),
    }
}

/// Path a permission check applies to, derived from the call arguments.
fn derived_path(arguments: &Value) -> String {
    for key in ["file_path", "path"] {
        if let Some(path) = arguments.get(key).and_then(Value::as_str) {
            return path.to_string();
        }
    }
    "*".to_string()
}

/// Walks the calls in declared order, appending one tool reply per call.
async fn run_batch(
    messages: &mut Vec<Message>,
    calls: &[ToolCallRequest],
    iteration: u32,
    totals: &UsageTotals,
    options: &LoopOptions,
) -> Result<BatchOutcome, Interrupt> {
    for (index, call) in calls.iter().enumerate() {
        let Some(tool) = options.tools.get(&call.name) else {
            push_tool_reply(
                messages,
                options,
                call,
                format!("Error: Tool '{}' not found", call.name),
            );
            continue;
        };

        let path = derived_path(&call.arguments);
        let decision = match &options.check_permission {
            Some(check) => check(&call.name, &path),
            None => PermissionDecision::Allowed,
        };
        match decision {
            PermissionDecision::Denied(reason) => {
                let text = if reason.is_empty() {
                    "Error: permission denied".to_string()
                } else {
                    format!("Error: permission denied: {reason}")
                };
                push_tool_reply(messages, options, call, text);
                continue;
            }
            PermissionDecision::Pending(payload) => {
                return Ok(BatchOutcome::Pending(PendingHandle {
                    call: call.clone(),
                    remaining: calls[index + 1..].to_vec(),
                    iteration,
                    usage: *totals,
                    payload,
                }));
            }
            PermissionDecision::Allowed => {}
        }

        options.emit(LoopEvent::ToolExecuting {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        let args = normalize_args(&tool.spec(), call.arguments.clone());
        let ctx = options.tool_context();
        let execution = async {
            match &options.execute_override {
                Some(execute) => execute(tool.clone(), args, ctx).await,
                None => tool.execute(args, &ctx).await,
            }
        };
        let result = tokio::select! {
            _ = options.cancel.cancelled() => return Err(Interrupt::Cancelled),
            result = tokio::time::timeout(options.tool_timeout, execution) => {
                result.unwrap_or(Err(ToolError::Timeout))
            }
        };
        let text = format_tool_output(&result);
        options.emit(LoopEvent::ToolComplete {
            id: call.id.clone(),
            name: call.name.clone(),
            output: text.clone(),
        });
        push_tool_reply(messages, options, call, text);
    }
    Ok(BatchOutcome::Completed)
}

fn push_tool_reply(
    messages: &mut Vec<Message>,
    options: &LoopOptions,
    call: &ToolCallRequest,
    text: String,
) {
    let reply = Message::tool(text, call.id.clone());
    options.emit(LoopEvent::NewMessage(reply.clone()));
    messages.push(reply);
}
