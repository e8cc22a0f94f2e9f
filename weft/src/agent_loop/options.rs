//! Options bundle and callback types for the ReAct loop.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::window::WindowOptions;
use crate::limits::RateDecision;
use crate::llm::{LlmClient, Usage};
use crate::message::{Message, ToolCallRequest};
use crate::tools::{Tool, ToolContext, ToolError, ToolOutput, ToolRegistry};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Wall-clock timeout for one LLM call.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-tool execution timeout.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Cap on a single rate-limit wait.
pub const RATE_WAIT_CAP: Duration = Duration::from_secs(5);

/// Events surfaced through the per-event callback.
#[derive(Clone, Debug)]
pub enum LoopEvent {
    NewMessage(Message),
    ToolCallsReceived { calls: Vec<ToolCallRequest> },
    ToolExecuting { id: String, name: String },
    ToolComplete { id: String, name: String, output: String },
    Usage(Usage),
}

/// Answer from the permission callback for one tool call.
#[derive(Clone, Debug)]
pub enum PermissionDecision {
    Allowed,
    Denied(String),
    /// Suspend the loop; the payload travels inside the pending handle.
    Pending(Value),
}

pub type EventCallback = Arc<dyn Fn(&LoopEvent) + Send + Sync>;

/// `(tool_name, derived_path) -> decision`.
pub type PermissionCallback = Arc<dyn Fn(&str, &str) -> PermissionDecision + Send + Sync>;

/// `(provider) -> decision`.
pub type RateCallback = Arc<dyn Fn(&str) -> RateDecision + Send + Sync>;

/// Replaces the default execute path. The Agent uses this to inject its
/// message snapshot into the context for the offload tool.
pub type ExecuteOverride = Arc<
    dyn Fn(Arc<dyn Tool>, Value, ToolContext) -> BoxFuture<'static, Result<ToolOutput, ToolError>>
        + Send
        + Sync,
>;

/// Everything one loop run needs besides the history.
#[derive(Clone)]
pub struct LoopOptions {
    pub llm: Arc<dyn LlmClient>,
    pub model: String,
    pub system_prompt: String,
    pub tools: Arc<ToolRegistry>,
    pub max_iterations: u32,
    pub project_path: String,
    pub session_id: Option<String>,
    pub team_id: Option<String>,
    pub agent_name: Option<String>,
    /// Window overrides; `model` is filled in from `self.model` at run time.
    pub window: WindowOptions,
    pub on_event: Option<EventCallback>,
    pub check_permission: Option<PermissionCallback>,
    pub rate_limit: Option<RateCallback>,
    pub execute_override: Option<ExecuteOverride>,
    pub cancel: CancellationToken,
    pub llm_timeout: Duration,
    pub tool_timeout: Duration,
}

impl LoopOptions {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            system_prompt: system_prompt.into(),
            tools: Arc::new(ToolRegistry::new()),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            project_path: String::new(),
            session_id: None,
            team_id: None,
            agent_name: None,
            window: WindowOptions::default(),
            on_event: None,
            check_permission: None,
            rate_limit: None,
            execute_override: None,
            cancel: CancellationToken::new(),
            llm_timeout: LLM_TIMEOUT,
            tool_timeout: TOOL_TIMEOUT,
        }
    }

    pub(super) fn emit(&self, event: LoopEvent) {
        if let Some(callback) = &self.on_event {
            callback(&event);
        }
    }

    pub(super) fn tool_context(&self) -> ToolContext {
        ToolContext {
            project_path: self.project_path.clone(),
            session_id: self.session_id.clone(),
            team_id: self.team_id.clone(),
            agent_name: self.agent_name.clone(),
            agent_messages: None,
        }
    }
}
