//! Solo (team-of-one) orchestration: persisted message history, interactive
//! permission gating over the pending-handle mechanism, and architect mode
//! (strong model plans, fast model executes).

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::agent_loop::{
    self, format_tool_output, LoopError, LoopOptions, LoopOutcome, PendingHandle,
    PermissionDecision, TOOL_TIMEOUT,
};
use crate::bus::Bus;
use crate::event::{topic, Event};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::permissions::Permissions;
use crate::store::{Store, StoreError};
use crate::tools::{ToolError, ToolRegistry};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no permission request is pending")]
    NoPending,
    #[error("a permission request is pending; respond to it first")]
    PendingInProgress,
    #[error("architect plan unparsable: {0}")]
    PlanParse(String),
}

/// What the caller gets back from one send.
#[derive(Debug)]
pub enum SessionReply {
    Text(String),
    /// The loop is suspended; answer with [`Session::respond_permission`].
    PermissionRequired {
        tool: String,
        path: String,
        payload: Value,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionAction {
    AllowOnce,
    /// Allow and record a persistent grant for (tool, path).
    AllowAlways,
    Deny,
}

struct PendingState {
    handle: PendingHandle,
    messages: Vec<Message>,
    tool: String,
    path: String,
}

/// One conversation thread with interactive permission gating.
pub struct Session {
    id: String,
    store: Store,
    bus: Bus,
    permissions: Permissions,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: Arc<project_config::ProjectConfig>,
    project_path: String,
    model: String,
    messages: Vec<Message>,
    persisted_len: usize,
    pending: Option<PendingState>,
    cancel: CancellationToken,
}

impl Session {
    /// Opens (or resumes) a session: ensures the row exists and reloads the
    /// persisted history.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        id: &str,
        title: &str,
        store: Store,
        bus: Bus,
        permissions: Permissions,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        config: Arc<project_config::ProjectConfig>,
        project_path: &str,
    ) -> Result<Self, SessionError> {
        let model = config.model.default.clone();
        store.create_session(id, title, &model, project_path).await?;
        let messages = store.list_messages(id).await?;
        let persisted_len = messages.len();
        Ok(Self {
            id: id.to_string(),
            store,
            bus,
            permissions,
            llm,
            tools,
            config,
            project_path: project_path.to_string(),
            model,
            messages,
            persisted_len,
            pending: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    async fn build_options(&self, model: &str, interactive: bool) -> Result<LoopOptions, SessionError> {
        let mut options = LoopOptions::new(self.llm.clone(), model, default_system_prompt());
        options.tools = self.tools.clone();
        options.project_path = self.project_path.clone();
        options.session_id = Some(self.id.clone());
        options.cancel = self.cancel.child_token();
        options.window.reserved_output = Some(self.config.context.reserved_output_tokens);
        options.window.decision_context_max =
            Some(self.config.context.max_decision_context_tokens);
        options.window.repo_map_max = Some(self.config.context.max_repo_map_tokens);

        // Grants are loaded up front so the (synchronous) permission callback
        // can answer from a snapshot.
        let grants: HashSet<(String, String)> = self
            .permissions
            .grants_for(&self.id)
            .await?
            .into_iter()
            .map(|g| (g.tool, g.scope))
            .collect();
        let auto: Vec<String> = self
            .config
            .permissions
            .auto_approve
            .clone();
        options.check_permission = Some(Arc::new(move |tool: &str, path: &str| {
            let allowed = auto.iter().any(|t| t == tool)
                || grants.contains(&(tool.to_string(), "*".to_string()))
                || grants.contains(&(tool.to_string(), path.to_string()));
            if allowed {
                PermissionDecision::Allowed
            } else if interactive {
                PermissionDecision::Pending(json!({ "tool": tool, "path": path }))
            } else {
                PermissionDecision::Denied(format!(
                    "'{tool}' on '{path}' requires interactive approval"
                ))
            }
        }));
        Ok(options)
    }

    /// Persists everything appended since the last flush.
    async fn persist_new_messages(&mut self) -> Result<(), SessionError> {
        if self.messages.len() > self.persisted_len {
            self.store
                .append_messages(&self.id, &self.messages[self.persisted_len..])
                .await?;
            self.persisted_len = self.messages.len();
        }
        Ok(())
    }

    async fn settle(
        &mut self,
        outcome: Result<LoopOutcome, LoopError>,
    ) -> Result<SessionReply, SessionError> {
        match outcome {
            Ok(LoopOutcome::Done { text, messages, usage }) => {
                self.messages = messages;
                self.persist_new_messages().await?;
                self.store
                    .add_session_usage(
                        &self.id,
                        usage.input_tokens as i64,
                        usage.output_tokens as i64,
                        usage.total_cost,
                    )
                    .await?;
                Ok(SessionReply::Text(text))
            }
            Ok(LoopOutcome::Pending { handle, messages }) => {
                let tool = handle.call.name.clone();
                let path = handle
                    .payload
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or("*")
                    .to_string();
                self.messages = messages.clone();
                self.persist_new_messages().await?;
                self.bus.publish(
                    &topic::session(&self.id),
                    Event::PermissionRequest {
                        session_id: self.id.clone(),
                        tool: tool.clone(),
                        path: path.clone(),
                    },
                );
                let payload = handle.payload.clone();
                self.pending = Some(PendingState {
                    handle,
                    messages,
                    tool: tool.clone(),
                    path: path.clone(),
                });
                Ok(SessionReply::PermissionRequired { tool, path, payload })
            }
            Err(error) => {
                // Keep whatever the loop accumulated before failing.
                self.messages = error.messages().to_vec();
                if let Err(persist_error) = self.persist_new_messages().await {
                    warn!(session = %self.id, %persist_error, "persist after loop error failed");
                }
                Err(error.into())
            }
        }
    }

    /// One user turn. May suspend on a permission request.
    pub async fn send_message(&mut self, text: &str) -> Result<SessionReply, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::PendingInProgress);
        }
        self.messages.push(Message::user(text));
        self.persist_new_messages().await?;
        let options = self.build_options(&self.model.clone(), true).await?;
        let outcome = agent_loop::run(self.messages.clone(), &options).await;
        self.settle(outcome).await
    }

    /// Answers the pending permission request and resumes the loop.
    pub async fn respond_permission(
        &mut self,
        action: PermissionAction,
    ) -> Result<SessionReply, SessionError> {
        let pending = self.pending.take().ok_or(SessionError::NoPending)?;
        let PendingState {
            handle,
            messages,
            tool,
            path,
        } = pending;

        let result_text = match action {
            PermissionAction::Deny => "Error: permission denied by user".to_string(),
            PermissionAction::AllowOnce | PermissionAction::AllowAlways => {
                if action == PermissionAction::AllowAlways {
                    self.permissions.grant(&self.id, &tool, &path).await?;
                }
                self.execute_approved(&handle).await
            }
        };

        // Rebuild options so a fresh grant is visible to the rest of the batch.
        let options = self.build_options(&self.model.clone(), true).await?;
        let outcome = agent_loop::resume(&result_text, handle, messages, &options).await;
        self.settle(outcome).await
    }

    /// Runs the approved tool call outside the loop, mirroring its execution
    /// path (normalization, timeout, canonical formatting).
    async fn execute_approved(&self, handle: &PendingHandle) -> String {
        let call = &handle.call;
        let Some(tool) = self.tools.get(&call.name) else {
            return format!("Error: Tool '{}' not found", call.name);
        };
        let args = crate::tools::normalize_args(&tool.spec(), call.arguments.clone());
        let ctx = crate::tools::ToolContext {
            project_path: self.project_path.clone(),
            session_id: Some(self.id.clone()),
            team_id: None,
            agent_name: None,
            agent_messages: None,
        };
        let result = tokio::time::timeout(TOOL_TIMEOUT, tool.execute(args, &ctx))
            .await
            .unwrap_or(Err(ToolError::Timeout));
        format_tool_output(&result)
    }

    /// Architect mode: the strong model emits a structured JSON plan, then the
    /// fast model executes it item by item. The two phases are independent
    /// loop invocations (and independent for escalation accounting).
    pub async fn architect(&mut self, request: &str) -> Result<ArchitectReport, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::PendingInProgress);
        }
        let architect_model = self.config.model.architect.clone();
        let editor_model = self.config.model.editor.clone();

        // Plan phase: no tools, structured output only.
        let mut plan_options = self.build_options(&architect_model, false).await?;
        plan_options.tools = Arc::new(ToolRegistry::new());
        plan_options.system_prompt = ARCHITECT_PROMPT.to_string();
        let plan_history = vec![Message::user(request)];
        let plan_text = match agent_loop::run(plan_history, &plan_options).await? {
            LoopOutcome::Done { text, .. } => text,
            // The plan phase gates non-interactively, so this cannot suspend.
            LoopOutcome::Pending { .. } => {
                return Err(SessionError::PlanParse(
                    "plan phase suspended unexpectedly".to_string(),
                ))
            }
        };
        let plan = parse_plan(&plan_text)?;

        // Execute phase: one loop run per plan item, non-interactive gating.
        let mut results = Vec::new();
        for (index, item) in plan.iter().enumerate() {
            let mut step_options = self.build_options(&editor_model, false).await?;
            step_options.system_prompt = EDITOR_PROMPT.to_string();
            let step_history = vec![Message::user(format!(
                "Plan step {}/{}: {} {}: {}\n{}",
                index + 1,
                plan.len(),
                item.action,
                item.file,
                item.description,
                item.details,
            ))];
            let output = match agent_loop::run(step_history, &step_options).await {
                Ok(LoopOutcome::Done { text, .. }) => Ok(text),
                Ok(LoopOutcome::Pending { .. }) => {
                    Err("suspended on permission; step skipped".to_string())
                }
                Err(error) => Err(error.to_string()),
            };
            results.push(StepResult {
                item: item.clone(),
                output,
            });
        }

        // The conversation records the request and a compact report.
        self.messages.push(Message::user(request));
        let report = ArchitectReport { plan, results };
        self.messages.push(Message::assistant(report.render()));
        self.persist_new_messages().await?;
        Ok(report)
    }
}

fn default_system_prompt() -> String {
    "You are a coding assistant working in the user's project. Use the available tools to \
     read and change files; give concise final answers."
        .to_string()
}

const ARCHITECT_PROMPT: &str =
    "You are the planning model. Reply with ONLY a JSON array of steps, each \
     {\"file\": string, \"action\": string, \"description\": string, \"details\": string}. \
     No prose around the JSON.";

const EDITOR_PROMPT: &str =
    "You are the executing model. Apply exactly the plan step you are given, using the \
     available tools, then summarize what you changed.";

/// One step of an architect plan.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlanItem {
    pub file: String,
    pub action: String,
    pub description: String,
    pub details: String,
}

#[derive(Debug)]
pub struct StepResult {
    pub item: PlanItem,
    /// Final answer text, or the failure rendered as a string.
    pub output: Result<String, String>,
}

#[derive(Debug)]
pub struct ArchitectReport {
    pub plan: Vec<PlanItem>,
    pub results: Vec<StepResult>,
}

impl ArchitectReport {
    pub fn render(&self) -> String {
        let mut lines = vec![format!("Architect plan: {} step(s)", self.plan.len())];
        for result in &self.results {
            let status = match &result.output {
                Ok(text) => format!("ok: {text}"),
                Err(error) => format!("failed: {error}"),
            };
            lines.push(format!(
                "- {} {}: {status}",
                result.item.action, result.item.file
            ));
        }
        lines.join("\n")
    }
}

/// Lenient extraction: the first `[` through the last `]` must parse as the
/// plan array (models love to wrap JSON in prose).
fn parse_plan(text: &str) -> Result<Vec<PlanItem>, SessionError> {
    let start = text
        .find('[')
        .ok_or_else(|| SessionError::PlanParse("no JSON array found".to_string()))?;
    let end = text
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or_else(|| SessionError::PlanParse("unterminated JSON array".to_string()))?;
    serde_json::from_str(&text[start..=end]).map_err(|e| SessionError::PlanParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_with_surrounding_prose() {
        let text = r#"Here is the plan:
[
  {"file": "src/auth.rs", "action": "edit", "description": "add refresh", "details": "..."},
  {"file": "src/lib.rs", "action": "edit", "description": "export", "details": ""}
]
Good luck!"#;
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].file, "src/auth.rs");
    }

    #[test]
    fn plan_tolerates_missing_fields() {
        let plan = parse_plan(r#"[{"file": "a.rs"}]"#).unwrap();
        assert_eq!(plan[0].action, "");
    }

    #[test]
    fn plan_without_array_is_an_error() {
        assert!(matches!(
            parse_plan("I cannot plan this."),
            Err(SessionError::PlanParse(_))
        ));
    }
}
