//! The long-lived team agent: an actor owning its conversation state,
//! subscribed to its team and direct topics, driving the ReAct loop on each
//! user/peer message, and escalating its model after repeated failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent_loop::{self, ExecuteOverride, LoopError, LoopEvent, LoopOptions, LoopOutcome};
use crate::event::{topic, Event};
use crate::limits::RateDecision;
use crate::llm::{LlmClient, UsageTotals};
use crate::message::Message;
use crate::registry::RegistryKey;
use crate::route::{Escalation, ESCALATION_THRESHOLD};
use crate::store::metrics::AgentMetric;
use crate::store::tasks::{TaskStatus, TeamTask};
use crate::store::{Store, StoreError};
use crate::team::roles::{RoleConfig, KEEPER_INDEX_HEADING, KEEPER_INDEX_TOKEN};
use crate::tools::ToolRegistry;

/// Flat token estimate charged against the provider bucket per LLM call.
pub const REQUEST_TOKEN_ESTIMATE: f64 = 1_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Error => "error",
        }
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error("interactive permission approval is not supported in team mode")]
    PermissionNotSupported,
    #[error("agent '{0}' unavailable")]
    Unavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything an agent needs from the runtime. One bundle per team manager,
/// cloned into each worker.
#[derive(Clone)]
pub struct AgentDeps {
    pub store: Store,
    pub bus: crate::bus::Bus,
    pub registry: crate::registry::Registry,
    pub graph: crate::decision::DecisionGraph,
    pub keepers: crate::context::Keepers,
    pub queries: crate::route::QueryRouter,
    pub tasks: crate::team::tasks::TaskManager,
    pub router: crate::route::ModelRouter,
    pub budget: crate::limits::Budget,
    pub limiter: crate::limits::RateLimiter,
    pub cost: crate::limits::CostTracker,
    pub llm: Arc<dyn LlmClient>,
    pub config: Arc<project_config::ProjectConfig>,
    pub project_path: String,
}

/// Rebuilds a role's tool registry (provided by the TeamManager, which owns
/// the Weak self-reference the team tools need).
pub type ToolBuilder = Arc<dyn Fn(&RoleConfig) -> Arc<ToolRegistry> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct AgentSnapshot {
    pub name: String,
    pub role: String,
    pub status: &'static str,
    pub model: String,
    pub message_count: usize,
    pub totals: UsageTotals,
    pub current_task: Option<String>,
}

enum AgentCommand {
    UserMessage {
        text: String,
        reply: oneshot::Sender<Result<String, AgentError>>,
    },
    ChangeRole {
        role: String,
        reply: oneshot::Sender<Result<(), AgentError>>,
    },
    Snapshot {
        reply: oneshot::Sender<AgentSnapshot>,
    },
}

/// Mailbox handle to one agent.
#[derive(Clone, Debug)]
pub struct AgentHandle {
    pub team_id: String,
    pub name: String,
    tx: mpsc::Sender<AgentCommand>,
    pub cancel: CancellationToken,
}

impl AgentHandle {
    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AgentCommand,
    ) -> Result<T, AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| AgentError::Unavailable(self.name.clone()))?;
        reply_rx
            .await
            .map_err(|_| AgentError::Unavailable(self.name.clone()))
    }

    /// Synchronous request/response: runs the full loop before returning.
    pub async fn send_message(&self, text: &str) -> Result<String, AgentError> {
        let text = text.to_string();
        self.send(|reply| AgentCommand::UserMessage { text, reply })
            .await?
    }

    pub async fn change_role(&self, role: &str) -> Result<(), AgentError> {
        let role = role.to_string();
        self.send(|reply| AgentCommand::ChangeRole { role, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<AgentSnapshot, AgentError> {
        self.send(|reply| AgentCommand::Snapshot { reply }).await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub(crate) struct AgentWorker {
    team_id: String,
    name: String,
    role: RoleConfig,
    model: String,
    deps: AgentDeps,
    tools: Arc<ToolRegistry>,
    tool_builder: ToolBuilder,
    status: AgentStatus,
    messages: Vec<Message>,
    peer_context: HashMap<String, Value>,
    current_task: Option<TeamTask>,
    failure_count: u32,
    totals: UsageTotals,
    cancel: CancellationToken,
}

/// Starts the actor task. `seed_messages` is the reloaded history on restart.
pub(crate) fn spawn_worker(
    team_id: String,
    name: String,
    role: RoleConfig,
    model: String,
    deps: AgentDeps,
    tool_builder: ToolBuilder,
    seed_messages: Vec<Message>,
    cancel: CancellationToken,
) -> (AgentHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(32);
    let tools = tool_builder(&role);
    let worker = AgentWorker {
        team_id: team_id.clone(),
        name: name.clone(),
        role,
        model,
        deps,
        tools,
        tool_builder,
        status: AgentStatus::Idle,
        messages: seed_messages,
        peer_context: HashMap::new(),
        current_task: None,
        failure_count: 0,
        totals: UsageTotals::default(),
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(worker.run(rx));
    (
        AgentHandle {
            team_id,
            name,
            tx,
            cancel,
        },
        join,
    )
}

impl AgentWorker {
    fn registry_key(&self) -> RegistryKey {
        RegistryKey::agent(self.team_id.clone(), self.name.clone())
    }

    fn set_status(&mut self, status: AgentStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        let tokens = self.totals.input_tokens + self.totals.output_tokens;
        self.deps.registry.update_metadata(&self.registry_key(), |meta| {
            meta.insert("status".into(), json!(status.as_str()));
            meta.insert("tokens".into(), json!(tokens));
        });
        self.deps.bus.publish(
            &topic::team(&self.team_id),
            Event::AgentStatus {
                agent: self.name.clone(),
                status: status.as_str().to_string(),
            },
        );
    }

    async fn run(mut self, mut rx: mpsc::Receiver<AgentCommand>) {
        let team_topic = topic::team(&self.team_id);
        let direct_topic = topic::agent(&self.team_id, &self.name);
        let mut sub = self
            .deps
            .bus
            .subscribe_many(&[team_topic.as_str(), direct_topic.as_str()]);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        AgentCommand::UserMessage { text, reply } => {
                            let result = self.handle_user_message(text).await;
                            let _ = reply.send(result);
                        }
                        AgentCommand::ChangeRole { role, reply } => {
                            let _ = reply.send(self.handle_change_role(role, false).await);
                        }
                        AgentCommand::Snapshot { reply } => {
                            let _ = reply.send(self.snapshot());
                        }
                    }
                }
                event = sub.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
            }
        }

        // Orderly shutdown: flush the conversation, then release the
        // registration. Publish nothing after this point.
        let log_id = Store::agent_log_id(&self.team_id, &self.name);
        if let Err(error) = self.deps.store.replace_messages(&log_id, &self.messages).await {
            warn!(agent = %self.name, %error, "message flush on shutdown failed");
        }
        self.deps.registry.unregister(&self.registry_key());
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            role: self.role.name.clone(),
            status: self.status.as_str(),
            model: self.model.clone(),
            message_count: self.messages.len(),
            totals: self.totals,
            current_task: self.current_task.as_ref().map(|t| t.id.clone()),
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::ContextUpdate { from, payload } => {
                if from != self.name {
                    self.peer_context.insert(from, payload);
                }
            }
            Event::PeerMessage { from, content } => {
                if from != self.name {
                    self.messages
                        .push(Message::user(format!("[Peer {from}]: {content}")));
                }
            }
            Event::TaskAssigned { task_id, agent_name } => {
                if agent_name == self.name {
                    self.take_task(&task_id).await;
                }
            }
            Event::Query {
                query_id,
                from,
                question,
                enrichments,
            } => {
                if from != self.name {
                    let enrichment_block = if enrichments.is_empty() {
                        String::new()
                    } else {
                        format!("\nKnown so far:\n- {}", enrichments.join("\n- "))
                    };
                    self.messages.push(Message::user(format!(
                        "[Question from {from}, query_id {query_id}]: {question}{enrichment_block}\n\
                         Answer with peer_answer_question or pass it on with \
                         peer_forward_question, quoting query_id {query_id}."
                    )));
                }
            }
            Event::QueryAnswer {
                query_id,
                from,
                answer,
                enrichments,
            } => {
                let enrichment_block = if enrichments.is_empty() {
                    String::new()
                } else {
                    format!(" (gathered along the way: {})", enrichments.join("; "))
                };
                self.messages.push(Message::user(format!(
                    "[Answer from {from} to query {query_id}]: {answer}{enrichment_block}"
                )));
            }
            Event::KeeperCreated {
                keeper_id,
                topic: keeper_topic,
                source_agent,
            } => {
                if source_agent != self.name {
                    self.messages.push(Message::system(format!(
                        "A context keeper [{keeper_id}] now holds \"{keeper_topic}\" from \
                         {source_agent}; query it with context_retrieve."
                    )));
                }
            }
            Event::RoleChangeRequest { agent, role } => {
                if agent == self.name {
                    info!(agent = %self.name, requested_role = %role, "role change requested");
                }
            }
            // Status broadcasts, telemetry, and lifecycle notices don't feed
            // the conversation.
            _ => {}
        }
    }

    async fn take_task(&mut self, task_id: &str) {
        let task = match self.deps.tasks.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(agent = %self.name, task_id, "assigned task not found");
                return;
            }
            Err(error) => {
                warn!(agent = %self.name, task_id, %error, "task load failed");
                return;
            }
        };
        self.model = self.deps.router.select(&self.role.name, Some(&task));
        let _ = self
            .deps
            .tasks
            .update_progress(task_id, TaskStatus::InProgress, None, 0.0, 0)
            .await;
        self.prefetch_task_context(&task).await;
        self.messages.push(Message::user(format!(
            "You were assigned task {task_id}: {}\n{}",
            task.title, task.description
        )));
        self.current_task = Some(task);
    }

    /// Best-effort: if a keeper's topic overlaps the task title, pull matching
    /// context in as a system message.
    async fn prefetch_task_context(&mut self, task: &TeamTask) {
        let title_words: Vec<String> = task
            .title
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        for keeper in self.deps.keepers.for_team(&self.team_id) {
            let keeper_topic = keeper.topic.to_lowercase();
            if !title_words.iter().any(|w| keeper_topic.contains(w.as_str())) {
                continue;
            }
            if let Ok(messages) = keeper.retrieve(&task.title).await {
                if !messages.is_empty() {
                    let block = crate::context::retrieval::render_lines(&messages);
                    self.messages.push(Message::system(format!(
                        "Relevant context from keeper [{}] \"{}\":\n{block}",
                        keeper.id, keeper.topic
                    )));
                }
            }
            break;
        }
    }

    fn build_loop_options(&self, keeper_index: &str) -> LoopOptions {
        let mut options = LoopOptions::new(
            self.deps.llm.clone(),
            self.model.clone(),
            inject_keeper_index(&self.role.system_prompt, keeper_index),
        );
        options.tools = self.tools.clone();
        options.max_iterations = self.role.max_iterations;
        options.project_path = self.deps.project_path.clone();
        options.team_id = Some(self.team_id.clone());
        options.agent_name = Some(self.name.clone());
        options.cancel = self.cancel.child_token();
        options.window.decision_context_max =
            Some(self.deps.config.context.max_decision_context_tokens);
        options.window.repo_map_max = Some(self.deps.config.context.max_repo_map_tokens);
        options.window.reserved_output = Some(self.deps.config.context.reserved_output_tokens);

        // Rate/budget gate.
        let budget = self.deps.budget.clone();
        let limiter = self.deps.limiter.clone();
        let team_id = self.team_id.clone();
        options.rate_limit = Some(Arc::new(move |provider: &str| -> RateDecision {
            budget.acquire_or_budget(&team_id, provider, &limiter, REQUEST_TOKEN_ESTIMATE)
        }));

        // Usage accounting + telemetry rebroadcast.
        let budget = self.deps.budget.clone();
        let bus = self.deps.bus.clone();
        let team_id = self.team_id.clone();
        let agent = self.name.clone();
        let model = self.model.clone();
        let task_id = self.current_task.as_ref().map(|t| t.id.clone());
        options.on_event = Some(Arc::new(move |event: &LoopEvent| match event {
            LoopEvent::Usage(usage) => {
                budget.record_usage(&team_id, &agent, &model, usage, task_id.as_deref());
                bus.publish(
                    &topic::telemetry_team(&team_id),
                    Event::Usage {
                        team_id: team_id.clone(),
                        agent: agent.clone(),
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        cost: usage.total_cost,
                    },
                );
            }
            LoopEvent::ToolExecuting { name, .. } => {
                bus.publish(
                    &topic::telemetry_team(&team_id),
                    Event::System {
                        message: format!("{agent}: running {name}"),
                    },
                );
            }
            LoopEvent::ToolComplete { name, .. } => {
                bus.publish(
                    &topic::telemetry_team(&team_id),
                    Event::System {
                        message: format!("{agent}: {name} complete"),
                    },
                );
            }
            _ => {}
        }));

        // Offload tool gets the message snapshot; everything else runs as-is.
        let snapshot = self.messages.clone();
        let execute: ExecuteOverride = Arc::new(move |tool, args, mut ctx| {
            if tool.name() == "context_offload" {
                ctx.agent_messages = Some(snapshot.clone());
            }
            Box::pin(async move { tool.execute(args, &ctx).await })
        });
        options.execute_override = Some(execute);

        options
    }

    async fn handle_user_message(&mut self, text: String) -> Result<String, AgentError> {
        self.set_status(AgentStatus::Working);
        self.messages.push(Message::user(text));
        let result = self.drive_loop().await;
        self.set_status(AgentStatus::Idle);
        result
    }

    async fn drive_loop(&mut self) -> Result<String, AgentError> {
        let keeper_index = self.deps.keepers.index_block(&self.team_id).await;
        let options = self.build_loop_options(&keeper_index);
        let started = std::time::Instant::now();

        match agent_loop::run(self.messages.clone(), &options).await {
            Ok(LoopOutcome::Done { text, messages, usage }) => {
                self.finish_success(messages, usage, started).await;
                Ok(text)
            }
            Ok(LoopOutcome::Pending { .. }) => Err(AgentError::PermissionNotSupported),
            Err(error) => self.try_escalate(error, started).await,
        }
    }

    /// One escalation attempt per message: bump the model, re-run the loop on
    /// the same conversation.
    async fn try_escalate(
        &mut self,
        error: LoopError,
        started: std::time::Instant,
    ) -> Result<String, AgentError> {
        let Some(task) = self.current_task.clone() else {
            return Err(error.into());
        };
        self.deps
            .router
            .record_failure(&self.team_id, &self.name, &task.id);

        let eligible = self.deps.router.escalation_enabled()
            && self.failure_count < 1
            && self.deps.router.should_escalate(
                &self.team_id,
                &self.name,
                &task.id,
                ESCALATION_THRESHOLD,
            )
            && matches!(
                error,
                LoopError::Llm { .. } | LoopError::MaxIterations { .. }
            );
        if !eligible {
            self.finish_failure(&task, started).await;
            return Err(error.into());
        }

        let next = match self.deps.router.escalate(&self.model) {
            Escalation::Next(model) => model,
            Escalation::MaxReached | Escalation::Disabled => {
                self.finish_failure(&task, started).await;
                return Err(error.into());
            }
        };
        info!(agent = %self.name, from = %self.model, to = %next, "model escalation");
        self.deps
            .cost
            .record_escalation(&self.team_id, &self.name, &self.model, &next);
        self.deps.bus.publish(
            &topic::telemetry_team(&self.team_id),
            Event::Escalation {
                team_id: self.team_id.clone(),
                agent: self.name.clone(),
                from_model: self.model.clone(),
                to_model: next.clone(),
            },
        );
        self.model = next;
        self.failure_count += 1;

        let keeper_index = self.deps.keepers.index_block(&self.team_id).await;
        let options = self.build_loop_options(&keeper_index);
        match agent_loop::run(self.messages.clone(), &options).await {
            Ok(LoopOutcome::Done { text, messages, usage }) => {
                self.finish_success(messages, usage, started).await;
                Ok(text)
            }
            Ok(LoopOutcome::Pending { .. }) => Err(AgentError::PermissionNotSupported),
            Err(error) => {
                self.deps
                    .router
                    .record_failure(&self.team_id, &self.name, &task.id);
                self.finish_failure(&task, started).await;
                Err(error.into())
            }
        }
    }

    async fn finish_success(
        &mut self,
        messages: Vec<Message>,
        usage: UsageTotals,
        started: std::time::Instant,
    ) {
        self.messages = messages;
        self.totals.input_tokens += usage.input_tokens;
        self.totals.output_tokens += usage.output_tokens;
        self.totals.total_cost += usage.total_cost;
        self.totals.requests += usage.requests;
        self.failure_count = 0;

        if let Some(task) = self.current_task.take() {
            self.deps
                .router
                .record_success(&self.team_id, &self.name, &task.id);
            let result_text = self
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let _ = self
                .deps
                .tasks
                .update_progress(
                    &task.id,
                    TaskStatus::Done,
                    Some(&result_text),
                    usage.total_cost,
                    usage.input_tokens + usage.output_tokens,
                )
                .await;
            self.record_metric(&task, true, &usage, started).await;
        }
    }

    async fn finish_failure(&mut self, task: &TeamTask, started: std::time::Instant) {
        self.current_task = None;
        let _ = self
            .deps
            .tasks
            .update_progress(&task.id, TaskStatus::Failed, None, 0.0, 0)
            .await;
        let usage = UsageTotals::default();
        self.record_metric(task, false, &usage, started).await;
    }

    async fn record_metric(
        &self,
        task: &TeamTask,
        success: bool,
        usage: &UsageTotals,
        started: std::time::Instant,
    ) {
        let metric = AgentMetric {
            team_id: self.team_id.clone(),
            agent_name: self.name.clone(),
            role: self.role.name.clone(),
            model: self.model.clone(),
            task_type: task.title.clone(),
            success,
            cost_usd: usage.total_cost,
            tokens_used: usage.input_tokens + usage.output_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            project_path: self.deps.project_path.clone(),
        };
        if let Err(error) = self.deps.store.insert_metric(metric).await {
            warn!(agent = %self.name, %error, "metric insert failed");
        }
    }

    async fn handle_change_role(
        &mut self,
        new_role: String,
        _require_approval: bool,
    ) -> Result<(), AgentError> {
        let role = crate::team::roles::resolve_role(&self.deps.config, &new_role)
            .ok_or_else(|| AgentError::UnknownRole(new_role.clone()))?;
        let old_role = self.role.name.clone();
        self.tools = (self.tool_builder)(&role);
        self.role = role;
        self.deps.registry.update_metadata(&self.registry_key(), |meta| {
            meta.insert("role".into(), json!(new_role));
        });

        let mut attrs = crate::decision::NewNode::new(
            crate::decision::NodeType::Observation,
            format!("Role change: {} {} -> {}", self.name, old_role, new_role),
        );
        attrs.session_id = Some(self.team_id.clone());
        attrs.agent_name = Some(self.name.clone());
        if let Err(error) = self.deps.graph.add_node(attrs).await {
            warn!(agent = %self.name, %error, "role-change observation failed");
        }

        self.deps.bus.publish(
            &topic::team(&self.team_id),
            Event::RoleChanged {
                agent: self.name.clone(),
                old_role,
                new_role,
            },
        );
        Ok(())
    }
}

/// Substitutes the keeper index into a system prompt: at the `{keeper_index}`
/// token if present, else appended under a fixed heading (only when there is
/// an index to show).
pub fn inject_keeper_index(system_prompt: &str, keeper_index: &str) -> String {
    if system_prompt.contains(KEEPER_INDEX_TOKEN) {
        return system_prompt.replace(KEEPER_INDEX_TOKEN, keeper_index);
    }
    if keeper_index.is_empty() {
        return system_prompt.to_string();
    }
    format!("{system_prompt}\n\n{KEEPER_INDEX_HEADING}\n{keeper_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeper_index_replaces_token() {
        let prompt = format!("You are a lead.\n\n{KEEPER_INDEX_TOKEN}");
        let out = inject_keeper_index(&prompt, "- [k1] \"auth\" by alice (10 tokens)");
        assert!(out.contains("- [k1]"));
        assert!(!out.contains(KEEPER_INDEX_TOKEN));
    }

    #[test]
    fn keeper_index_appends_under_heading_when_token_absent() {
        let out = inject_keeper_index("You are a coder.", "- [k1] \"auth\" by alice (10 tokens)");
        assert!(out.contains(KEEPER_INDEX_HEADING));
        assert!(out.ends_with("(10 tokens)"));

        // No keepers, no heading.
        let out = inject_keeper_index("You are a coder.", "");
        assert_eq!(out, "You are a coder.");
    }
}
