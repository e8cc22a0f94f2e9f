//! Team lifecycle: creation, supervised agent spawning, template expansion,
//! and sub-team dissolution.
//!
//! Every agent runs under a monitor task that owns its `JoinHandle`: a panic
//! restarts the worker with its message history reloaded from the store; an
//! orderly exit just releases the bookkeeping.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::event::{topic, Event};
use crate::registry::{RegistryEntry, RegistryKey, WorkerKind};
use crate::route::QUERY_TTL;
use crate::store::{Store, StoreError};
use crate::team::agent::{spawn_worker, AgentDeps, AgentHandle, ToolBuilder};
use crate::team::roles::{resolve_role, RoleConfig};
use crate::tools::{
    ContextOffloadTool, ContextRetrieveTool, DecisionLogTool, DecisionQueryTool,
    PeerAnswerQuestionTool, PeerAskQuestionTool, PeerChangeRoleTool, PeerCreateTaskTool,
    PeerDiscoveryTool, PeerForwardQuestionTool, PeerMessageTool, TeamAssignTool,
    TeamProgressTool, TeamSpawnTool, Tool, ToolRegistry,
};

#[derive(Error, Debug)]
pub enum TeamError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("unknown team template '{0}'")]
    UnknownTemplate(String),
    #[error("agent '{name}' already exists on team {team_id}")]
    AgentExists { team_id: String, name: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owner of every team's workers. Create with [`TeamManager::new`]; the
/// returned `Arc` is the handle the rest of the runtime (and the team tools,
/// through a `Weak`) share.
pub struct TeamManager {
    deps: AgentDeps,
    weak: Weak<TeamManager>,
    agents: DashMap<(String, String), AgentHandle>,
    /// sub-team id → parent team id.
    sub_teams: DashMap<String, String>,
    /// Host-registered tool implementations (files, shell, git, ...).
    external_tools: DashMap<String, Arc<dyn Tool>>,
}

impl TeamManager {
    pub fn new(deps: AgentDeps) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            deps,
            weak: weak.clone(),
            agents: DashMap::new(),
            sub_teams: DashMap::new(),
            external_tools: DashMap::new(),
        })
    }

    pub fn deps(&self) -> &AgentDeps {
        &self.deps
    }

    /// Makes an externally-implemented tool (file I/O, shell, git, LSP, ...)
    /// available to roles that list it.
    pub fn register_external_tool(&self, tool: Arc<dyn Tool>) {
        self.external_tools.insert(tool.name().to_string(), tool);
    }

    /// Inserts the team row and restores any persisted keepers. Returns the
    /// team id.
    pub async fn create_team(&self, name: &str) -> Result<String, TeamError> {
        let team_id = Store::fresh_session_id();
        self.deps
            .store
            .create_session(
                &team_id,
                name,
                &self.deps.config.model.default,
                &self.deps.project_path,
            )
            .await?;
        if let Err(error) = self.deps.keepers.restore(&team_id).await {
            warn!(%team_id, %error, "keeper restore failed");
        }
        info!(%team_id, name, "team created");
        self.deps.bus.publish(
            topic::SYSTEM,
            Event::System {
                message: format!("team '{name}' created ({team_id})"),
            },
        );
        Ok(team_id)
    }

    /// A team whose lifecycle ends back on a parent's topic.
    pub async fn create_sub_team(&self, parent_id: &str, name: &str) -> Result<String, TeamError> {
        let team_id = self.create_team(name).await?;
        self.sub_teams.insert(team_id.clone(), parent_id.to_string());
        Ok(team_id)
    }

    /// Starts a supervised agent and registers it. Unknown roles fail.
    pub async fn spawn_agent(
        self: &Arc<Self>,
        team_id: &str,
        name: &str,
        role_name: &str,
        model_override: Option<String>,
    ) -> Result<AgentHandle, TeamError> {
        let model =
            model_override.unwrap_or_else(|| self.deps.router.select(role_name, None));
        let (handle, join, cancel) = self.start_worker(team_id, name, role_name, &model).await?;
        self.supervise(
            team_id.to_string(),
            name.to_string(),
            role_name.to_string(),
            model,
            join,
            cancel,
        );
        Ok(handle)
    }

    /// One worker incarnation: existence check, role resolution, history
    /// reload, registration, task start. The monitor calls this again on
    /// crash.
    async fn start_worker(
        &self,
        team_id: &str,
        name: &str,
        role_name: &str,
        model: &str,
    ) -> Result<(AgentHandle, tokio::task::JoinHandle<()>, CancellationToken), TeamError> {
        let key = (team_id.to_string(), name.to_string());
        if self.agents.contains_key(&key) {
            return Err(TeamError::AgentExists {
                team_id: team_id.to_string(),
                name: name.to_string(),
            });
        }
        let role = resolve_role(&self.deps.config, role_name)
            .ok_or_else(|| TeamError::UnknownRole(role_name.to_string()))?;

        // Crash recovery: reload whatever the previous incarnation flushed.
        let log_id = Store::agent_log_id(team_id, name);
        let seed = self.deps.store.list_messages(&log_id).await.unwrap_or_default();

        let cancel = CancellationToken::new();
        let mut metadata = serde_json::Map::new();
        metadata.insert("role".into(), json!(role.name));
        metadata.insert("status".into(), json!("idle"));
        metadata.insert("tokens".into(), json!(0));
        self.deps.registry.register(
            RegistryKey::agent(team_id, name),
            RegistryEntry {
                kind: WorkerKind::Agent,
                metadata,
                cancel: cancel.clone(),
            },
        );

        let (handle, join) = spawn_worker(
            team_id.to_string(),
            name.to_string(),
            role,
            model.to_string(),
            self.deps.clone(),
            self.tool_builder(),
            seed,
            cancel.clone(),
        );
        self.agents.insert(key, handle.clone());
        info!(team_id, agent = name, role = role_name, %model, "agent spawned");
        Ok((handle, join, cancel))
    }

    /// Monitor task: owns the worker's JoinHandle; a panic restarts the
    /// worker, an orderly exit (or cancellation) releases the bookkeeping.
    fn supervise(
        &self,
        team_id: String,
        name: String,
        role_name: String,
        model: String,
        first_join: tokio::task::JoinHandle<()>,
        first_cancel: CancellationToken,
    ) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            let mut join = first_join;
            let mut cancel = first_cancel;
            loop {
                let crashed = match join.await {
                    Ok(()) => false,
                    Err(error) => error.is_panic(),
                };
                let Some(manager) = weak.upgrade() else { return };
                manager.agents.remove(&(team_id.clone(), name.clone()));
                manager
                    .deps
                    .registry
                    .unregister(&RegistryKey::agent(team_id.clone(), name.clone()));
                if !crashed || cancel.is_cancelled() {
                    return;
                }
                warn!(%team_id, agent = %name, "agent crashed, restarting");
                match manager.start_worker(&team_id, &name, &role_name, &model).await {
                    Ok((_handle, next_join, next_cancel)) => {
                        join = next_join;
                        cancel = next_cancel;
                    }
                    Err(error) => {
                        warn!(%team_id, agent = %name, %error, "agent restart failed");
                        return;
                    }
                }
            }
        });
    }

    /// Expands `[team.templates.<name>]` into spawned agents; returns their
    /// names.
    pub async fn spawn_from_template(
        self: &Arc<Self>,
        team_id: &str,
        template_name: &str,
    ) -> Result<Vec<String>, TeamError> {
        let template = self
            .deps
            .config
            .team
            .templates
            .get(template_name)
            .cloned()
            .ok_or_else(|| TeamError::UnknownTemplate(template_name.to_string()))?;
        let mut names = Vec::new();
        for agent in &template.agents {
            self.spawn_agent(team_id, &agent.name, &agent.role, None).await?;
            names.push(agent.name.clone());
        }
        Ok(names)
    }

    pub fn agent(&self, team_id: &str, name: &str) -> Option<AgentHandle> {
        self.agents
            .get(&(team_id.to_string(), name.to_string()))
            .map(|h| h.clone())
    }

    pub fn agents_for_team(&self, team_id: &str) -> Vec<AgentHandle> {
        self.agents
            .iter()
            .filter(|entry| entry.key().0 == team_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Stops every worker of a team (agents flush their logs on the way out).
    pub fn shutdown_team(&self, team_id: &str) {
        for handle in self.agents_for_team(team_id) {
            handle.shutdown();
        }
        self.deps.keepers.shutdown_team(team_id);
    }

    /// Stops the sub-team's workers and announces completion on the parent's
    /// topic (or the system topic when no parent is known).
    pub async fn dissolve_sub_team(&self, team_id: &str) -> Result<(), TeamError> {
        self.shutdown_team(team_id);
        self.deps.queries.expire_stale(QUERY_TTL);
        if let Err(error) = self
            .deps
            .store
            .update_session_status(team_id, "dissolved")
            .await
        {
            warn!(team_id, %error, "sub-team status update failed");
        }
        let event = Event::SubTeamCompleted {
            team_id: team_id.to_string(),
        };
        match self.sub_teams.remove(team_id) {
            Some((_, parent)) => self.deps.bus.publish(&topic::team(&parent), event),
            None => self.deps.bus.publish(topic::SYSTEM, event),
        }
        info!(team_id, "sub-team dissolved");
        Ok(())
    }

    fn tool_builder(&self) -> ToolBuilder {
        let deps = self.deps.clone();
        let weak = self.weak.clone();
        let external: Vec<Arc<dyn Tool>> = self
            .external_tools
            .iter()
            .map(|e| e.value().clone())
            .collect();
        Arc::new(move |role: &RoleConfig| {
            let mut registry = ToolRegistry::new();
            for tool_name in &role.tools {
                if let Some(tool) = builtin_tool(tool_name, &deps, &weak) {
                    registry.register(tool);
                } else if let Some(tool) =
                    external.iter().find(|t| t.name() == tool_name)
                {
                    registry.register(tool.clone());
                }
                // Unlisted names (host tools not registered in this process)
                // are simply absent; the loop reports them as not found.
            }
            Arc::new(registry)
        })
    }
}

fn builtin_tool(
    name: &str,
    deps: &AgentDeps,
    manager: &Weak<TeamManager>,
) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        "decision_log" => Arc::new(DecisionLogTool::new(deps.graph.clone())),
        "decision_query" => Arc::new(DecisionQueryTool::new(deps.graph.clone())),
        "context_offload" => Arc::new(ContextOffloadTool::new(deps.keepers.clone())),
        "context_retrieve" => Arc::new(ContextRetrieveTool::new(deps.keepers.clone())),
        "peer_ask_question" => Arc::new(PeerAskQuestionTool::new(deps.queries.clone())),
        "peer_answer_question" => Arc::new(PeerAnswerQuestionTool::new(deps.queries.clone())),
        "peer_forward_question" => Arc::new(PeerForwardQuestionTool::new(deps.queries.clone())),
        "peer_message" => Arc::new(PeerMessageTool::new(deps.bus.clone())),
        "peer_discovery" => Arc::new(PeerDiscoveryTool::new(deps.registry.clone())),
        "peer_change_role" => Arc::new(PeerChangeRoleTool::new(deps.bus.clone())),
        "peer_create_task" => Arc::new(PeerCreateTaskTool::new(deps.tasks.clone())),
        "team_spawn" => Arc::new(TeamSpawnTool::new(manager.clone())),
        "team_assign" => Arc::new(TeamAssignTool::new(deps.tasks.clone())),
        "team_progress" => Arc::new(TeamProgressTool::new(deps.tasks.clone())),
        _ => return None,
    };
    Some(tool)
}
