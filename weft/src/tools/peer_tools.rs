//! Peer-to-peer tools: questions through the QueryRouter, direct messages,
//! discovery, and role-change requests over the bus.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    optional_str, require_same_team, require_str, ParamSpec, Tool, ToolContext, ToolError,
    ToolOutput, ToolSpec,
};
use crate::bus::Bus;
use crate::event::{topic, Event};
use crate::registry::Registry;
use crate::route::{AskOptions, QueryRouter, RouteError};

fn own_agent(ctx: &ToolContext) -> Result<String, ToolError> {
    ctx.agent_name
        .clone()
        .ok_or_else(|| ToolError::Message("not running as a team agent".to_string()))
}

/// Refuses queries owned by another team.
fn check_query_team(router: &QueryRouter, ctx: &ToolContext, query_id: &str) -> Result<(), ToolError> {
    let Some(query_team) = router.team_of(query_id) else {
        return Err(ToolError::Message(format!("query '{query_id}' is not in flight")));
    };
    let own = require_same_team(ctx, None)?;
    if query_team != own {
        return Err(ToolError::Message(format!(
            "refusing cross-team access to query '{query_id}'"
        )));
    }
    Ok(())
}

/// `peer_ask_question`
pub struct PeerAskQuestionTool {
    router: QueryRouter,
}

impl PeerAskQuestionTool {
    pub fn new(router: QueryRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Tool for PeerAskQuestionTool {
    fn name(&self) -> &str {
        "peer_ask_question"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_ask_question".into(),
            description: "Ask a teammate (or the whole team) a question. The answer arrives \
                          later as a query_answer event."
                .into(),
            parameters: vec![
                ParamSpec::required("question", "string", "The question"),
                ParamSpec::optional("target", "string", "Agent to ask; omit to broadcast"),
                ParamSpec::optional("max_hops", "integer", "Forwarding limit (default 3)"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let from = own_agent(ctx)?;
        let question = require_str(&args, "question")?;
        let options = AskOptions {
            target: optional_str(&args, "target").map(str::to_string),
            max_hops: args.get("max_hops").and_then(Value::as_u64).map(|h| h as u32),
        };
        let target_desc = options
            .target
            .clone()
            .unwrap_or_else(|| "the team".to_string());
        let query_id = self.router.ask(&team_id, &from, question, options);
        Ok(ToolOutput::Text(format!(
            "Asked {target_desc}: \"{question}\" (query {query_id})"
        )))
    }
}

/// `peer_answer_question`
pub struct PeerAnswerQuestionTool {
    router: QueryRouter,
}

impl PeerAnswerQuestionTool {
    pub fn new(router: QueryRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Tool for PeerAnswerQuestionTool {
    fn name(&self) -> &str {
        "peer_answer_question"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_answer_question".into(),
            description: "Answer a routed question you received; the answer goes back to the \
                          original asker."
                .into(),
            parameters: vec![
                ParamSpec::required("query_id", "string", "Id from the query event"),
                ParamSpec::required("answer", "string", "Your answer"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query_id = require_str(&args, "query_id")?;
        let answer = require_str(&args, "answer")?;
        let from = own_agent(ctx)?;
        check_query_team(&self.router, ctx, query_id)?;
        match self.router.answer(query_id, &from, answer) {
            Ok(()) => Ok(ToolOutput::Text(format!("Answer delivered for query {query_id}"))),
            Err(RouteError::NotFound(_)) => Err(ToolError::Message(format!(
                "query '{query_id}' is not in flight"
            ))),
            Err(other) => Err(ToolError::Message(other.to_string())),
        }
    }
}

/// `peer_forward_question`
pub struct PeerForwardQuestionTool {
    router: QueryRouter,
}

impl PeerForwardQuestionTool {
    pub fn new(router: QueryRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Tool for PeerForwardQuestionTool {
    fn name(&self) -> &str {
        "peer_forward_question"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_forward_question".into(),
            description: "Forward a question to a better-placed teammate, optionally adding \
                          what you know as an enrichment."
                .into(),
            parameters: vec![
                ParamSpec::required("query_id", "string", "Id from the query event"),
                ParamSpec::required("target", "string", "Agent to forward to"),
                ParamSpec::optional("enrichment", "string", "Context you can add"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query_id = require_str(&args, "query_id")?;
        let target = require_str(&args, "target")?;
        let from = own_agent(ctx)?;
        check_query_team(&self.router, ctx, query_id)?;
        match self.router.forward(
            query_id,
            &from,
            target,
            optional_str(&args, "enrichment").map(str::to_string),
        ) {
            Ok(()) => Ok(ToolOutput::Text(format!("Forwarded query {query_id} to {target}"))),
            Err(RouteError::MaxHopsReached(_)) => Ok(ToolOutput::Text(format!(
                "Query {query_id} already reached its forwarding limit; answer it instead."
            ))),
            Err(RouteError::NotFound(_)) => Err(ToolError::Message(format!(
                "query '{query_id}' is not in flight"
            ))),
        }
    }
}

/// `peer_message`: direct line to one teammate.
pub struct PeerMessageTool {
    bus: Bus,
}

impl PeerMessageTool {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for PeerMessageTool {
    fn name(&self) -> &str {
        "peer_message"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_message".into(),
            description: "Send a one-way message to a teammate (no reply expected).".into(),
            parameters: vec![
                ParamSpec::required("target", "string", "Agent name"),
                ParamSpec::required("content", "string", "Message text"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let from = own_agent(ctx)?;
        let target = require_str(&args, "target")?;
        let content = require_str(&args, "content")?;
        self.bus.publish(
            &topic::agent(&team_id, target),
            Event::PeerMessage {
                from,
                content: content.to_string(),
            },
        );
        Ok(ToolOutput::Text(format!("Message sent to {target}")))
    }
}

/// `peer_discovery`: who is on the team right now.
pub struct PeerDiscoveryTool {
    registry: Registry,
}

impl PeerDiscoveryTool {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for PeerDiscoveryTool {
    fn name(&self) -> &str {
        "peer_discovery"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_discovery".into(),
            description: "List the team's live agents and keepers with role/status metadata."
                .into(),
            parameters: vec![],
        }
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let mut entries = self.registry.select(|key, _| key.team_id == team_id);
        entries.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        if entries.is_empty() {
            return Ok(ToolOutput::Text("No live workers registered.".to_string()));
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|(key, entry)| {
                let get = |field: &str| {
                    entry
                        .metadata
                        .get(field)
                        .and_then(Value::as_str)
                        .unwrap_or("-")
                        .to_string()
                };
                if key.name.starts_with("keeper:") {
                    format!("- {} (keeper, topic: {})", key.name, get("topic"))
                } else {
                    format!("- {} (role: {}, status: {})", key.name, get("role"), get("status"))
                }
            })
            .collect();
        Ok(ToolOutput::Text(lines.join("\n")))
    }
}

/// `peer_change_role`: ask another agent to take a new role.
pub struct PeerChangeRoleTool {
    bus: Bus,
}

impl PeerChangeRoleTool {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for PeerChangeRoleTool {
    fn name(&self) -> &str {
        "peer_change_role"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_change_role".into(),
            description: "Request that a teammate switch to a different role.".into(),
            parameters: vec![
                ParamSpec::required("target", "string", "Agent name"),
                ParamSpec::required("role", "string", "Role to switch to"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let target = require_str(&args, "target")?;
        let role = require_str(&args, "role")?;
        self.bus.publish(
            &topic::agent(&team_id, target),
            Event::RoleChangeRequest {
                agent: target.to_string(),
                role: role.to_string(),
            },
        );
        Ok(ToolOutput::Text(format!(
            "Asked {target} to switch to role '{role}'"
        )))
    }
}
