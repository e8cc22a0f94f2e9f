//! Tools that let agents write and read the shared decision graph.

use async_trait::async_trait;
use serde_json::Value;

use super::{optional_str, require_str, ParamSpec, Tool, ToolContext, ToolError, ToolOutput, ToolSpec};
use crate::decision::{
    DecisionGraph, EdgeType, NewEdge, NewNode, NodeType, PulseOptions,
};

fn scope_of(ctx: &ToolContext) -> Option<String> {
    ctx.team_id.clone().or_else(|| ctx.session_id.clone())
}

/// `decision_log`: record a node (optionally superseding or linking).
pub struct DecisionLogTool {
    graph: DecisionGraph,
}

impl DecisionLogTool {
    pub fn new(graph: DecisionGraph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for DecisionLogTool {
    fn name(&self) -> &str {
        "decision_log"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "decision_log".into(),
            description: "Record a goal/decision/option/action/outcome/observation/revisit node \
                          in the shared decision graph. Can supersede an existing node or link \
                          the new node to another."
                .into(),
            parameters: vec![
                ParamSpec::required("node_type", "string", "goal, decision, option, action, outcome, observation, or revisit"),
                ParamSpec::required("title", "string", "Short title of the node"),
                ParamSpec::optional("description", "string", "Longer description"),
                ParamSpec::optional("confidence", "integer", "Confidence 0-100"),
                ParamSpec::optional("supersedes", "string", "Id of a node this one replaces"),
                ParamSpec::optional("rationale", "string", "Why the old node is superseded"),
                ParamSpec::optional("link_to", "string", "Id of a node to connect to"),
                ParamSpec::optional("edge_type", "string", "leads_to, chosen, rejected, requires, blocks, or enables (default leads_to)"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let node_type_raw = require_str(&args, "node_type")?;
        let node_type = NodeType::parse(node_type_raw)
            .ok_or_else(|| ToolError::InvalidParams(format!("unknown node_type '{node_type_raw}'")))?;
        let mut attrs = NewNode::new(node_type, require_str(&args, "title")?);
        attrs.description = optional_str(&args, "description").map(str::to_string);
        attrs.confidence = args
            .get("confidence")
            .and_then(Value::as_u64)
            .map(|c| c.min(100) as u8);
        attrs.session_id = scope_of(ctx);
        attrs.agent_name = ctx.agent_name.clone();

        if let Some(old_id) = optional_str(&args, "supersedes") {
            let rationale = optional_str(&args, "rationale").unwrap_or("");
            let (node, _edge) = self
                .graph
                .supersede(old_id, attrs, rationale)
                .await
                .map_err(|e| ToolError::Message(e.to_string()))?;
            return Ok(ToolOutput::Text(format!(
                "Superseded {old_id} with {} ({}): {}",
                node.id,
                node.node_type.as_str(),
                node.title
            )));
        }

        let node = self
            .graph
            .add_node(attrs)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        if let Some(link_to) = optional_str(&args, "link_to") {
            let edge_type = optional_str(&args, "edge_type")
                .and_then(EdgeType::parse)
                .unwrap_or(EdgeType::LeadsTo);
            self.graph
                .add_edge(&node.id, link_to, edge_type, NewEdge::default())
                .await
                .map_err(|e| ToolError::Message(e.to_string()))?;
        }
        Ok(ToolOutput::Text(format!(
            "Logged {} {}: {}",
            node.node_type.as_str(),
            node.id,
            node.title
        )))
    }
}

/// `decision_query`: pulse, recent decisions, goals, narratives, and search.
pub struct DecisionQueryTool {
    graph: DecisionGraph,
}

impl DecisionQueryTool {
    pub fn new(graph: DecisionGraph) -> Self {
        Self { graph }
    }
}

fn render_nodes(nodes: &[crate::decision::DecisionNode]) -> String {
    if nodes.is_empty() {
        return "(none)".to_string();
    }
    nodes
        .iter()
        .map(|n| {
            let confidence = n
                .confidence
                .map(|c| format!(", confidence {c}"))
                .unwrap_or_default();
            format!(
                "- [{}] {} ({}{}) {}",
                n.node_type.as_str(),
                n.title,
                n.id,
                confidence,
                n.description.as_deref().unwrap_or("")
            )
            .trim_end()
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for DecisionQueryTool {
    fn name(&self) -> &str {
        "decision_query"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "decision_query".into(),
            description: "Read the shared decision graph: mode 'pulse' (health snapshot), \
                          'recent' (latest decisions), 'goals' (active goals), 'narrative' \
                          (everything reachable from a goal), or 'search' (substring match)."
                .into(),
            parameters: vec![
                ParamSpec::optional("mode", "string", "pulse, recent, goals, narrative, or search (default recent; a query implies search)"),
                ParamSpec::optional("query", "string", "Search text for mode=search"),
                ParamSpec::optional("goal_id", "string", "Goal node id for mode=narrative"),
                ParamSpec::optional("limit", "integer", "Max results for mode=recent (default 10)"),
            ],
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = optional_str(&args, "query");
        let mode = optional_str(&args, "mode")
            .unwrap_or(if query.is_some() { "search" } else { "recent" });
        let text = match mode {
            "pulse" => {
                let pulse = self
                    .graph
                    .pulse(PulseOptions::default())
                    .await
                    .map_err(|e| ToolError::Message(e.to_string()))?;
                format!(
                    "{}\n\nActive goals:\n{}\n\nCoverage gaps:\n{}\n\nLow confidence:\n{}\n\nStale:\n{}",
                    pulse.summary,
                    render_nodes(&pulse.active_goals),
                    render_nodes(&pulse.coverage_gaps),
                    render_nodes(&pulse.low_confidence),
                    render_nodes(&pulse.stale),
                )
            }
            "recent" => {
                let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as u32;
                let nodes = self
                    .graph
                    .recent_decisions(limit)
                    .await
                    .map_err(|e| ToolError::Message(e.to_string()))?;
                format!("Recent decisions:\n{}", render_nodes(&nodes))
            }
            "goals" => {
                let nodes = self
                    .graph
                    .active_goals()
                    .await
                    .map_err(|e| ToolError::Message(e.to_string()))?;
                format!("Active goals:\n{}", render_nodes(&nodes))
            }
            "narrative" => {
                let goal_id = require_str(&args, "goal_id")?;
                let nodes = self
                    .graph
                    .for_goal(goal_id)
                    .await
                    .map_err(|e| ToolError::Message(e.to_string()))?;
                format!("Narrative for {goal_id}:\n{}", render_nodes(&nodes))
            }
            "search" => {
                let query = query.ok_or_else(|| {
                    ToolError::InvalidParams("mode=search requires 'query'".to_string())
                })?;
                let nodes = self
                    .graph
                    .search(query)
                    .await
                    .map_err(|e| ToolError::Message(e.to_string()))?;
                format!("Matches for \"{query}\":\n{}", render_nodes(&nodes))
            }
            other => {
                return Err(ToolError::InvalidParams(format!("unknown mode '{other}'")))
            }
        };
        Ok(ToolOutput::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    async fn tools() -> (tempfile::TempDir, DecisionLogTool, DecisionQueryTool) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let graph = DecisionGraph::new(store);
        (
            dir,
            DecisionLogTool::new(graph.clone()),
            DecisionQueryTool::new(graph),
        )
    }

    fn team_ctx() -> ToolContext {
        ToolContext {
            team_id: Some("t1".into()),
            agent_name: Some("alice".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn log_then_query_recent() {
        let (_dir, log, query) = tools().await;
        log.execute(
            serde_json::json!({"node_type": "decision", "title": "use sqlite", "confidence": 80}),
            &team_ctx(),
        )
        .await
        .unwrap();

        let out = query
            .execute(serde_json::json!({"mode": "recent"}), &team_ctx())
            .await
            .unwrap();
        match out {
            ToolOutput::Text(text) => {
                assert!(text.contains("use sqlite"));
                assert!(text.contains("confidence 80"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn supersede_through_the_tool() {
        let (_dir, log, query) = tools().await;
        let out = log
            .execute(
                serde_json::json!({"node_type": "goal", "title": "ship v1"}),
                &team_ctx(),
            )
            .await
            .unwrap();
        let ToolOutput::Text(text) = out else { panic!() };
        let old_id = text
            .split_whitespace()
            .nth(2)
            .unwrap()
            .trim_end_matches(':')
            .to_string();

        log.execute(
            serde_json::json!({
                "node_type": "goal",
                "title": "ship v1.1",
                "supersedes": old_id,
                "rationale": "scope grew",
            }),
            &team_ctx(),
        )
        .await
        .unwrap();

        let out = query
            .execute(serde_json::json!({"mode": "goals"}), &team_ctx())
            .await
            .unwrap();
        let ToolOutput::Text(text) = out else { panic!() };
        assert!(text.contains("ship v1.1"));
        assert!(!text.contains("ship v1 "));
    }

    #[tokio::test]
    async fn bad_node_type_is_invalid_params() {
        let (_dir, log, _query) = tools().await;
        let err = log
            .execute(
                serde_json::json!({"node_type": "vibe", "title": "x"}),
                &team_ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
