//! Tools for offloading conversation context to keepers and pulling it back.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    optional_str, require_same_team, require_str, ParamSpec, Tool, ToolContext, ToolError,
    ToolOutput, ToolSpec,
};
use crate::context::keeper::Keepers;
use crate::context::retrieval::{detect_mode, render_lines, RetrieveMode};

/// `context_offload`: split off the older part of the agent's conversation
/// into a new keeper. The loop's execute override injects the message
/// snapshot into the context for this tool only.
pub struct ContextOffloadTool {
    keepers: Keepers,
}

impl ContextOffloadTool {
    pub fn new(keepers: Keepers) -> Self {
        Self { keepers }
    }
}

#[async_trait]
impl Tool for ContextOffloadTool {
    fn name(&self) -> &str {
        "context_offload"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "context_offload".into(),
            description: "Move the older part of your conversation into a context keeper so \
                          your window stays small. Peers can query the keeper later."
                .into(),
            parameters: vec![
                ParamSpec::required("topic", "string", "What the offloaded block is about"),
                ParamSpec::optional(
                    "message_count",
                    "integer",
                    "How many messages from the start of the conversation to offload \
                     (default: all but the last two)",
                ),
                ParamSpec::optional("team_id", "string", "Team id (defaults to your own team)"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, optional_str(&args, "team_id"))?;
        let topic = require_str(&args, "topic")?;
        let source = ctx
            .agent_name
            .clone()
            .unwrap_or_else(|| "session".to_string());
        let messages = ctx.agent_messages.clone().ok_or_else(|| {
            ToolError::Message("context_offload requires the agent message snapshot".to_string())
        })?;
        if messages.is_empty() {
            return Err(ToolError::Message("nothing to offload".to_string()));
        }

        let default_count = messages.len().saturating_sub(2);
        let count = args
            .get("message_count")
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .unwrap_or(default_count)
            .min(messages.len());
        if count == 0 {
            return Err(ToolError::Message(
                "conversation too short to offload".to_string(),
            ));
        }
        let block: Vec<_> = messages[..count].to_vec();

        let keeper = self
            .keepers
            .spawn(&team_id, topic, &source, block)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        let entry = keeper
            .index_entry()
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        Ok(ToolOutput::Text(format!(
            "Offloaded {count} message(s). {entry}"
        )))
    }
}

/// `context_retrieve`: query one keeper (or all of the team's) in raw or
/// smart mode; mode auto-detects from the query shape when unspecified.
pub struct ContextRetrieveTool {
    keepers: Keepers,
}

impl ContextRetrieveTool {
    pub fn new(keepers: Keepers) -> Self {
        Self { keepers }
    }
}

#[async_trait]
impl Tool for ContextRetrieveTool {
    fn name(&self) -> &str {
        "context_retrieve"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "context_retrieve".into(),
            description: "Query offloaded context. Questions get an LLM-composed answer from \
                          the keeper; keyword queries get the matching raw messages."
                .into(),
            parameters: vec![
                ParamSpec::required("query", "string", "Question or keywords"),
                ParamSpec::optional("keeper_id", "string", "Query one specific keeper"),
                ParamSpec::optional("mode", "string", "raw or smart (default: auto-detect)"),
                ParamSpec::optional("team_id", "string", "Team id (defaults to your own team)"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, optional_str(&args, "team_id"))?;
        let query = require_str(&args, "query")?;
        let mode = match optional_str(&args, "mode") {
            Some("raw") => RetrieveMode::Raw,
            Some("smart") => RetrieveMode::Smart,
            Some(other) => {
                return Err(ToolError::InvalidParams(format!(
                    "unknown mode '{other}' (use raw or smart)"
                )))
            }
            None => detect_mode(query),
        };

        let keepers = match optional_str(&args, "keeper_id") {
            Some(id) => {
                let keeper = self
                    .keepers
                    .get(id)
                    .filter(|k| k.team_id == team_id)
                    .ok_or_else(|| ToolError::Message(format!("no keeper '{id}' in this team")))?;
                vec![keeper]
            }
            None => self.keepers.for_team(&team_id),
        };
        if keepers.is_empty() {
            return Ok(ToolOutput::Text("No context keepers exist yet.".to_string()));
        }

        let mut sections = Vec::new();
        for keeper in keepers {
            let header = keeper
                .index_entry()
                .await
                .map_err(|e| ToolError::Message(e.to_string()))?;
            let body = match mode {
                RetrieveMode::Smart => keeper
                    .smart_retrieve(query)
                    .await
                    .map_err(|e| ToolError::Message(e.to_string()))?,
                RetrieveMode::Raw => {
                    let messages = keeper
                        .retrieve(query)
                        .await
                        .map_err(|e| ToolError::Message(e.to_string()))?;
                    render_lines(&messages)
                }
            };
            sections.push(format!("{header}\n{body}"));
        }
        Ok(ToolOutput::Text(sections.join("\n\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::limits::CostTracker;
    use crate::llm::MockLlm;
    use crate::message::Message;
    use crate::registry::Registry;
    use crate::store::Store;
    use std::sync::Arc;

    async fn fixture() -> (tempfile::TempDir, Keepers, Arc<MockLlm>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let llm = Arc::new(MockLlm::new());
        let keepers = Keepers::new(
            store,
            Registry::new(),
            Bus::new(),
            llm.clone(),
            CostTracker::new(),
            "anthropic:claude-haiku-4-5",
        );
        (dir, keepers, llm)
    }

    fn agent_ctx(messages: Option<Vec<Message>>) -> ToolContext {
        ToolContext {
            team_id: Some("t1".into()),
            agent_name: Some("alice".into()),
            agent_messages: messages,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn offload_then_raw_retrieve_round_trip() {
        let (_dir, keepers, _llm) = fixture().await;
        let offload = ContextOffloadTool::new(keepers.clone());
        let retrieve = ContextRetrieveTool::new(keepers);

        let history = vec![
            Message::user("the auth uses jwt"),
            Message::assistant("noted"),
            Message::user("now about the cache"),
            Message::assistant("ok"),
        ];
        let out = offload
            .execute(
                serde_json::json!({"topic": "auth"}),
                &agent_ctx(Some(history)),
            )
            .await
            .unwrap();
        let ToolOutput::Text(text) = out else { panic!() };
        assert!(text.starts_with("Offloaded 2 message(s)."));

        let out = retrieve
            .execute(serde_json::json!({"query": "jwt", "mode": "raw"}), &agent_ctx(None))
            .await
            .unwrap();
        let ToolOutput::Text(text) = out else { panic!() };
        assert!(text.contains("[user]: the auth uses jwt"));
    }

    #[tokio::test]
    async fn offload_without_snapshot_fails() {
        let (_dir, keepers, _llm) = fixture().await;
        let offload = ContextOffloadTool::new(keepers);
        let err = offload
            .execute(serde_json::json!({"topic": "auth"}), &agent_ctx(None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("snapshot"));
    }

    #[tokio::test]
    async fn cross_team_retrieve_is_refused() {
        let (_dir, keepers, _llm) = fixture().await;
        let retrieve = ContextRetrieveTool::new(keepers);
        let err = retrieve
            .execute(
                serde_json::json!({"query": "x", "team_id": "other-team"}),
                &agent_ctx(None),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cross-team"));
    }
}
