//! The tool interface exposed to the ReAct loop.
//!
//! A tool is any unit of work with a unique lowercase underscored name, a
//! declared parameter schema, and an async execute function. The loop looks
//! tools up by name; polymorphism is by name, not by a closed enum. Tool
//! *implementations* for files/shell/git/LSP live outside this crate; here
//! are the trait, the registry, argument normalization, and the built-in
//! coordination tools that drive the team fabric.

mod context_tools;
mod decision_tools;
mod peer_tools;
mod team_tools;

pub use context_tools::{ContextOffloadTool, ContextRetrieveTool};
pub use decision_tools::{DecisionLogTool, DecisionQueryTool};
pub use peer_tools::{
    PeerAnswerQuestionTool, PeerAskQuestionTool, PeerChangeRoleTool, PeerDiscoveryTool,
    PeerForwardQuestionTool, PeerMessageTool,
};
pub use team_tools::{PeerCreateTaskTool, TeamAssignTool, TeamProgressTool, TeamSpawnTool};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::message::Message;

/// One declared parameter.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: String,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Name, description, and parameter schema advertised to the LLM.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolSpec {
    /// JSON-schema-like descriptor for the tool-call protocol.
    pub fn descriptor(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.param_type, "description": param.description }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "required": required,
                "properties": properties,
            }
        })
    }
}

/// Context supplied by the core on every call.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub project_path: String,
    pub session_id: Option<String>,
    pub team_id: Option<String>,
    pub agent_name: Option<String>,
    /// Snapshot of the calling agent's in-flight messages; populated only for
    /// the offload tool, via the loop's execute override.
    pub agent_messages: Option<Vec<Message>>,
}

/// Successful tool result.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Data(Map<String, Value>),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    Message(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("tool execution timed out")]
    Timeout,
    #[error("structured failure")]
    Data(Map<String, Value>),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Name → executor map. Built per role at spawn time.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors for every registered tool, advertised to the LLM.
    pub fn descriptors(&self) -> Vec<Value> {
        let mut specs: Vec<(String, Value)> = self
            .tools
            .values()
            .map(|t| (t.name().to_string(), t.spec().descriptor()))
            .collect();
        specs.sort_by(|a, b| a.0.cmp(&b.0));
        specs.into_iter().map(|(_, d)| d).collect()
    }
}

/// Normalizes LLM-produced argument keys to the canonical names declared in
/// the schema (case-insensitive match). Unknown parameters pass through.
pub fn normalize_args(spec: &ToolSpec, args: Value) -> Value {
    let Value::Object(map) = args else {
        return args;
    };
    let mut normalized = Map::new();
    for (key, value) in map {
        let canonical = spec
            .parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&key))
            .map(|p| p.name.clone())
            .unwrap_or(key);
        normalized.insert(canonical, value);
    }
    Value::Object(normalized)
}

/// Reads a required string argument.
pub(crate) fn require_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required parameter '{name}'")))
}

/// Reads an optional string argument.
pub(crate) fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// The team id a tool call is allowed to touch: calls against another team are
/// refused at this boundary.
pub(crate) fn require_same_team(ctx: &ToolContext, requested: Option<&str>) -> Result<String, ToolError> {
    let own = ctx
        .team_id
        .as_deref()
        .ok_or_else(|| ToolError::Message("not running in a team".to_string()))?;
    match requested {
        Some(team) if team != own => Err(ToolError::Message(format!(
            "refusing cross-team access to team '{team}'"
        ))),
        _ => Ok(own.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: "Echoes the input text".into(),
                parameters: vec![ParamSpec::required("text", "string", "Text to echo")],
            }
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(require_str(&args, "text")?.to_string()))
        }
    }

    #[test]
    fn descriptor_shape() {
        let d = EchoTool.spec().descriptor();
        assert_eq!(d["name"], "echo");
        assert_eq!(d["parameters"]["type"], "object");
        assert_eq!(d["parameters"]["required"][0], "text");
        assert_eq!(d["parameters"]["properties"]["text"]["type"], "string");
    }

    #[test]
    fn normalize_matches_case_insensitively_and_passes_unknown() {
        let spec = EchoTool.spec();
        let args = json!({"Text": "hi", "extra": 1});
        let normalized = normalize_args(&spec, args);
        assert_eq!(normalized["text"], "hi");
        assert_eq!(normalized["extra"], 1);
    }

    #[tokio::test]
    async fn registry_lookup_and_descriptors() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.descriptors().len(), 1);

        let out = registry
            .get("echo")
            .unwrap()
            .execute(json!({"text": "hello"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Text("hello".into()));
    }

    #[test]
    fn cross_team_access_is_refused() {
        let ctx = ToolContext {
            team_id: Some("t1".into()),
            ..Default::default()
        };
        assert!(require_same_team(&ctx, Some("t1")).is_ok());
        assert!(require_same_team(&ctx, None).is_ok());
        assert!(require_same_team(&ctx, Some("t2")).is_err());
    }
}
