//! Node and edge types of the shared decision graph.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Goal,
    Decision,
    Option,
    Action,
    Outcome,
    Observation,
    Revisit,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Goal => "goal",
            NodeType::Decision => "decision",
            NodeType::Option => "option",
            NodeType::Action => "action",
            NodeType::Outcome => "outcome",
            NodeType::Observation => "observation",
            NodeType::Revisit => "revisit",
        }
    }

    pub fn parse(s: &str) -> Option<NodeType> {
        Some(match s {
            "goal" => NodeType::Goal,
            "decision" => NodeType::Decision,
            "option" => NodeType::Option,
            "action" => NodeType::Action,
            "outcome" => NodeType::Outcome,
            "observation" => NodeType::Observation,
            "revisit" => NodeType::Revisit,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Superseded,
    Abandoned,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Superseded => "superseded",
            NodeStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<NodeStatus> {
        Some(match s {
            "active" => NodeStatus::Active,
            "superseded" => NodeStatus::Superseded,
            "abandoned" => NodeStatus::Abandoned,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    LeadsTo,
    Chosen,
    Rejected,
    Requires,
    Blocks,
    Enables,
    Supersedes,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::LeadsTo => "leads_to",
            EdgeType::Chosen => "chosen",
            EdgeType::Rejected => "rejected",
            EdgeType::Requires => "requires",
            EdgeType::Blocks => "blocks",
            EdgeType::Enables => "enables",
            EdgeType::Supersedes => "supersedes",
        }
    }

    pub fn parse(s: &str) -> Option<EdgeType> {
        Some(match s {
            "leads_to" => EdgeType::LeadsTo,
            "chosen" => EdgeType::Chosen,
            "rejected" => EdgeType::Rejected,
            "requires" => EdgeType::Requires,
            "blocks" => EdgeType::Blocks,
            "enables" => EdgeType::Enables,
            "supersedes" => EdgeType::Supersedes,
            _ => return None,
        })
    }
}

/// One graph node. `change_id` is unique process-wide and identifies the write
/// that created the node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: String,
    pub change_id: String,
    pub node_type: NodeType,
    pub title: String,
    pub description: Option<String>,
    pub status: NodeStatus,
    /// Bounded 0–100 when present.
    pub confidence: Option<u8>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One typed edge. Both endpoints must exist when the edge is inserted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionEdge {
    pub id: String,
    pub change_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub rationale: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Attributes for a new node; ids, status, and timestamps are assigned by the
/// graph.
#[derive(Clone, Debug, Default)]
pub struct NewNode {
    pub node_type: Option<NodeType>,
    pub title: String,
    pub description: Option<String>,
    pub confidence: Option<u8>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
}

impl NewNode {
    pub fn new(node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            node_type: Some(node_type),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Attributes for a new edge.
#[derive(Clone, Debug, Default)]
pub struct NewEdge {
    pub weight: Option<f64>,
    pub rationale: Option<String>,
}

/// Composable node filter; `None` fields match everything.
#[derive(Clone, Debug, Default)]
pub struct NodeFilter {
    pub node_type: Option<NodeType>,
    pub status: Option<NodeStatus>,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
    pub limit: Option<u32>,
}

/// Composable edge filter.
#[derive(Clone, Debug, Default)]
pub struct EdgeFilter {
    pub edge_type: Option<EdgeType>,
    pub from_node_id: Option<String>,
    pub to_node_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_types_round_trip() {
        for t in [
            NodeType::Goal,
            NodeType::Decision,
            NodeType::Option,
            NodeType::Action,
            NodeType::Outcome,
            NodeType::Observation,
            NodeType::Revisit,
        ] {
            assert_eq!(NodeType::parse(t.as_str()), Some(t));
        }
        assert_eq!(NodeType::parse("nope"), None);
    }

    #[test]
    fn edge_types_round_trip() {
        for t in [
            EdgeType::LeadsTo,
            EdgeType::Chosen,
            EdgeType::Rejected,
            EdgeType::Requires,
            EdgeType::Blocks,
            EdgeType::Enables,
            EdgeType::Supersedes,
        ] {
            assert_eq!(EdgeType::parse(t.as_str()), Some(t));
        }
    }
}
