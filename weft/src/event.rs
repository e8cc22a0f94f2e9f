//! Cross-worker event payloads delivered over the [`Bus`](crate::bus::Bus).
//!
//! One serializable enum covers every topic so the presentation layer can
//! consume a single stream. Subscribers must treat delivery as best-effort and
//! handle duplicates/drops idempotently.

use serde::{Deserialize, Serialize};

/// Everything that can travel over a bus topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A peer shared opaque working context.
    ContextUpdate {
        from: String,
        payload: serde_json::Value,
    },
    /// Direct peer-to-peer chat line.
    PeerMessage { from: String, content: String },
    /// A task was assigned to an agent.
    TaskAssigned { task_id: String, agent_name: String },
    /// Task status moved (UI + peers observe progress).
    TaskUpdated { task_id: String, status: String },
    /// A routed question (direct or broadcast).
    Query {
        query_id: String,
        from: String,
        question: String,
        enrichments: Vec<String>,
    },
    /// Answer travelling back to the original asker.
    QueryAnswer {
        query_id: String,
        from: String,
        answer: String,
        enrichments: Vec<String>,
    },
    /// A context keeper came alive and can be queried.
    KeeperCreated {
        keeper_id: String,
        topic: String,
        source_agent: String,
    },
    /// A peer asked another agent to switch roles.
    RoleChangeRequest { agent: String, role: String },
    /// An agent switched roles.
    RoleChanged {
        agent: String,
        old_role: String,
        new_role: String,
    },
    /// Agent status transition (idle/working/blocked/error).
    AgentStatus { agent: String, status: String },
    /// A tool call is waiting for interactive approval.
    PermissionRequest {
        session_id: String,
        tool: String,
        path: String,
    },
    /// Team crossed 80% of its budget ceiling. Fires once per team.
    BudgetWarning {
        team_id: String,
        spent: f64,
        limit: f64,
    },
    /// A model escalation happened.
    Escalation {
        team_id: String,
        agent: String,
        from_model: String,
        to_model: String,
    },
    /// Token/cost usage from one LLM call.
    Usage {
        team_id: String,
        agent: String,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    },
    /// A sub-team finished and was dissolved.
    SubTeamCompleted { team_id: String },
    /// Free-form runtime notice.
    System { message: String },
}

/// Topic naming convention. Keep these helpers as the only place topic strings
/// are assembled.
pub mod topic {
    /// Broadcast topic for a whole team.
    pub fn team(team_id: &str) -> String {
        format!("team:{team_id}")
    }

    /// Direct topic for one agent.
    pub fn agent(team_id: &str, name: &str) -> String {
        format!("team:{team_id}:agent:{name}")
    }

    pub fn tasks(team_id: &str) -> String {
        format!("team:{team_id}:tasks")
    }

    pub fn decisions(team_id: &str) -> String {
        format!("team:{team_id}:decisions")
    }

    pub fn context(team_id: &str) -> String {
        format!("team:{team_id}:context")
    }

    pub fn telemetry_team(team_id: &str) -> String {
        format!("telemetry:team:{team_id}")
    }

    pub fn session(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    /// Fleet-wide telemetry stream.
    pub const TELEMETRY_UPDATES: &str = "telemetry:updates";

    /// Runtime lifecycle notices.
    pub const SYSTEM: &str = "weft:system";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_convention() {
        assert_eq!(topic::team("t1"), "team:t1");
        assert_eq!(topic::agent("t1", "alice"), "team:t1:agent:alice");
        assert_eq!(topic::tasks("t1"), "team:t1:tasks");
        assert_eq!(topic::telemetry_team("t1"), "telemetry:team:t1");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = Event::AgentStatus {
            agent: "alice".into(),
            status: "working".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "agent_status");
    }
}
