//! Pulse: a snapshot analytic over the decision graph.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::types::{DecisionEdge, DecisionNode, NodeStatus, NodeType};

#[derive(Clone, Copy, Debug)]
pub struct PulseOptions {
    /// Active nodes below this confidence are flagged.
    pub confidence_threshold: u8,
    /// Active nodes untouched for this many days are flagged.
    pub stale_days: i64,
}

impl Default for PulseOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 50,
            stale_days: 7,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Pulse {
    pub active_goals: Vec<DecisionNode>,
    pub recent_decisions: Vec<DecisionNode>,
    /// Active goals with no outgoing edge to any action or outcome node.
    pub coverage_gaps: Vec<DecisionNode>,
    pub low_confidence: Vec<DecisionNode>,
    pub stale: Vec<DecisionNode>,
    pub summary: String,
}

/// Number of recent decisions reported by a pulse.
pub const RECENT_DECISION_LIMIT: usize = 10;

fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Pure computation over a full node/edge dump; `now` is injected so staleness
/// is testable.
pub(super) fn compute(
    nodes: &[DecisionNode],
    edges: &[DecisionEdge],
    now: DateTime<Utc>,
    options: PulseOptions,
) -> Pulse {
    let active: Vec<&DecisionNode> = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .collect();

    let active_goals: Vec<DecisionNode> = active
        .iter()
        .filter(|n| n.node_type == NodeType::Goal)
        .map(|n| (*n).clone())
        .collect();

    // Most recent first; the node lists arrive newest-first from the store but
    // recompute here so the function does not depend on caller ordering.
    let mut recent_decisions: Vec<DecisionNode> = active
        .iter()
        .filter(|n| n.node_type == NodeType::Decision)
        .map(|n| (*n).clone())
        .collect();
    recent_decisions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent_decisions.truncate(RECENT_DECISION_LIMIT);

    let progress_targets: HashSet<&str> = nodes
        .iter()
        .filter(|n| matches!(n.node_type, NodeType::Action | NodeType::Outcome))
        .map(|n| n.id.as_str())
        .collect();
    let coverage_gaps: Vec<DecisionNode> = active_goals
        .iter()
        .filter(|goal| {
            !edges
                .iter()
                .any(|e| e.from_node_id == goal.id && progress_targets.contains(e.to_node_id.as_str()))
        })
        .cloned()
        .collect();

    let low_confidence: Vec<DecisionNode> = active
        .iter()
        .filter(|n| matches!(n.confidence, Some(c) if c < options.confidence_threshold))
        .map(|n| (*n).clone())
        .collect();

    let cutoff = now - Duration::days(options.stale_days);
    let stale: Vec<DecisionNode> = active
        .iter()
        .filter(|n| matches!(parse_ts(&n.updated_at), Some(t) if t < cutoff))
        .map(|n| (*n).clone())
        .collect();

    let summary = format!(
        "Pulse: {} active goal(s), {} recent decision(s), {} coverage gap(s), \
         {} low-confidence node(s), {} stale node(s)",
        active_goals.len(),
        recent_decisions.len(),
        coverage_gaps.len(),
        low_confidence.len(),
        stale.len(),
    );

    Pulse {
        active_goals,
        recent_decisions,
        coverage_gaps,
        low_confidence,
        stale,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::types::EdgeType;

    fn node(id: &str, node_type: NodeType, status: NodeStatus) -> DecisionNode {
        DecisionNode {
            id: id.to_string(),
            change_id: format!("c-{id}"),
            node_type,
            title: id.to_string(),
            description: None,
            status,
            confidence: None,
            metadata: Default::default(),
            session_id: None,
            agent_name: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            updated_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn edge(from: &str, to: &str, edge_type: EdgeType) -> DecisionEdge {
        DecisionEdge {
            id: format!("{from}->{to}"),
            change_id: format!("ce-{from}-{to}"),
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
            edge_type,
            weight: 1.0,
            rationale: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            updated_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn goal_with_action_edge_is_covered() {
        let nodes = vec![
            node("g1", NodeType::Goal, NodeStatus::Active),
            node("g2", NodeType::Goal, NodeStatus::Active),
            node("a1", NodeType::Action, NodeStatus::Active),
        ];
        let edges = vec![edge("g1", "a1", EdgeType::LeadsTo)];
        let now = parse_ts("2026-01-02T00:00:00+00:00").unwrap();
        let pulse = compute(&nodes, &edges, now, PulseOptions::default());
        let gap_ids: Vec<_> = pulse.coverage_gaps.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(gap_ids, vec!["g2"]);
    }

    #[test]
    fn goal_edge_to_decision_is_still_a_gap() {
        let nodes = vec![
            node("g1", NodeType::Goal, NodeStatus::Active),
            node("d1", NodeType::Decision, NodeStatus::Active),
        ];
        let edges = vec![edge("g1", "d1", EdgeType::LeadsTo)];
        let now = parse_ts("2026-01-02T00:00:00+00:00").unwrap();
        let pulse = compute(&nodes, &edges, now, PulseOptions::default());
        assert_eq!(pulse.coverage_gaps.len(), 1);
    }

    #[test]
    fn stale_and_low_confidence_flags() {
        let mut fresh = node("fresh", NodeType::Decision, NodeStatus::Active);
        fresh.updated_at = "2026-01-10T00:00:00+00:00".to_string();
        let mut old = node("old", NodeType::Decision, NodeStatus::Active);
        old.updated_at = "2025-12-01T00:00:00+00:00".to_string();
        let mut shaky = node("shaky", NodeType::Option, NodeStatus::Active);
        shaky.confidence = Some(20);

        let now = parse_ts("2026-01-11T00:00:00+00:00").unwrap();
        let pulse = compute(
            &[fresh, old, shaky],
            &[],
            now,
            PulseOptions::default(),
        );
        assert_eq!(pulse.stale.len(), 1);
        assert_eq!(pulse.stale[0].id, "old");
        assert_eq!(pulse.low_confidence.len(), 1);
        assert_eq!(pulse.low_confidence[0].id, "shaky");
        assert!(pulse.summary.starts_with("Pulse: 0 active goal(s)"));
    }

    #[test]
    fn superseded_nodes_are_invisible_to_pulse() {
        let nodes = vec![node("g1", NodeType::Goal, NodeStatus::Superseded)];
        let now = parse_ts("2026-01-02T00:00:00+00:00").unwrap();
        let pulse = compute(&nodes, &[], now, PulseOptions::default());
        assert!(pulse.active_goals.is_empty());
        assert!(pulse.coverage_gaps.is_empty());
    }
}
