//! The shared decision graph: a persistent, append-mostly DAG of goals,
//! decisions, options, actions, outcomes, observations, and revisits, linked
//! by typed edges. Every agent on a team reads and writes it; all mutation
//! serializes through the store's transactions, and no in-memory node handle
//! is ever exposed.
//!
//! Cycles are not structurally prevented (the graph is DAG-intended), so every
//! traversal here carries a visited set.

pub mod pulse;
pub mod types;

pub use pulse::{Pulse, PulseOptions};
pub use types::{
    DecisionEdge, DecisionNode, EdgeFilter, EdgeType, NewEdge, NewNode, NodeFilter, NodeStatus,
    NodeType,
};

use std::collections::{HashSet, VecDeque};

use crate::bus::Bus;
use crate::event::{topic, Event};
use crate::store::{Store, StoreError};

/// Default cap for [`DecisionGraph::search`].
pub const SEARCH_LIMIT: u32 = 20;

/// Store-backed repository handle; cheap to clone.
#[derive(Clone)]
pub struct DecisionGraph {
    store: Store,
    bus: Option<Bus>,
}

impl DecisionGraph {
    pub fn new(store: Store) -> Self {
        Self { store, bus: None }
    }

    /// Publishes a note on `team:<id>:decisions` after each write so peers can
    /// observe graph activity.
    pub fn with_bus(store: Store, bus: Bus) -> Self {
        Self {
            store,
            bus: Some(bus),
        }
    }

    /// Creates an active node with fresh id and change_id.
    pub async fn add_node(&self, attrs: NewNode) -> Result<DecisionNode, StoreError> {
        let node = self.store.insert_decision_node(attrs).await?;
        self.announce(&node, "node added");
        Ok(node)
    }

    /// Creates a relationship; both endpoints must exist.
    pub async fn add_edge(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeType,
        attrs: NewEdge,
    ) -> Result<DecisionEdge, StoreError> {
        self.store
            .insert_decision_edge(from_id, to_id, edge_type, attrs)
            .await
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<DecisionNode>, StoreError> {
        self.store.get_decision_node(id).await
    }

    pub async fn list_nodes(&self, filter: NodeFilter) -> Result<Vec<DecisionNode>, StoreError> {
        self.store.list_decision_nodes(filter).await
    }

    pub async fn list_edges(&self, filter: EdgeFilter) -> Result<Vec<DecisionEdge>, StoreError> {
        self.store.list_decision_edges(filter).await
    }

    /// Atomically deprecates `old_id` and installs its replacement, linked by
    /// a `supersedes` edge carrying the rationale.
    pub async fn supersede(
        &self,
        old_id: &str,
        new_attrs: NewNode,
        rationale: &str,
    ) -> Result<(DecisionNode, DecisionEdge), StoreError> {
        let (node, edge) = self
            .store
            .supersede_decision_node(old_id, new_attrs, rationale)
            .await?;
        self.announce(&node, "node superseded");
        Ok((node, edge))
    }

    /// Most recent N active decision nodes, newest first.
    pub async fn recent_decisions(&self, limit: u32) -> Result<Vec<DecisionNode>, StoreError> {
        self.list_nodes(NodeFilter {
            node_type: Some(NodeType::Decision),
            status: Some(NodeStatus::Active),
            limit: Some(limit),
            ..Default::default()
        })
        .await
    }

    pub async fn active_goals(&self) -> Result<Vec<DecisionNode>, StoreError> {
        self.list_nodes(NodeFilter {
            node_type: Some(NodeType::Goal),
            status: Some(NodeStatus::Active),
            ..Default::default()
        })
        .await
    }

    /// Snapshot analytic: goals, recent decisions, coverage gaps, shaky and
    /// stale nodes, plus a one-line summary.
    pub async fn pulse(&self, options: PulseOptions) -> Result<Pulse, StoreError> {
        let nodes = self.list_nodes(NodeFilter::default()).await?;
        let edges = self.list_edges(EdgeFilter::default()).await?;
        Ok(pulse::compute(&nodes, &edges, chrono::Utc::now(), options))
    }

    /// Narrative for one goal: all nodes reachable over outgoing edges,
    /// breadth-first with a visited set, sorted by insertion time.
    pub async fn for_goal(&self, goal_id: &str) -> Result<Vec<DecisionNode>, StoreError> {
        let goal = self.get_node(goal_id).await?.ok_or(StoreError::NotFound {
            entity: "decision_node",
            id: goal_id.to_string(),
        })?;
        let edges = self.list_edges(EdgeFilter::default()).await?;
        let nodes = self.list_nodes(NodeFilter::default()).await?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(goal.id.clone());
        queue.push_back(goal.id.clone());
        while let Some(current) = queue.pop_front() {
            for edge in edges.iter().filter(|e| e.from_node_id == current) {
                if visited.insert(edge.to_node_id.clone()) {
                    queue.push_back(edge.to_node_id.clone());
                }
            }
        }

        let mut reachable: Vec<DecisionNode> = nodes
            .into_iter()
            .filter(|n| visited.contains(&n.id))
            .collect();
        reachable.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(reachable)
    }

    /// Substring search over title and description, capped at [`SEARCH_LIMIT`].
    pub async fn search(&self, text: &str) -> Result<Vec<DecisionNode>, StoreError> {
        self.store.search_decision_nodes(text, SEARCH_LIMIT).await
    }

    fn announce(&self, node: &DecisionNode, what: &str) {
        let (Some(bus), Some(scope)) = (&self.bus, &node.session_id) else {
            return;
        };
        bus.publish(
            &topic::decisions(scope),
            Event::System {
                message: format!("decision graph: {what}: [{}] {}", node.node_type.as_str(), node.title),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn graph() -> (tempfile::TempDir, DecisionGraph) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        (dir, DecisionGraph::new(store))
    }

    #[tokio::test]
    async fn narrative_handles_cycles() {
        let (_dir, g) = graph().await;
        let a = g.add_node(NewNode::new(NodeType::Goal, "a")).await.unwrap();
        let b = g.add_node(NewNode::new(NodeType::Decision, "b")).await.unwrap();
        let c = g.add_node(NewNode::new(NodeType::Action, "c")).await.unwrap();
        g.add_edge(&a.id, &b.id, EdgeType::LeadsTo, NewEdge::default()).await.unwrap();
        g.add_edge(&b.id, &c.id, EdgeType::LeadsTo, NewEdge::default()).await.unwrap();
        // Accidental cycle back to the goal must not loop the walk.
        g.add_edge(&c.id, &a.id, EdgeType::LeadsTo, NewEdge::default()).await.unwrap();

        let narrative = g.for_goal(&a.id).await.unwrap();
        assert_eq!(narrative.len(), 3);
    }

    #[tokio::test]
    async fn narrative_ignores_unreachable_nodes() {
        let (_dir, g) = graph().await;
        let a = g.add_node(NewNode::new(NodeType::Goal, "a")).await.unwrap();
        let b = g.add_node(NewNode::new(NodeType::Action, "b")).await.unwrap();
        g.add_node(NewNode::new(NodeType::Decision, "island")).await.unwrap();
        g.add_edge(&a.id, &b.id, EdgeType::LeadsTo, NewEdge::default()).await.unwrap();

        let narrative = g.for_goal(&a.id).await.unwrap();
        let titles: Vec<_> = narrative.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn recent_decisions_excludes_superseded() {
        let (_dir, g) = graph().await;
        let d1 = g.add_node(NewNode::new(NodeType::Decision, "use sqlite")).await.unwrap();
        g.supersede(&d1.id, NewNode::new(NodeType::Decision, "use postgres"), "scale")
            .await
            .unwrap();

        let recent = g.recent_decisions(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "use postgres");
    }

    #[tokio::test]
    async fn search_matches_title_and_description() {
        let (_dir, g) = graph().await;
        let mut attrs = NewNode::new(NodeType::Observation, "cache note");
        attrs.description = Some("redis eviction policy".into());
        g.add_node(attrs).await.unwrap();
        g.add_node(NewNode::new(NodeType::Observation, "unrelated")).await.unwrap();

        assert_eq!(g.search("eviction").await.unwrap().len(), 1);
        assert_eq!(g.search("cache").await.unwrap().len(), 1);
        assert_eq!(g.search("nothing-here").await.unwrap().len(), 0);
    }
}
