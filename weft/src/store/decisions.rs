//! Row-level operations for decision nodes and edges. The domain layer sits in
//! [`crate::decision`]; everything here is plain SQL with short transactions.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{new_id, now_rfc3339, Store, StoreError};
use crate::decision::types::{
    DecisionEdge, DecisionNode, EdgeFilter, EdgeType, NewEdge, NewNode, NodeFilter, NodeStatus,
    NodeType,
};

const NODE_COLS: &str = "id, change_id, node_type, title, description, status, confidence, \
                         metadata, session_id, agent_name, created_at, updated_at";
const EDGE_COLS: &str =
    "id, change_id, from_node_id, to_node_id, edge_type, weight, rationale, created_at, updated_at";

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<DecisionNode> {
    let node_type: String = row.get(2)?;
    let status: String = row.get(5)?;
    let confidence: Option<i64> = row.get(6)?;
    let metadata: String = row.get(7)?;
    Ok(DecisionNode {
        id: row.get(0)?,
        change_id: row.get(1)?,
        node_type: NodeType::parse(&node_type).unwrap_or(NodeType::Observation),
        title: row.get(3)?,
        description: row.get(4)?,
        status: NodeStatus::parse(&status).unwrap_or(NodeStatus::Active),
        confidence: confidence.map(|c| c.clamp(0, 100) as u8),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        session_id: row.get(8)?,
        agent_name: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<DecisionEdge> {
    let edge_type: String = row.get(4)?;
    Ok(DecisionEdge {
        id: row.get(0)?,
        change_id: row.get(1)?,
        from_node_id: row.get(2)?,
        to_node_id: row.get(3)?,
        edge_type: EdgeType::parse(&edge_type).unwrap_or(EdgeType::LeadsTo),
        weight: row.get(5)?,
        rationale: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn build_node(attrs: &NewNode, status: NodeStatus) -> Result<DecisionNode, StoreError> {
    let now = now_rfc3339();
    Ok(DecisionNode {
        id: new_id(),
        change_id: new_id(),
        node_type: attrs.node_type.unwrap_or(NodeType::Observation),
        title: attrs.title.clone(),
        description: attrs.description.clone(),
        status,
        confidence: match attrs.confidence {
            Some(c) if c > 100 => Some(100),
            other => other,
        },
        metadata: attrs.metadata.clone(),
        session_id: attrs.session_id.clone(),
        agent_name: attrs.agent_name.clone(),
        created_at: now.clone(),
        updated_at: now,
    })
}

fn insert_node_row(conn: &Connection, node: &DecisionNode) -> Result<(), StoreError> {
    let metadata = serde_json::to_string(&node.metadata).map_err(|e| StoreError::Serialize {
        entity: "decision_node.metadata",
        message: e.to_string(),
    })?;
    conn.execute(
        &format!(
            "INSERT INTO decision_nodes ({NODE_COLS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            node.id,
            node.change_id,
            node.node_type.as_str(),
            node.title,
            node.description,
            node.status.as_str(),
            node.confidence.map(|c| c as i64),
            metadata,
            node.session_id,
            node.agent_name,
            node.created_at,
            node.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_edge_row(conn: &Connection, edge: &DecisionEdge) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO decision_edges ({EDGE_COLS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            edge.id,
            edge.change_id,
            edge.from_node_id,
            edge.to_node_id,
            edge.edge_type.as_str(),
            edge.weight,
            edge.rationale,
            edge.created_at,
            edge.updated_at,
        ],
    )?;
    Ok(())
}

fn node_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM decision_nodes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl Store {
    pub async fn insert_decision_node(&self, attrs: NewNode) -> Result<DecisionNode, StoreError> {
        self.with_conn(move |conn| {
            let node = build_node(&attrs, NodeStatus::Active)?;
            insert_node_row(conn, &node)?;
            Ok(node)
        })
        .await
    }

    pub async fn get_decision_node(&self, id: &str) -> Result<Option<DecisionNode>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let node = conn
                .query_row(
                    &format!("SELECT {NODE_COLS} FROM decision_nodes WHERE id = ?1"),
                    params![id],
                    row_to_node,
                )
                .optional()?;
            Ok(node)
        })
        .await
    }

    pub async fn insert_decision_edge(
        &self,
        from_node_id: &str,
        to_node_id: &str,
        edge_type: EdgeType,
        attrs: NewEdge,
    ) -> Result<DecisionEdge, StoreError> {
        let from_node_id = from_node_id.to_string();
        let to_node_id = to_node_id.to_string();
        self.with_conn(move |conn| {
            for endpoint in [&from_node_id, &to_node_id] {
                if !node_exists(conn, endpoint)? {
                    return Err(StoreError::NotFound {
                        entity: "decision_node",
                        id: endpoint.clone(),
                    });
                }
            }
            let now = now_rfc3339();
            let edge = DecisionEdge {
                id: new_id(),
                change_id: new_id(),
                from_node_id,
                to_node_id,
                edge_type,
                weight: attrs.weight.unwrap_or(1.0),
                rationale: attrs.rationale,
                created_at: now.clone(),
                updated_at: now,
            };
            insert_edge_row(conn, &edge)?;
            Ok(edge)
        })
        .await
    }

    pub async fn list_decision_nodes(
        &self,
        filter: NodeFilter,
    ) -> Result<Vec<DecisionNode>, StoreError> {
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {NODE_COLS} FROM decision_nodes WHERE 1=1");
            let mut args: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(t) = filter.node_type {
                sql.push_str(" AND node_type = ?");
                args.push(t.as_str().to_string().into());
            }
            if let Some(s) = filter.status {
                sql.push_str(" AND status = ?");
                args.push(s.as_str().to_string().into());
            }
            if let Some(sid) = filter.session_id {
                sql.push_str(" AND session_id = ?");
                args.push(sid.into());
            }
            if let Some(agent) = filter.agent_name {
                sql.push_str(" AND agent_name = ?");
                args.push(agent.into());
            }
            sql.push_str(" ORDER BY rowid DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_node)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn list_decision_edges(
        &self,
        filter: EdgeFilter,
    ) -> Result<Vec<DecisionEdge>, StoreError> {
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {EDGE_COLS} FROM decision_edges WHERE 1=1");
            let mut args: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(t) = filter.edge_type {
                sql.push_str(" AND edge_type = ?");
                args.push(t.as_str().to_string().into());
            }
            if let Some(from) = filter.from_node_id {
                sql.push_str(" AND from_node_id = ?");
                args.push(from.into());
            }
            if let Some(to) = filter.to_node_id {
                sql.push_str(" AND to_node_id = ?");
                args.push(to.into());
            }
            sql.push_str(" ORDER BY rowid ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_edge)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// The supersede triple in one transaction: mark the old node superseded,
    /// insert the replacement, link replacement → old. Either all three
    /// persist or none.
    pub async fn supersede_decision_node(
        &self,
        old_id: &str,
        new_attrs: NewNode,
        rationale: &str,
    ) -> Result<(DecisionNode, DecisionEdge), StoreError> {
        let old_id = old_id.to_string();
        let rationale = rationale.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = now_rfc3339();
            let n = tx.execute(
                "UPDATE decision_nodes SET status = 'superseded', updated_at = ?2 WHERE id = ?1",
                params![old_id, now],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "decision_node",
                    id: old_id,
                });
            }
            let node = build_node(&new_attrs, NodeStatus::Active)?;
            insert_node_row(&tx, &node)?;
            let edge = DecisionEdge {
                id: new_id(),
                change_id: new_id(),
                from_node_id: node.id.clone(),
                to_node_id: old_id,
                edge_type: EdgeType::Supersedes,
                weight: 1.0,
                rationale: Some(rationale),
                created_at: now.clone(),
                updated_at: now,
            };
            insert_edge_row(&tx, &edge)?;
            tx.commit()?;
            Ok((node, edge))
        })
        .await
    }

    /// Substring match over title and description, newest first, capped.
    pub async fn search_decision_nodes(
        &self,
        text: &str,
        limit: u32,
    ) -> Result<Vec<DecisionNode>, StoreError> {
        let pattern = format!("%{}%", text.replace('%', "\\%").replace('_', "\\_"));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NODE_COLS} FROM decision_nodes \
                 WHERE title LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\' \
                 ORDER BY rowid DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![pattern, limit], row_to_node)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn edge_requires_both_endpoints() {
        let (_dir, store) = test_store().await;
        let a = store
            .insert_decision_node(NewNode::new(NodeType::Goal, "a"))
            .await
            .unwrap();
        let err = store
            .insert_decision_edge(&a.id, "missing", EdgeType::LeadsTo, NewEdge::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn supersede_fails_atomically_on_missing_old_node() {
        let (_dir, store) = test_store().await;
        let err = store
            .supersede_decision_node("missing", NewNode::new(NodeType::Goal, "b"), "pivot")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        // Nothing leaked from the aborted transaction.
        let nodes = store.list_decision_nodes(NodeFilter::default()).await.unwrap();
        assert!(nodes.is_empty());
        let edges = store.list_decision_edges(EdgeFilter::default()).await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn confidence_is_clamped() {
        let (_dir, store) = test_store().await;
        let mut attrs = NewNode::new(NodeType::Decision, "sure");
        attrs.confidence = Some(250);
        let node = store.insert_decision_node(attrs).await.unwrap();
        assert_eq!(node.confidence, Some(100));
    }
}
