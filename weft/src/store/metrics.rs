//! Append-only record of LLM attempts, one row per call.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{new_id, now_rfc3339, Store, StoreError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMetric {
    pub team_id: String,
    pub agent_name: String,
    pub role: String,
    pub model: String,
    pub task_type: String,
    pub success: bool,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub duration_ms: u64,
    pub project_path: String,
}

fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<AgentMetric> {
    let success: i64 = row.get(5)?;
    let tokens: i64 = row.get(7)?;
    let duration: i64 = row.get(8)?;
    Ok(AgentMetric {
        team_id: row.get(0)?,
        agent_name: row.get(1)?,
        role: row.get(2)?,
        model: row.get(3)?,
        task_type: row.get(4)?,
        success: success != 0,
        cost_usd: row.get(6)?,
        tokens_used: tokens.max(0) as u64,
        duration_ms: duration.max(0) as u64,
        project_path: row.get(9)?,
    })
}

impl Store {
    pub async fn insert_metric(&self, metric: AgentMetric) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO agent_metrics (id, team_id, agent_name, role, model, task_type, \
                 success, cost_usd, tokens_used, duration_ms, project_path, created_at, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    new_id(),
                    metric.team_id,
                    metric.agent_name,
                    metric.role,
                    metric.model,
                    metric.task_type,
                    metric.success as i64,
                    metric.cost_usd,
                    metric.tokens_used as i64,
                    metric.duration_ms as i64,
                    metric.project_path,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_metrics(&self, team_id: &str) -> Result<Vec<AgentMetric>, StoreError> {
        let team_id = team_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT team_id, agent_name, role, model, task_type, success, cost_usd, \
                 tokens_used, duration_ms, project_path FROM agent_metrics \
                 WHERE team_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map(params![team_id], row_to_metric)?;
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

    #[tokio::test]
    async fn metrics_append_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        store
            .insert_metric(AgentMetric {
                team_id: "t1".into(),
                agent_name: "alice".into(),
                role: "coder".into(),
                model: "zai:glm-5".into(),
                task_type: "coding".into(),
                success: true,
                cost_usd: 0.02,
                tokens_used: 1500,
                duration_ms: 1200,
                project_path: "/proj".into(),
            })
            .await
            .unwrap();
        let rows = store.list_metrics("t1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
    }
}
