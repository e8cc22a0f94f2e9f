//! Team task rows and the dependency table.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{new_id, now_rfc3339, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        Some(match s {
            "pending" => TaskStatus::Pending,
            "assigned" => TaskStatus::Assigned,
            "in_progress" => TaskStatus::InProgress,
            "done" => TaskStatus::Done,
            "failed" => TaskStatus::Failed,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Blocks,
    Requires,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Blocks => "blocks",
            DepType::Requires => "requires",
        }
    }

    pub fn parse(s: &str) -> Option<DepType> {
        Some(match s {
            "blocks" => DepType::Blocks,
            "requires" => DepType::Requires,
            _ => return None,
        })
    }
}

/// One unit of team work. Priority 1 is highest, 5 lowest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamTask {
    pub id: String,
    pub team_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub owner: Option<String>,
    pub priority: u8,
    pub model_hint: Option<String>,
    pub result: Option<String>,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDep {
    pub id: String,
    pub task_id: String,
    pub depends_on_id: String,
    pub dep_type: DepType,
}

/// Attributes for a new task.
#[derive(Clone, Debug)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub model_hint: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: 3,
            model_hint: None,
        }
    }
}

const TASK_COLS: &str = "id, team_id, title, description, status, owner, priority, model_hint, \
                         result, cost_usd, tokens_used, created_at, updated_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TeamTask> {
    let status: String = row.get(4)?;
    let priority: i64 = row.get(6)?;
    let tokens: i64 = row.get(10)?;
    Ok(TeamTask {
        id: row.get(0)?,
        team_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        owner: row.get(5)?,
        priority: priority.clamp(1, 5) as u8,
        model_hint: row.get(7)?,
        result: row.get(8)?,
        cost_usd: row.get(9)?,
        tokens_used: tokens.max(0) as u64,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl Store {
    pub async fn insert_task(&self, team_id: &str, task: NewTask) -> Result<TeamTask, StoreError> {
        let team_id = team_id.to_string();
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            let id = new_id();
            let priority = task.priority.clamp(1, 5);
            conn.execute(
                "INSERT INTO team_tasks (id, team_id, title, description, status, priority, \
                 model_hint, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?7)",
                params![id, team_id, task.title, task.description, priority, task.model_hint, now],
            )?;
            let row = conn.query_row(
                &format!("SELECT {TASK_COLS} FROM team_tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )?;
            Ok(row)
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TeamTask>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {TASK_COLS} FROM team_tasks WHERE id = ?1"),
                    params![id],
                    row_to_task,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Priority ascending (1 first), then insertion order.
    pub async fn list_tasks(&self, team_id: &str) -> Result<Vec<TeamTask>, StoreError> {
        let team_id = team_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLS} FROM team_tasks WHERE team_id = ?1 \
                 ORDER BY priority ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![team_id], row_to_task)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn set_task_owner(
        &self,
        id: &str,
        owner: &str,
        status: TaskStatus,
    ) -> Result<TeamTask, StoreError> {
        let id = id.to_string();
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE team_tasks SET owner = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, owner, status.as_str(), now_rfc3339()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "team_task",
                    id,
                });
            }
            let row = conn.query_row(
                &format!("SELECT {TASK_COLS} FROM team_tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )?;
            Ok(row)
        })
        .await
    }

    /// Moves status and accumulates result/cost counters.
    pub async fn update_task_progress(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&str>,
        cost_usd: f64,
        tokens_used: u64,
    ) -> Result<TeamTask, StoreError> {
        let id = id.to_string();
        let result = result.map(str::to_string);
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE team_tasks SET status = ?2, result = COALESCE(?3, result), \
                 cost_usd = cost_usd + ?4, tokens_used = tokens_used + ?5, updated_at = ?6 \
                 WHERE id = ?1",
                params![id, status.as_str(), result, cost_usd, tokens_used as i64, now_rfc3339()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "team_task",
                    id,
                });
            }
            let row = conn.query_row(
                &format!("SELECT {TASK_COLS} FROM team_tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )?;
            Ok(row)
        })
        .await
    }

    pub async fn insert_task_dep(
        &self,
        task_id: &str,
        depends_on_id: &str,
        dep_type: DepType,
    ) -> Result<TaskDep, StoreError> {
        let task_id = task_id.to_string();
        let depends_on_id = depends_on_id.to_string();
        self.with_conn(move |conn| {
            for task in [&task_id, &depends_on_id] {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM team_tasks WHERE id = ?1",
                        params![task],
                        |row| row.get(0),
                    )
                    .optional()?;
                if found.is_none() {
                    return Err(StoreError::NotFound {
                        entity: "team_task",
                        id: task.clone(),
                    });
                }
            }
            let id = new_id();
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO team_task_deps (id, task_id, depends_on_id, dep_type, created_at, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, task_id, depends_on_id, dep_type.as_str(), now],
            )?;
            Ok(TaskDep {
                id,
                task_id,
                depends_on_id,
                dep_type,
            })
        })
        .await
    }

    pub async fn list_task_deps(&self, task_id: &str) -> Result<Vec<TaskDep>, StoreError> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, depends_on_id, dep_type FROM team_task_deps \
                 WHERE task_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map(params![task_id], |row| {
                let dep_type: String = row.get(3)?;
                Ok(TaskDep {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    depends_on_id: row.get(2)?,
                    dep_type: DepType::parse(&dep_type).unwrap_or(DepType::Blocks),
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}
