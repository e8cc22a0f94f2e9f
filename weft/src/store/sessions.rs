//! Session/team rows. A team is a session row grouping many agents; a
//! team-of-one is a plain session.

use rusqlite::{params, OptionalExtension, Row};

use super::{new_id, now_rfc3339, Store, StoreError};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionRow {
    pub id: String,
    pub title: String,
    pub model: String,
    pub project_path: String,
    pub status: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        project_path: row.get(3)?,
        status: row.get(4)?,
        prompt_tokens: row.get(5)?,
        completion_tokens: row.get(6)?,
        cost_usd: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const SESSION_COLS: &str =
    "id, title, model, project_path, status, prompt_tokens, completion_tokens, cost_usd, \
     created_at, updated_at";

impl Store {
    /// Inserts a session/team row. Existing id is an upsert on title/model/path
    /// (create-on-first-use semantics).
    pub async fn create_session(
        &self,
        id: &str,
        title: &str,
        model: &str,
        project_path: &str,
    ) -> Result<SessionRow, StoreError> {
        let id = id.to_string();
        let title = title.to_string();
        let model = model.to_string();
        let project_path = project_path.to_string();
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO sessions (id, title, model, project_path, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5) \
                 ON CONFLICT(id) DO UPDATE SET title = ?2, model = ?3, project_path = ?4, updated_at = ?5",
                params![id, title, model, project_path, now],
            )?;
            let row = conn.query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
                params![id],
                row_to_session,
            )?;
            Ok(row)
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRow>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
                    params![id],
                    row_to_session,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn update_session_status(&self, id: &str, status: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let status = status.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status, now_rfc3339()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    entity: "session",
                    id,
                });
            }
            Ok(())
        })
        .await
    }

    /// Accumulates token/cost counters on the session row.
    pub async fn add_session_usage(
        &self,
        id: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
        cost_usd: f64,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET prompt_tokens = prompt_tokens + ?2, \
                 completion_tokens = completion_tokens + ?3, cost_usd = cost_usd + ?4, \
                 updated_at = ?5 WHERE id = ?1",
                params![id, prompt_tokens, completion_tokens, cost_usd, now_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    /// Session id for a team agent's persisted message log.
    pub fn agent_log_id(team_id: &str, agent_name: &str) -> String {
        format!("{team_id}:agent:{agent_name}")
    }

    /// Fresh id for a new team or session.
    pub fn fresh_session_id() -> String {
        new_id()
    }
}
