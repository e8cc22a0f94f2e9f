//! Embedded relational store over SQLite.
//!
//! One database file per project (default `<project>/.weft/weft.db`,
//! `DB_PATH` overrides). The handle keeps only the path; every operation opens
//! a connection inside `spawn_blocking`, so async workers never hold a
//! connection across an await point. Transactions are short-lived: a single
//! entity, or the supersede triple.

pub mod decisions;
pub mod keepers;
pub mod messages;
pub mod metrics;
pub mod permissions;
pub mod sessions;
pub mod tasks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("serialize {entity}: {message}")]
    Serialize { entity: &'static str, message: String },
    #[error("store runtime: {0}")]
    Runtime(String),
}

/// Clonable handle to the project database.
#[derive(Clone)]
pub struct Store {
    db_path: Arc<PathBuf>,
}

/// Resolve the database location: `DB_PATH` env override, else
/// `<project>/.weft/weft.db`.
pub fn default_db_path(project_path: &Path) -> PathBuf {
    match std::env::var("DB_PATH") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => project_path.join(".weft").join("weft.db"),
    }
}

impl Store {
    /// Opens (creating if needed) the database and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&db_path)?;
        create_schema(&conn)?;
        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    /// Runs `f` with a fresh connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = Arc::clone(&self.db_path);
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(db_path.as_path())?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            project_path TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            prompt_tokens INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            tool_calls TEXT,
            tool_call_id TEXT,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

        CREATE TABLE IF NOT EXISTS decision_nodes (
            id TEXT PRIMARY KEY,
            change_id TEXT NOT NULL UNIQUE,
            node_type TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            confidence INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}',
            session_id TEXT,
            agent_name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_decision_nodes_type ON decision_nodes(node_type);
        CREATE INDEX IF NOT EXISTS idx_decision_nodes_status ON decision_nodes(status);
        CREATE INDEX IF NOT EXISTS idx_decision_nodes_session ON decision_nodes(session_id);

        CREATE TABLE IF NOT EXISTS decision_edges (
            id TEXT PRIMARY KEY,
            change_id TEXT NOT NULL UNIQUE,
            from_node_id TEXT NOT NULL,
            to_node_id TEXT NOT NULL,
            edge_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            rationale TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_decision_edges_from ON decision_edges(from_node_id);
        CREATE INDEX IF NOT EXISTS idx_decision_edges_to ON decision_edges(to_node_id);
        CREATE INDEX IF NOT EXISTS idx_decision_edges_type ON decision_edges(edge_type);

        CREATE TABLE IF NOT EXISTS permission_grants (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            tool TEXT NOT NULL,
            scope TEXT NOT NULL,
            granted_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(session_id, tool, scope)
        );

        CREATE TABLE IF NOT EXISTS team_tasks (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            owner TEXT,
            priority INTEGER NOT NULL DEFAULT 3,
            model_hint TEXT,
            result TEXT,
            cost_usd REAL NOT NULL DEFAULT 0,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_team_tasks_team ON team_tasks(team_id);
        CREATE INDEX IF NOT EXISTS idx_team_tasks_status ON team_tasks(status);

        CREATE TABLE IF NOT EXISTS team_task_deps (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            depends_on_id TEXT NOT NULL,
            dep_type TEXT NOT NULL DEFAULT 'blocks',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_team_task_deps_task ON team_task_deps(task_id);

        CREATE TABLE IF NOT EXISTS context_keepers (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            source_agent TEXT NOT NULL,
            messages TEXT NOT NULL DEFAULT '[]',
            token_count INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_context_keepers_team ON context_keepers(team_id);

        CREATE TABLE IF NOT EXISTS agent_metrics (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL,
            agent_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            task_type TEXT NOT NULL DEFAULT '',
            success INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            project_path TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agent_metrics_model_task ON agent_metrics(model, task_type);
        CREATE INDEX IF NOT EXISTS idx_agent_metrics_task_type ON agent_metrics(task_type);
        "#,
    )?;
    Ok(())
}

/// RFC 3339 timestamp for row columns.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fresh UUID v4 row id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
