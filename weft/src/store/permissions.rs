//! Permission grant rows: unique per (session, tool, scope).

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{new_id, now_rfc3339, Store, StoreError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: String,
    pub session_id: String,
    pub tool: String,
    /// Literal path or `*`.
    pub scope: String,
    pub granted_at: String,
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<PermissionGrant> {
    Ok(PermissionGrant {
        id: row.get(0)?,
        session_id: row.get(1)?,
        tool: row.get(2)?,
        scope: row.get(3)?,
        granted_at: row.get(4)?,
    })
}

impl Store {
    /// Idempotent: re-granting the same (session, tool, scope) is a no-op.
    pub async fn insert_grant(
        &self,
        session_id: &str,
        tool: &str,
        scope: &str,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let tool = tool.to_string();
        let scope = scope.to_string();
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO permission_grants \
                 (id, session_id, tool, scope, granted_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
                params![new_id(), session_id, tool, scope, now],
            )?;
            Ok(())
        })
        .await
    }

    /// True when a grant covers (tool, path): exact scope or `*`.
    pub async fn has_grant(
        &self,
        session_id: &str,
        tool: &str,
        path: &str,
    ) -> Result<bool, StoreError> {
        let session_id = session_id.to_string();
        let tool = tool.to_string();
        let path = path.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM permission_grants \
                 WHERE session_id = ?1 AND tool = ?2 AND (scope = '*' OR scope = ?3)",
                params![session_id, tool, path],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn list_grants(&self, session_id: &str) -> Result<Vec<PermissionGrant>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, tool, scope, granted_at FROM permission_grants \
                 WHERE session_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_grant)?;
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
    async fn grants_are_idempotent_and_wildcard_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        store.insert_grant("s1", "file_write", "*").await.unwrap();
        store.insert_grant("s1", "file_write", "*").await.unwrap();
        assert_eq!(store.list_grants("s1").await.unwrap().len(), 1);

        assert!(store.has_grant("s1", "file_write", "src/lib.rs").await.unwrap());
        assert!(!store.has_grant("s1", "shell", "src/lib.rs").await.unwrap());

        store.insert_grant("s1", "shell", "scripts/build.sh").await.unwrap();
        assert!(store.has_grant("s1", "shell", "scripts/build.sh").await.unwrap());
        assert!(!store.has_grant("s1", "shell", "scripts/other.sh").await.unwrap());
    }
}
