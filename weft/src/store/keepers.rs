//! Keeper snapshot rows: one per keeper, updated in place.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, Store, StoreError};
use crate::message::Message;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeeperSnapshot {
    pub id: String,
    pub team_id: String,
    pub topic: String,
    pub source_agent: String,
    pub messages: Vec<Message>,
    pub token_count: u32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: String,
}

const KEEPER_COLS: &str =
    "id, team_id, topic, source_agent, messages, token_count, metadata, status";

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<KeeperSnapshot> {
    let messages: String = row.get(4)?;
    let token_count: i64 = row.get(5)?;
    let metadata: String = row.get(6)?;
    Ok(KeeperSnapshot {
        id: row.get(0)?,
        team_id: row.get(1)?,
        topic: row.get(2)?,
        source_agent: row.get(3)?,
        messages: serde_json::from_str(&messages).unwrap_or_default(),
        token_count: token_count.max(0) as u32,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        status: row.get(7)?,
    })
}

impl Store {
    /// INSERT-or-UPDATE by primary key.
    pub async fn upsert_keeper(&self, snapshot: KeeperSnapshot) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let messages =
                serde_json::to_string(&snapshot.messages).map_err(|e| StoreError::Serialize {
                    entity: "keeper.messages",
                    message: e.to_string(),
                })?;
            let metadata =
                serde_json::to_string(&snapshot.metadata).map_err(|e| StoreError::Serialize {
                    entity: "keeper.metadata",
                    message: e.to_string(),
                })?;
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO context_keepers (id, team_id, topic, source_agent, messages, \
                 token_count, metadata, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
                 ON CONFLICT(id) DO UPDATE SET messages = ?5, token_count = ?6, metadata = ?7, \
                 status = ?8, updated_at = ?9",
                params![
                    snapshot.id,
                    snapshot.team_id,
                    snapshot.topic,
                    snapshot.source_agent,
                    messages,
                    snapshot.token_count as i64,
                    metadata,
                    snapshot.status,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_keeper(&self, id: &str) -> Result<Option<KeeperSnapshot>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {KEEPER_COLS} FROM context_keepers WHERE id = ?1"),
                    params![id],
                    row_to_snapshot,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn list_keepers(&self, team_id: &str) -> Result<Vec<KeeperSnapshot>, StoreError> {
        let team_id = team_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {KEEPER_COLS} FROM context_keepers WHERE team_id = ?1 ORDER BY rowid ASC"
            ))?;
            let rows = stmt.query_map(params![team_id], row_to_snapshot)?;
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
    async fn upsert_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let mut snap = KeeperSnapshot {
            id: "k1".into(),
            team_id: "t1".into(),
            topic: "auth flow".into(),
            source_agent: "alice".into(),
            messages: vec![Message::user("jwt details")],
            token_count: 8,
            metadata: Default::default(),
            status: "active".into(),
        };
        store.upsert_keeper(snap.clone()).await.unwrap();
        snap.messages.push(Message::user("more"));
        snap.token_count = 16;
        store.upsert_keeper(snap.clone()).await.unwrap();

        let loaded = store.get_keeper("k1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.token_count, 16);
        assert_eq!(store.list_keepers("t1").await.unwrap().len(), 1);
    }
}
