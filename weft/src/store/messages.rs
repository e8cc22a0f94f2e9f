//! Message log rows: insertion-ordered per session, tool calls stored as a
//! JSON blob.

use rusqlite::{params, Row};

use super::{new_id, now_rfc3339, Store, StoreError};
use crate::message::{estimate_tokens, Message, Role, ToolCallRequest};

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<(String, String, Option<String>, Option<String>)>
{
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_tool_calls(blob: Option<String>) -> Vec<ToolCallRequest> {
    blob.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

impl Store {
    /// Appends one message; returns its row id.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<String, StoreError> {
        let ids = self.append_messages(session_id, std::slice::from_ref(message)).await?;
        Ok(ids.into_iter().next().unwrap_or_default())
    }

    /// Appends a batch in one transaction, preserving order.
    pub async fn append_messages(
        &self,
        session_id: &str,
        batch: &[Message],
    ) -> Result<Vec<String>, StoreError> {
        let session_id = session_id.to_string();
        let batch = batch.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(batch.len());
            for message in &batch {
                let id = new_id();
                let tool_calls = if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&message.tool_calls).map_err(|e| {
                        StoreError::Serialize {
                            entity: "message.tool_calls",
                            message: e.to_string(),
                        }
                    })?)
                };
                let now = now_rfc3339();
                tx.execute(
                    "INSERT INTO messages (id, session_id, role, content, tool_calls, \
                     tool_call_id, token_count, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        id,
                        session_id,
                        message.role.as_str(),
                        message.content,
                        tool_calls,
                        message.tool_call_id,
                        estimate_tokens(&message.content) as i64,
                        now,
                    ],
                )?;
                ids.push(id);
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    /// Full message history in insertion order.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, tool_calls, tool_call_id FROM messages \
                 WHERE session_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_message)?;
            let mut out = Vec::new();
            for row in rows {
                let (role, content, tool_calls, tool_call_id) = row?;
                out.push(Message {
                    role: Role::from_str_lossy(&role),
                    content,
                    tool_calls: decode_tool_calls(tool_calls),
                    tool_call_id,
                });
            }
            Ok(out)
        })
        .await
    }

    /// Replaces a session's persisted log with `messages` (orderly-shutdown
    /// flush for team agents).
    pub async fn replace_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let sid = session_id.to_string();
        {
            let sid = sid.clone();
            self.with_conn(move |conn| {
                conn.execute("DELETE FROM messages WHERE session_id = ?1", params![sid])?;
                Ok(())
            })
            .await?;
        }
        self.append_messages(session_id, messages).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_tool_calls_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let calls = vec![ToolCallRequest::new(
            "c1",
            "file_read",
            serde_json::json!({"file_path": "README.md"}),
        )];
        let history = vec![
            Message::user("read README"),
            Message::assistant_with_calls("", calls.clone()),
            Message::tool("Content", "c1"),
            Message::assistant("It says Hello"),
        ];
        store.append_messages("s1", &history).await.unwrap();

        let loaded = store.list_messages("s1").await.unwrap();
        assert_eq!(loaded, history);
    }

    #[tokio::test]
    async fn replace_overwrites_prior_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        store
            .append_messages("s1", &[Message::user("old")])
            .await
            .unwrap();
        store
            .replace_messages("s1", &[Message::user("new")])
            .await
            .unwrap();
        let loaded = store.list_messages("s1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "new");
    }
}
