//! Per-session permission grants with a three-valued check.
//!
//! A grant is keyed by (session, tool, scope) where scope is a literal path or
//! `*`. `check` answers allowed / ask / denied: auto-approved tools and
//! matching grants are allowed, everything else asks. The interactive layer
//! (Session) turns an `Ask` into a pending loop suspension and may deny.

use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError};

pub use crate::store::permissions::PermissionGrant;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCheck {
    Allowed,
    Ask,
    Denied,
}

/// Grant store plus the config-driven auto-approve list.
#[derive(Clone)]
pub struct Permissions {
    store: Store,
    auto_approve: Vec<String>,
}

impl Permissions {
    pub fn new(store: Store, auto_approve: Vec<String>) -> Self {
        Self {
            store,
            auto_approve,
        }
    }

    pub fn is_auto_approved(&self, tool: &str) -> bool {
        self.auto_approve.iter().any(|t| t == tool)
    }

    pub async fn check(
        &self,
        session_id: &str,
        tool: &str,
        path: &str,
    ) -> Result<PermissionCheck, StoreError> {
        if self.is_auto_approved(tool) {
            return Ok(PermissionCheck::Allowed);
        }
        if self.store.has_grant(session_id, tool, path).await? {
            return Ok(PermissionCheck::Allowed);
        }
        Ok(PermissionCheck::Ask)
    }

    /// Records a persistent grant (allow-always). Idempotent.
    pub async fn grant(&self, session_id: &str, tool: &str, scope: &str) -> Result<(), StoreError> {
        self.store.insert_grant(session_id, tool, scope).await
    }

    pub async fn grants_for(&self, session_id: &str) -> Result<Vec<PermissionGrant>, StoreError> {
        self.store.list_grants(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn permissions(auto: &[&str]) -> (tempfile::TempDir, Permissions) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let perms = Permissions::new(store, auto.iter().map(|s| s.to_string()).collect());
        (dir, perms)
    }

    #[tokio::test]
    async fn auto_approved_tools_are_allowed() {
        let (_dir, perms) = permissions(&["file_read"]).await;
        assert_eq!(
            perms.check("s1", "file_read", "src/lib.rs").await.unwrap(),
            PermissionCheck::Allowed
        );
    }

    #[tokio::test]
    async fn ungrant_tool_asks_then_grant_allows() {
        let (_dir, perms) = permissions(&[]).await;
        assert_eq!(
            perms.check("s1", "file_write", "src/lib.rs").await.unwrap(),
            PermissionCheck::Ask
        );
        perms.grant("s1", "file_write", "src/lib.rs").await.unwrap();
        assert_eq!(
            perms.check("s1", "file_write", "src/lib.rs").await.unwrap(),
            PermissionCheck::Allowed
        );
        // Other paths still ask.
        assert_eq!(
            perms.check("s1", "file_write", "other.rs").await.unwrap(),
            PermissionCheck::Ask
        );
    }

    #[tokio::test]
    async fn wildcard_grant_covers_every_path() {
        let (_dir, perms) = permissions(&[]).await;
        perms.grant("s1", "shell", "*").await.unwrap();
        assert_eq!(
            perms.check("s1", "shell", "anything").await.unwrap(),
            PermissionCheck::Allowed
        );
    }
}
