//! Role → model mapping, failure counting, and the escalation chain.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use project_config::ProjectConfig;

use crate::store::tasks::TeamTask;

/// Default failure threshold before an agent escalates.
pub const ESCALATION_THRESHOLD: u32 = 2;

/// Outcome of an escalation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Escalation {
    Next(String),
    /// Already at the top of the chain.
    MaxReached,
    /// No chain configured.
    Disabled,
}

struct RouterInner {
    default_model: String,
    role_models: HashMap<String, String>,
    /// Legacy tier labels (`weak`, `strong`, `architect`, `editor`) resolved to
    /// concrete models when a task's `model_hint` has no provider colon.
    tier_labels: HashMap<String, String>,
    chain: Vec<String>,
    failures: DashMap<(String, String, String), u32>,
}

/// Clonable router; failure counts live for the process lifetime and survive
/// agent restarts (see `reset_team`).
#[derive(Clone)]
pub struct ModelRouter {
    inner: Arc<RouterInner>,
}

impl ModelRouter {
    pub fn new(
        default_model: impl Into<String>,
        role_models: HashMap<String, String>,
        chain: Vec<String>,
    ) -> Self {
        let default_model = default_model.into();
        let mut tier_labels = HashMap::new();
        tier_labels.insert("strong".to_string(), default_model.clone());
        Self {
            inner: Arc::new(RouterInner {
                default_model,
                role_models,
                tier_labels,
                chain,
                failures: DashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &ProjectConfig) -> Self {
        let model = &config.model;
        let mut role_models = HashMap::new();
        // Conventional role tiers; per-role overrides come through role configs
        // carrying explicit model hints.
        role_models.insert("lead".to_string(), model.default.clone());
        role_models.insert("architect".to_string(), model.architect.clone());
        role_models.insert("editor".to_string(), model.editor.clone());

        let mut tier_labels = HashMap::new();
        tier_labels.insert("weak".to_string(), model.weak.clone());
        tier_labels.insert("strong".to_string(), model.default.clone());
        tier_labels.insert("architect".to_string(), model.architect.clone());
        tier_labels.insert("editor".to_string(), model.editor.clone());

        Self {
            inner: Arc::new(RouterInner {
                default_model: model.default.clone(),
                role_models,
                tier_labels,
                chain: model.escalation.chain.clone(),
                failures: DashMap::new(),
            }),
        }
    }

    /// Model for `(role, task)`: the task's `model_hint` wins (verbatim when it
    /// carries a provider colon, else looked up as a tier label), then the
    /// role's default, then the global default.
    pub fn select(&self, role: &str, task: Option<&TeamTask>) -> String {
        if let Some(hint) = task.and_then(|t| t.model_hint.as_deref()) {
            if hint.contains(':') {
                return hint.to_string();
            }
            if let Some(model) = self.inner.tier_labels.get(hint) {
                return model.clone();
            }
        }
        self.inner
            .role_models
            .get(role)
            .cloned()
            .unwrap_or_else(|| self.inner.default_model.clone())
    }

    pub fn record_failure(&self, team_id: &str, agent: &str, task_id: &str) -> u32 {
        let mut count = self
            .inner
            .failures
            .entry(key(team_id, agent, task_id))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&self, team_id: &str, agent: &str, task_id: &str) {
        self.inner.failures.remove(&key(team_id, agent, task_id));
    }

    pub fn failure_count(&self, team_id: &str, agent: &str, task_id: &str) -> u32 {
        self.inner
            .failures
            .get(&key(team_id, agent, task_id))
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn should_escalate(
        &self,
        team_id: &str,
        agent: &str,
        task_id: &str,
        threshold: u32,
    ) -> bool {
        self.failure_count(team_id, agent, task_id) >= threshold
    }

    pub fn escalation_enabled(&self) -> bool {
        !self.inner.chain.is_empty()
    }

    /// Next model up the chain from `current`. A model outside the chain
    /// escalates to the chain's first entry.
    pub fn escalate(&self, current: &str) -> Escalation {
        if self.inner.chain.is_empty() {
            return Escalation::Disabled;
        }
        match self.inner.chain.iter().position(|m| m == current) {
            Some(index) if index + 1 < self.inner.chain.len() => {
                Escalation::Next(self.inner.chain[index + 1].clone())
            }
            Some(_) => Escalation::MaxReached,
            None => Escalation::Next(self.inner.chain[0].clone()),
        }
    }

    /// Clears all failure counters for a team. Escalation counters are NOT
    /// cleared on agent restart; only this per-team reset clears them.
    pub fn reset_team(&self, team_id: &str) {
        self.inner.failures.retain(|(team, _, _), _| team != team_id);
    }
}

fn key(team_id: &str, agent: &str, task_id: &str) -> (String, String, String) {
    (team_id.to_string(), agent.to_string(), task_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::{TaskStatus, TeamTask};

    fn task_with_hint(hint: Option<&str>) -> TeamTask {
        TeamTask {
            id: "task-1".into(),
            team_id: "t1".into(),
            title: "t".into(),
            description: String::new(),
            status: TaskStatus::Pending,
            owner: None,
            priority: 3,
            model_hint: hint.map(str::to_string),
            result: None,
            cost_usd: 0.0,
            tokens_used: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn router() -> ModelRouter {
        let mut roles = HashMap::new();
        roles.insert("coder".to_string(), "zai:glm-5".to_string());
        ModelRouter::new(
            "anthropic:claude-sonnet-4-6",
            roles,
            vec![
                "zai:glm-5".to_string(),
                "anthropic:claude-sonnet-4-6".to_string(),
                "anthropic:claude-opus-4-6".to_string(),
            ],
        )
    }

    #[test]
    fn hint_with_colon_passes_through() {
        let r = router();
        let task = task_with_hint(Some("openai:gpt-5"));
        assert_eq!(r.select("coder", Some(&task)), "openai:gpt-5");
    }

    #[test]
    fn hint_tier_label_resolves_then_role_then_default() {
        let r = router();
        let task = task_with_hint(Some("strong"));
        assert_eq!(r.select("coder", Some(&task)), "anthropic:claude-sonnet-4-6");
        assert_eq!(r.select("coder", None), "zai:glm-5");
        assert_eq!(r.select("unknown-role", None), "anthropic:claude-sonnet-4-6");
    }

    #[test]
    fn failure_then_success_resets_count() {
        let r = router();
        r.record_failure("t1", "alice", "task-1");
        r.record_failure("t1", "alice", "task-1");
        assert!(r.should_escalate("t1", "alice", "task-1", ESCALATION_THRESHOLD));
        r.record_success("t1", "alice", "task-1");
        assert_eq!(r.failure_count("t1", "alice", "task-1"), 0);
        assert!(!r.should_escalate("t1", "alice", "task-1", ESCALATION_THRESHOLD));
    }

    #[test]
    fn escalate_walks_the_chain() {
        let r = router();
        assert_eq!(
            r.escalate("zai:glm-5"),
            Escalation::Next("anthropic:claude-sonnet-4-6".to_string())
        );
        assert_eq!(r.escalate("anthropic:claude-opus-4-6"), Escalation::MaxReached);
        // Off-chain model restarts at the chain head.
        assert_eq!(r.escalate("openai:gpt-5"), Escalation::Next("zai:glm-5".to_string()));

        let disabled = ModelRouter::new("m", HashMap::new(), vec![]);
        assert_eq!(disabled.escalate("m"), Escalation::Disabled);
    }

    #[test]
    fn reset_team_clears_counters_for_that_team_only() {
        let r = router();
        r.record_failure("t1", "alice", "task-1");
        r.record_failure("t2", "zoe", "task-2");
        r.reset_team("t1");
        assert_eq!(r.failure_count("t1", "alice", "task-1"), 0);
        assert_eq!(r.failure_count("t2", "zoe", "task-2"), 1);
    }
}
