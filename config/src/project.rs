//! Typed schema for `weft.toml`.
//!
//! Every table is optional; defaults are chosen so an empty file gives a usable
//! single-provider setup. Unknown keys are ignored by serde so older configs
//! keep loading.

use std::collections::HashMap;

use serde::Deserialize;

/// Root of `weft.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub model: ModelConfig,
    pub permissions: PermissionsConfig,
    pub context: ContextConfig,
    pub team: TeamConfig,
    /// Per-provider token buckets, keyed by provider name (`anthropic`, `openai`, ...).
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub budget: BudgetConfig,
}

/// `[model]`: role-tier model identifiers, each `<provider>:<model_id>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub default: String,
    pub weak: String,
    pub architect: String,
    pub editor: String,
    pub escalation: EscalationConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: "anthropic:claude-sonnet-4-6".to_string(),
            weak: "anthropic:claude-haiku-4-5".to_string(),
            architect: "anthropic:claude-opus-4-6".to_string(),
            editor: "anthropic:claude-haiku-4-5".to_string(),
            escalation: EscalationConfig::default(),
        }
    }
}

/// `[model.escalation]`: ordered chain of models, ascending capability.
/// An empty chain disables escalation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub chain: Vec<String>,
}

/// `[permissions]`: tool names that never require a grant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub auto_approve: Vec<String>,
}

/// `[context]`: token budgets for context-window assembly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_repo_map_tokens: u32,
    pub max_decision_context_tokens: u32,
    pub reserved_output_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_repo_map_tokens: 2048,
            max_decision_context_tokens: 1024,
            reserved_output_tokens: 4096,
        }
    }
}

/// `[team]`: spawn templates and role definitions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    pub templates: HashMap<String, TeamTemplate>,
    pub roles: HashMap<String, RoleToml>,
}

/// `[team.templates.<name>]`: a pre-configured list of agents to spawn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TeamTemplate {
    pub agents: Vec<TemplateAgent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateAgent {
    pub name: String,
    pub role: String,
}

/// `[team.roles.<name>]`: overrides for a role. Missing fields fall back to the
/// built-in role of the same name (or the generic default role).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoleToml {
    pub tools: Option<Vec<String>>,
    pub system_prompt: Option<String>,
    pub max_iterations: Option<u32>,
}

/// `[rate_limits.<provider>]`: token bucket parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000.0,
            refill_per_second: 1_000.0,
        }
    }
}

/// `[budget]`: per-team cumulative cost ceiling in USD. `None` means unlimited.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub limit_usd: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = ProjectConfig::default();
        assert!(cfg.model.default.contains(':'));
        assert_eq!(cfg.context.reserved_output_tokens, 4096);
        assert!(cfg.budget.limit_usd.is_none());
        assert!(cfg.model.escalation.chain.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg: ProjectConfig =
            toml::from_str("[model]\ndefault = \"openai:gpt-5\"\nfuture_knob = 3\n").unwrap();
        assert_eq!(cfg.model.default, "openai:gpt-5");
    }
}
