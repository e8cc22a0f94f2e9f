//! Load configuration for a weft project: typed `weft.toml` plus project `.env`,
//! applied to the process environment with priority: **existing env > .env**.
//!
//! The TOML file carries the model/escalation/permission/context/team/rate-limit/
//! budget tables; `.env` carries secrets (`<PROVIDER>_API_KEY`, `DB_PATH`, `PORT`).

mod dotenv;
mod project;

use std::path::Path;

use thiserror::Error;

pub use project::{
    BudgetConfig, ContextConfig, EscalationConfig, ModelConfig, PermissionsConfig, ProjectConfig,
    RateLimitConfig, RoleToml, TeamConfig, TeamTemplate, TemplateAgent,
};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read weft.toml: {0}")]
    TomlRead(std::io::Error),
    #[error("parse weft.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Name of the per-project configuration file.
pub const CONFIG_FILE: &str = "weft.toml";

/// Loads `weft.toml` from `project_dir`. A missing file yields the defaults;
/// a present-but-invalid file is an error (silently ignoring a typo'd config
/// is worse than failing startup).
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, LoadError> {
    let path = project_dir.join(CONFIG_FILE);
    if !path.is_file() {
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::TomlRead)?;
    let config: ProjectConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Loads `.env` from `project_dir` and sets environment variables only for keys
/// that are **not** already set, so existing env has highest priority.
pub fn load_and_apply_env(project_dir: &Path) -> Result<(), LoadError> {
    let dotenv_map = dotenv::load_env_map(Some(project_dir)).map_err(LoadError::DotenvRead)?;
    for (key, value) in dotenv_map {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_project_config(dir.path()).unwrap();
        assert!(!cfg.model.default.is_empty());
        assert!(cfg.team.templates.is_empty());
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not valid [[[\n").unwrap();
        let result = load_project_config(dir.path());
        assert!(matches!(result, Err(LoadError::TomlParse(_))));
    }

    #[test]
    fn full_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[model]
default = "anthropic:claude-sonnet-4-6"
weak = "anthropic:claude-haiku-4-5"

[model.escalation]
chain = ["zai:glm-5", "anthropic:claude-sonnet-4-6", "anthropic:claude-opus-4-6"]

[permissions]
auto_approve = ["file_read", "directory_list"]

[context]
reserved_output_tokens = 2048

[team.templates.feature]
agents = [{ name = "lead", role = "lead" }, { name = "coder", role = "coder" }]

[team.roles.coder]
tools = ["file_read", "file_write"]
system_prompt = "You write code."
max_iterations = 30

[rate_limits.anthropic]
capacity = 10000
refill_per_second = 100.0

[budget]
limit_usd = 5.0
"#,
        )
        .unwrap();

        let cfg = load_project_config(dir.path()).unwrap();
        assert_eq!(cfg.model.default, "anthropic:claude-sonnet-4-6");
        assert_eq!(cfg.model.escalation.chain.len(), 3);
        assert_eq!(cfg.permissions.auto_approve.len(), 2);
        assert_eq!(cfg.context.reserved_output_tokens, 2048);
        assert_eq!(cfg.team.templates["feature"].agents.len(), 2);
        assert_eq!(cfg.team.roles["coder"].max_iterations, Some(30));
        assert_eq!(cfg.rate_limits["anthropic"].capacity, 10000.0);
        assert_eq!(cfg.budget.limit_usd, Some(5.0));
    }

    #[test]
    fn existing_env_wins_over_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "WEFT_CFG_TEST_KEY=from_dotenv\n").unwrap();
        env::set_var("WEFT_CFG_TEST_KEY", "from_env");
        load_and_apply_env(dir.path()).unwrap();
        assert_eq!(env::var("WEFT_CFG_TEST_KEY").as_deref(), Ok("from_env"));
        env::remove_var("WEFT_CFG_TEST_KEY");
    }

    #[test]
    fn dotenv_applied_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "WEFT_CFG_TEST_UNSET=value\n").unwrap();
        env::remove_var("WEFT_CFG_TEST_UNSET");
        load_and_apply_env(dir.path()).unwrap();
        assert_eq!(env::var("WEFT_CFG_TEST_UNSET").as_deref(), Ok("value"));
        env::remove_var("WEFT_CFG_TEST_UNSET");
    }
}
