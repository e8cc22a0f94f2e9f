//! Role configuration: which tools an agent carries, its system prompt, and
//! its iteration cap. Built-in roles are overridden field-by-field from
//! `[team.roles.<name>]` in `weft.toml`.

use project_config::ProjectConfig;

use crate::agent_loop::DEFAULT_MAX_ITERATIONS;

/// Token in a role's system prompt replaced by the keeper index block.
pub const KEEPER_INDEX_TOKEN: &str = "{keeper_index}";

/// Heading used when the token is absent and keepers exist.
pub const KEEPER_INDEX_HEADING: &str = "## Context keepers";

#[derive(Clone, Debug, PartialEq)]
pub struct RoleConfig {
    pub name: String,
    pub tools: Vec<String>,
    pub system_prompt: String,
    pub max_iterations: u32,
}

const COORDINATION_TOOLS: &[&str] = &[
    "decision_log",
    "decision_query",
    "context_offload",
    "context_retrieve",
    "peer_ask_question",
    "peer_answer_question",
    "peer_forward_question",
    "peer_message",
    "peer_discovery",
];

fn with_coordination(extra: &[&str]) -> Vec<String> {
    COORDINATION_TOOLS
        .iter()
        .chain(extra)
        .map(|s| s.to_string())
        .collect()
}

/// Built-in role set used when `weft.toml` does not define the role.
pub fn builtin_role(name: &str) -> Option<RoleConfig> {
    let (tools, system_prompt) = match name {
        "lead" => (
            with_coordination(&[
                "peer_create_task",
                "peer_change_role",
                "team_spawn",
                "team_assign",
                "team_progress",
                "file_read",
                "directory_list",
            ]),
            format!(
                "You are the team lead. Break work into tasks, assign them, and keep the \
                 decision graph current. Ask peers before deciding alone.\n\n{KEEPER_INDEX_TOKEN}"
            ),
        ),
        "coder" => (
            with_coordination(&[
                "file_read",
                "file_write",
                "file_edit",
                "file_search",
                "content_search",
                "directory_list",
                "shell",
                "git",
                "lsp_diagnostics",
            ]),
            "You are a software engineer on a team. Implement the task you were assigned, \
             log significant decisions, and offload long context to a keeper when your \
             conversation grows."
                .to_string(),
        ),
        "reviewer" => (
            with_coordination(&["file_read", "content_search", "directory_list", "lsp_diagnostics"]),
            "You review peers' work. Read the decision graph before judging; answer peer \
             questions precisely."
                .to_string(),
        ),
        "researcher" => (
            with_coordination(&["file_read", "content_search", "directory_list"]),
            "You research the codebase and summarize findings for the team. Record \
             observations in the decision graph."
                .to_string(),
        ),
        _ => return None,
    };
    Some(RoleConfig {
        name: name.to_string(),
        tools,
        system_prompt,
        max_iterations: DEFAULT_MAX_ITERATIONS,
    })
}

/// Resolves a role: builtin defaults overridden field-by-field from config.
/// Unknown role names with no config entry yield `None` (agent start fails).
pub fn resolve_role(config: &ProjectConfig, name: &str) -> Option<RoleConfig> {
    let builtin = builtin_role(name);
    let toml = config.team.roles.get(name);
    match (builtin, toml) {
        (None, None) => None,
        (builtin, toml) => {
            let base = builtin.unwrap_or_else(|| RoleConfig {
                name: name.to_string(),
                tools: with_coordination(&[]),
                system_prompt: format!("You are a {name} on a software team."),
                max_iterations: DEFAULT_MAX_ITERATIONS,
            });
            let Some(toml) = toml else {
                return Some(base);
            };
            Some(RoleConfig {
                name: base.name,
                tools: toml.tools.clone().unwrap_or(base.tools),
                system_prompt: toml.system_prompt.clone().unwrap_or(base.system_prompt),
                max_iterations: toml.max_iterations.unwrap_or(base.max_iterations),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_roles_exist() {
        for name in ["lead", "coder", "reviewer", "researcher"] {
            let role = builtin_role(name).unwrap();
            assert!(!role.tools.is_empty());
            assert!(!role.system_prompt.is_empty());
        }
        assert!(builtin_role("poet").is_none());
    }

    #[test]
    fn config_overrides_win_field_by_field() {
        let mut config = ProjectConfig::default();
        config.team.roles.insert(
            "coder".to_string(),
            project_config::RoleToml {
                tools: None,
                system_prompt: Some("Custom prompt.".to_string()),
                max_iterations: Some(40),
            },
        );
        let role = resolve_role(&config, "coder").unwrap();
        assert_eq!(role.system_prompt, "Custom prompt.");
        assert_eq!(role.max_iterations, 40);
        // Tools untouched by the override.
        assert!(role.tools.contains(&"file_write".to_string()));
    }

    #[test]
    fn config_only_role_resolves_with_generic_base() {
        let mut config = ProjectConfig::default();
        config.team.roles.insert(
            "docs".to_string(),
            project_config::RoleToml {
                tools: Some(vec!["file_read".to_string(), "file_write".to_string()]),
                system_prompt: None,
                max_iterations: None,
            },
        );
        let role = resolve_role(&config, "docs").unwrap();
        assert_eq!(role.tools, vec!["file_read".to_string(), "file_write".to_string()]);
        assert!(role.system_prompt.contains("docs"));
    }

    #[test]
    fn unknown_role_without_config_fails() {
        let config = ProjectConfig::default();
        assert!(resolve_role(&config, "poet").is_none());
    }
}
