//! Tools that reach the TeamManager and TaskManager: spawning agents,
//! creating and assigning tasks, and reporting team progress.

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    optional_str, require_same_team, require_str, ParamSpec, Tool, ToolContext, ToolError,
    ToolOutput, ToolSpec,
};
use crate::store::tasks::{DepType, NewTask};
use crate::team::manager::TeamManager;
use crate::team::tasks::TaskManager;

/// `peer_create_task`
pub struct PeerCreateTaskTool {
    tasks: TaskManager,
}

impl PeerCreateTaskTool {
    pub fn new(tasks: TaskManager) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for PeerCreateTaskTool {
    fn name(&self) -> &str {
        "peer_create_task"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "peer_create_task".into(),
            description: "Create a task on the team board. Priority 1 is highest, 5 lowest."
                .into(),
            parameters: vec![
                ParamSpec::required("title", "string", "Task title"),
                ParamSpec::optional("description", "string", "What needs doing"),
                ParamSpec::optional("priority", "integer", "1 (highest) to 5 (lowest), default 3"),
                ParamSpec::optional("model_hint", "string", "Model or tier the task should use"),
                ParamSpec::optional("depends_on", "string", "Task id this one requires first"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let mut task = NewTask::new(
            require_str(&args, "title")?,
            optional_str(&args, "description").unwrap_or(""),
        );
        if let Some(priority) = args.get("priority").and_then(Value::as_u64) {
            task.priority = priority.clamp(1, 5) as u8;
        }
        task.model_hint = optional_str(&args, "model_hint").map(str::to_string);

        let created = self
            .tasks
            .create_task(&team_id, task)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        if let Some(depends_on) = optional_str(&args, "depends_on") {
            self.tasks
                .add_dependency(&created.id, depends_on, DepType::Requires)
                .await
                .map_err(|e| ToolError::Message(e.to_string()))?;
        }
        Ok(ToolOutput::Text(format!(
            "Created task {} \"{}\" (priority {})",
            created.id, created.title, created.priority
        )))
    }
}

/// `team_assign`
pub struct TeamAssignTool {
    tasks: TaskManager,
}

impl TeamAssignTool {
    pub fn new(tasks: TaskManager) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for TeamAssignTool {
    fn name(&self) -> &str {
        "team_assign"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "team_assign".into(),
            description: "Assign a task to an agent; the agent picks it up via the task topic."
                .into(),
            parameters: vec![
                ParamSpec::required("task_id", "string", "Task to assign"),
                ParamSpec::required("agent_name", "string", "Owning agent"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let task_id = require_str(&args, "task_id")?;
        let agent_name = require_str(&args, "agent_name")?;
        let task = self
            .tasks
            .get_task(task_id)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?
            .ok_or_else(|| ToolError::Message(format!("no task '{task_id}'")))?;
        if task.team_id != team_id {
            return Err(ToolError::Message(format!(
                "refusing cross-team access to task '{task_id}'"
            )));
        }
        let task = self
            .tasks
            .assign_task(task_id, agent_name)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        Ok(ToolOutput::Text(format!(
            "Assigned \"{}\" to {agent_name}",
            task.title
        )))
    }
}

/// `team_progress`
pub struct TeamProgressTool {
    tasks: TaskManager,
}

impl TeamProgressTool {
    pub fn new(tasks: TaskManager) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for TeamProgressTool {
    fn name(&self) -> &str {
        "team_progress"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "team_progress".into(),
            description: "Summarize the team's task board and the next available task.".into(),
            parameters: vec![],
        }
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let summary = self
            .tasks
            .progress_summary(&team_id)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        let next = self
            .tasks
            .next_available(&team_id)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        let next_line = match next {
            Some(task) => format!("Next available: \"{}\" ({})", task.title, task.id),
            None => "Next available: none".to_string(),
        };
        Ok(ToolOutput::Text(format!("{summary}\n{next_line}")))
    }
}

/// `team_spawn`: add an agent (or a whole template) to the current team.
pub struct TeamSpawnTool {
    manager: Weak<TeamManager>,
}

impl TeamSpawnTool {
    pub fn new(manager: Weak<TeamManager>) -> Self {
        Self { manager }
    }

    fn manager(&self) -> Result<std::sync::Arc<TeamManager>, ToolError> {
        self.manager
            .upgrade()
            .ok_or_else(|| ToolError::Message("team manager is shutting down".to_string()))
    }
}

#[async_trait]
impl Tool for TeamSpawnTool {
    fn name(&self) -> &str {
        "team_spawn"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "team_spawn".into(),
            description: "Spawn a new agent on this team, or expand a configured template \
                          into several agents."
                .into(),
            parameters: vec![
                ParamSpec::optional("name", "string", "New agent's name"),
                ParamSpec::optional("role", "string", "New agent's role"),
                ParamSpec::optional("template", "string", "Template from [team.templates.*]"),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let team_id = require_same_team(ctx, None)?;
        let manager = self.manager()?;

        if let Some(template) = optional_str(&args, "template") {
            let names = manager
                .spawn_from_template(&team_id, template)
                .await
                .map_err(|e| ToolError::Message(e.to_string()))?;
            return Ok(ToolOutput::Text(format!(
                "Spawned {} agent(s) from template '{template}': {}",
                names.len(),
                names.join(", ")
            )));
        }

        let name = require_str(&args, "name")?;
        let role = require_str(&args, "role")?;
        manager
            .spawn_agent(&team_id, name, role, None)
            .await
            .map_err(|e| ToolError::Message(e.to_string()))?;
        Ok(ToolOutput::Text(format!("Spawned {name} as {role}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::store::Store;

    fn ctx() -> ToolContext {
        ToolContext {
            team_id: Some("t1".into()),
            agent_name: Some("lead".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_assign_progress_flow() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let tasks = TaskManager::new(store, Bus::new());
        let create = PeerCreateTaskTool::new(tasks.clone());
        let assign = TeamAssignTool::new(tasks.clone());
        let progress = TeamProgressTool::new(tasks);

        let out = create
            .execute(
                serde_json::json!({"title": "wire auth", "priority": 1}),
                &ctx(),
            )
            .await
            .unwrap();
        let ToolOutput::Text(text) = out else { panic!() };
        let task_id = text.split_whitespace().nth(2).unwrap();

        assign
            .execute(
                serde_json::json!({"task_id": task_id, "agent_name": "alice"}),
                &ctx(),
            )
            .await
            .unwrap();

        let out = progress.execute(Value::Null, &ctx()).await.unwrap();
        let ToolOutput::Text(text) = out else { panic!() };
        assert!(text.contains("1 assigned"));
        assert!(text.contains("alice"));
    }

    #[tokio::test]
    async fn spawn_tool_reports_manager_shutdown() {
        let tool = TeamSpawnTool::new(Weak::new());
        let err = tool
            .execute(serde_json::json!({"name": "n", "role": "coder"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shutting down"));
    }
}
