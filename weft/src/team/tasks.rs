//! Team task management: CRUD, owner assignment, dependency graph, priority
//! ordering. Assignment publishes on the team's task topic so the owning agent
//! picks the work up.

use crate::bus::Bus;
use crate::event::{topic, Event};
use crate::store::tasks::{DepType, NewTask, TaskDep, TaskStatus, TeamTask};
use crate::store::{Store, StoreError};

/// Store-backed task service; cheap to clone.
#[derive(Clone)]
pub struct TaskManager {
    store: Store,
    bus: Bus,
}

impl TaskManager {
    pub fn new(store: Store, bus: Bus) -> Self {
        Self { store, bus }
    }

    pub async fn create_task(&self, team_id: &str, task: NewTask) -> Result<TeamTask, StoreError> {
        let task = self.store.insert_task(team_id, task).await?;
        self.bus.publish(
            &topic::tasks(team_id),
            Event::TaskUpdated {
                task_id: task.id.clone(),
                status: task.status.as_str().to_string(),
            },
        );
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TeamTask>, StoreError> {
        self.store.get_task(id).await
    }

    /// Tasks ordered by priority ascending (1 highest) then insertion order.
    pub async fn list_all(&self, team_id: &str) -> Result<Vec<TeamTask>, StoreError> {
        self.store.list_tasks(team_id).await
    }

    /// Sets owner + status=assigned, then publishes `TaskAssigned` on the
    /// team's task topic and the team broadcast topic.
    pub async fn assign_task(&self, id: &str, agent_name: &str) -> Result<TeamTask, StoreError> {
        let task = self
            .store
            .set_task_owner(id, agent_name, TaskStatus::Assigned)
            .await?;
        let event = Event::TaskAssigned {
            task_id: task.id.clone(),
            agent_name: agent_name.to_string(),
        };
        self.bus.publish(&topic::tasks(&task.team_id), event.clone());
        self.bus.publish(&topic::team(&task.team_id), event);
        Ok(task)
    }

    /// Moves status, recording result text and cost/token usage.
    pub async fn update_progress(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&str>,
        cost_usd: f64,
        tokens_used: u64,
    ) -> Result<TeamTask, StoreError> {
        let task = self
            .store
            .update_task_progress(id, status, result, cost_usd, tokens_used)
            .await?;
        self.bus.publish(
            &topic::tasks(&task.team_id),
            Event::TaskUpdated {
                task_id: task.id.clone(),
                status: status.as_str().to_string(),
            },
        );
        Ok(task)
    }

    pub async fn add_dependency(
        &self,
        task_id: &str,
        depends_on_id: &str,
        dep_type: DepType,
    ) -> Result<TaskDep, StoreError> {
        self.store
            .insert_task_dep(task_id, depends_on_id, dep_type)
            .await
    }

    pub async fn dependencies_of(&self, task_id: &str) -> Result<Vec<TaskDep>, StoreError> {
        self.store.list_task_deps(task_id).await
    }

    /// First pending task whose dependencies are all done, in priority order.
    pub async fn next_available(&self, team_id: &str) -> Result<Option<TeamTask>, StoreError> {
        let tasks = self.list_all(team_id).await?;
        for task in &tasks {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let deps = self.dependencies_of(&task.id).await?;
            let mut ready = true;
            for dep in deps {
                let done = tasks
                    .iter()
                    .find(|t| t.id == dep.depends_on_id)
                    .map(|t| t.status == TaskStatus::Done)
                    .unwrap_or(true);
                if !done {
                    ready = false;
                    break;
                }
            }
            if ready {
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    /// One-line progress summary for the team tools.
    pub async fn progress_summary(&self, team_id: &str) -> Result<String, StoreError> {
        let tasks = self.list_all(team_id).await?;
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let mut lines = vec![format!(
            "{} task(s): {} pending, {} assigned, {} in progress, {} done, {} failed",
            tasks.len(),
            count(TaskStatus::Pending),
            count(TaskStatus::Assigned),
            count(TaskStatus::InProgress),
            count(TaskStatus::Done),
            count(TaskStatus::Failed),
        )];
        for task in &tasks {
            lines.push(format!(
                "- [{}] {} (p{}, {}{})",
                task.status.as_str(),
                task.title,
                task.priority,
                task.owner.as_deref().unwrap_or("unassigned"),
                task.result
                    .as_deref()
                    .map(|r| format!(", result: {r}"))
                    .unwrap_or_default(),
            ));
        }
        Ok(lines.join("\n"))
    }
}
