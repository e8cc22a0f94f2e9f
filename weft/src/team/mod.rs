//! The team fabric: agents, their manager, tasks, and role configuration.

pub mod agent;
pub mod manager;
pub mod roles;
pub mod tasks;

pub use agent::{AgentDeps, AgentError, AgentHandle, AgentSnapshot, AgentStatus};
pub use manager::{TeamError, TeamManager};
pub use roles::{builtin_role, resolve_role, RoleConfig};
pub use tasks::TaskManager;
