//! Runtime wiring: the one place the process-wide singletons (store, bus,
//! registry, limiter, cost tracker, router) are created and threaded into the
//! workers as handles. Nothing here is a true global; tests build as many
//! runtimes as they like.

use std::path::Path;
use std::sync::Arc;

use crate::bus::Bus;
use crate::context::Keepers;
use crate::decision::DecisionGraph;
use crate::limits::{Budget, CostTracker, RateLimiter};
use crate::llm::LlmClient;
use crate::permissions::Permissions;
use crate::registry::Registry;
use crate::route::{ModelRouter, QueryRouter};
use crate::store::{default_db_path, Store, StoreError};
use crate::team::{AgentDeps, TaskManager, TeamManager};

/// A fully wired runtime for one project.
pub struct Runtime {
    pub config: Arc<project_config::ProjectConfig>,
    pub store: Store,
    pub bus: Bus,
    pub registry: Registry,
    pub graph: DecisionGraph,
    pub keepers: Keepers,
    pub queries: QueryRouter,
    pub tasks: TaskManager,
    pub router: ModelRouter,
    pub limiter: RateLimiter,
    pub cost: CostTracker,
    pub budget: Budget,
    pub permissions: Permissions,
    pub llm: Arc<dyn LlmClient>,
    pub manager: Arc<TeamManager>,
    pub project_path: String,
}

impl Runtime {
    /// Builds everything over the project's database. `llm` is the external
    /// client collaborator.
    pub fn new(
        project_path: &Path,
        config: project_config::ProjectConfig,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self, StoreError> {
        let store = Store::open(default_db_path(project_path))?;
        Self::with_store(project_path, config, llm, store)
    }

    /// Same wiring over an explicit store (tests use a tempdir database).
    pub fn with_store(
        project_path: &Path,
        config: project_config::ProjectConfig,
        llm: Arc<dyn LlmClient>,
        store: Store,
    ) -> Result<Self, StoreError> {
        let config = Arc::new(config);
        let bus = Bus::new();
        let registry = Registry::new();
        let graph = DecisionGraph::with_bus(store.clone(), bus.clone());
        let cost = CostTracker::new();
        let keepers = Keepers::new(
            store.clone(),
            registry.clone(),
            bus.clone(),
            llm.clone(),
            cost.clone(),
            config.model.weak.clone(),
        );
        let queries = QueryRouter::new(bus.clone());
        let tasks = TaskManager::new(store.clone(), bus.clone());
        let router = ModelRouter::from_config(&config);
        let limiter = RateLimiter::from_config(&config.rate_limits);
        let budget = Budget::new(config.budget.limit_usd, cost.clone(), bus.clone());
        let permissions = Permissions::new(store.clone(), config.permissions.auto_approve.clone());
        let project_path_str = project_path.display().to_string();

        let deps = AgentDeps {
            store: store.clone(),
            bus: bus.clone(),
            registry: registry.clone(),
            graph: graph.clone(),
            keepers: keepers.clone(),
            queries: queries.clone(),
            tasks: tasks.clone(),
            router: router.clone(),
            budget: budget.clone(),
            limiter: limiter.clone(),
            cost: cost.clone(),
            llm: llm.clone(),
            config: config.clone(),
            project_path: project_path_str.clone(),
        };
        let manager = TeamManager::new(deps);

        Ok(Self {
            config,
            store,
            bus,
            registry,
            graph,
            keepers,
            queries,
            tasks,
            router,
            limiter,
            cost,
            budget,
            permissions,
            llm,
            manager,
            project_path: project_path_str,
        })
    }
}
