//! Per-team cumulative cost ceiling.
//!
//! `record_usage` feeds both the team accumulator and the CostTracker. Once a
//! team's total reaches the ceiling, `acquire_or_budget` stops the team's
//! loops with `BudgetExceeded`. A warning event fires once per team when usage
//! crosses 80% of the ceiling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::cost::CostTracker;
use super::rate::{Acquire, RateLimiter};
use crate::bus::Bus;
use crate::event::{topic, Event};
use crate::llm::Usage;

/// Combined rate/budget gate decision consumed by the agent loop.
#[derive(Clone, Debug, PartialEq)]
pub enum RateDecision {
    Ok,
    Wait { ms: u64 },
    BudgetExceeded { scope: String },
}

const WARNING_FRACTION: f64 = 0.8;

#[derive(Default)]
struct TeamSpend {
    spent: f64,
    warned: bool,
}

/// Per-team budget accumulator with a monetary ceiling.
#[derive(Clone)]
pub struct Budget {
    limit_usd: Option<f64>,
    teams: Arc<Mutex<HashMap<String, TeamSpend>>>,
    cost: CostTracker,
    bus: Bus,
}

impl Budget {
    pub fn new(limit_usd: Option<f64>, cost: CostTracker, bus: Bus) -> Self {
        Self {
            limit_usd,
            teams: Arc::new(Mutex::new(HashMap::new())),
            cost,
            bus,
        }
    }

    /// Increments the team total and per-agent tally, firing the 80% warning
    /// on the crossing.
    pub fn record_usage(
        &self,
        team_id: &str,
        agent: &str,
        model: &str,
        usage: &Usage,
        task_id: Option<&str>,
    ) {
        self.cost.record_call(team_id, agent, model, usage, task_id);

        let mut teams = self.teams.lock().unwrap();
        let spend = teams.entry(team_id.to_string()).or_default();
        spend.spent += usage.total_cost;

        if let Some(limit) = self.limit_usd {
            if !spend.warned && spend.spent >= limit * WARNING_FRACTION {
                spend.warned = true;
                warn!(team_id, spent = spend.spent, limit, "team budget at 80%");
                self.bus.publish(
                    &topic::telemetry_team(team_id),
                    Event::BudgetWarning {
                        team_id: team_id.to_string(),
                        spent: spend.spent,
                        limit,
                    },
                );
            }
        }
    }

    pub fn team_spent(&self, team_id: &str) -> f64 {
        self.teams
            .lock()
            .unwrap()
            .get(team_id)
            .map(|s| s.spent)
            .unwrap_or(0.0)
    }

    pub fn exceeded(&self, team_id: &str) -> bool {
        match self.limit_usd {
            Some(limit) => self.team_spent(team_id) >= limit,
            None => false,
        }
    }

    /// The loop's rate gate: budget first, then the provider bucket.
    pub fn acquire_or_budget(
        &self,
        team_id: &str,
        provider: &str,
        limiter: &RateLimiter,
        cost: f64,
    ) -> RateDecision {
        if self.exceeded(team_id) {
            return RateDecision::BudgetExceeded {
                scope: team_id.to_string(),
            };
        }
        match limiter.acquire(provider, cost) {
            Acquire::Ok => RateDecision::Ok,
            Acquire::Wait { ms } => RateDecision::Wait { ms },
        }
    }

    /// Clears the accumulator (and CostTracker state) for one team.
    pub fn reset_team(&self, team_id: &str) {
        self.teams.lock().unwrap().remove(team_id);
        self.cost.reset_team(team_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(cost: f64) -> Usage {
        Usage {
            input_tokens: 10,
            output_tokens: 10,
            total_cost: cost,
        }
    }

    #[tokio::test]
    async fn ceiling_blocks_further_acquisition() {
        let bus = Bus::new();
        let budget = Budget::new(Some(0.10), CostTracker::new(), bus);
        let limiter = RateLimiter::new();

        assert_eq!(
            budget.acquire_or_budget("t1", "anthropic", &limiter, 1.0),
            RateDecision::Ok
        );
        budget.record_usage("t1", "alice", "m", &usage(0.12), None);
        assert_eq!(
            budget.acquire_or_budget("t1", "anthropic", &limiter, 1.0),
            RateDecision::BudgetExceeded {
                scope: "t1".to_string()
            }
        );
        // Other teams unaffected.
        assert_eq!(
            budget.acquire_or_budget("t2", "anthropic", &limiter, 1.0),
            RateDecision::Ok
        );
    }

    #[tokio::test]
    async fn warning_fires_once_on_80_percent_crossing() {
        let bus = Bus::new();
        let mut sub = bus.subscribe(&topic::telemetry_team("t1"));
        let budget = Budget::new(Some(1.0), CostTracker::new(), bus);

        budget.record_usage("t1", "alice", "m", &usage(0.5), None);
        assert!(sub.try_recv().is_none());
        budget.record_usage("t1", "alice", "m", &usage(0.35), None);
        assert!(matches!(sub.try_recv(), Some(Event::BudgetWarning { .. })));
        budget.record_usage("t1", "alice", "m", &usage(0.05), None);
        assert!(sub.try_recv().is_none(), "warning must fire only once");
    }

    #[tokio::test]
    async fn no_limit_means_no_budget_errors() {
        let budget = Budget::new(None, CostTracker::new(), Bus::new());
        budget.record_usage("t1", "alice", "m", &usage(1e6), None);
        assert!(!budget.exceeded("t1"));
    }
}
