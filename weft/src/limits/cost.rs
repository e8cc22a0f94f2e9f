//! Per-agent cost accounting: token/cost tallies, capped call history, and the
//! escalation-event log. Process-wide singleton threaded through as a handle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::llm::Usage;

/// Capped length of the per-team call history.
pub const CALL_HISTORY_CAP: usize = 200;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AgentTally {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub requests: u64,
    pub last_model: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallRecord {
    pub timestamp: String,
    pub cost: f64,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub task_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EscalationEvent {
    pub agent: String,
    pub from_model: String,
    pub to_model: String,
    pub timestamp: String,
}

#[derive(Default)]
struct CostState {
    agents: HashMap<(String, String), AgentTally>,
    history: HashMap<String, VecDeque<CallRecord>>,
    escalations: HashMap<String, Vec<EscalationEvent>>,
}

#[derive(Clone, Default)]
pub struct CostTracker {
    state: Arc<Mutex<CostState>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(
        &self,
        team_id: &str,
        agent: &str,
        model: &str,
        usage: &Usage,
        task_id: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap();
        let tally = state
            .agents
            .entry((team_id.to_string(), agent.to_string()))
            .or_default();
        tally.input_tokens += usage.input_tokens;
        tally.output_tokens += usage.output_tokens;
        tally.cost += usage.total_cost;
        tally.requests += 1;
        tally.last_model = model.to_string();

        let history = state.history.entry(team_id.to_string()).or_default();
        history.push_back(CallRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            cost: usage.total_cost,
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            task_id: task_id.map(str::to_string),
        });
        while history.len() > CALL_HISTORY_CAP {
            history.pop_front();
        }
    }

    pub fn record_escalation(&self, team_id: &str, agent: &str, from_model: &str, to_model: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .escalations
            .entry(team_id.to_string())
            .or_default()
            .push(EscalationEvent {
                agent: agent.to_string(),
                from_model: from_model.to_string(),
                to_model: to_model.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            });
    }

    pub fn agent_tally(&self, team_id: &str, agent: &str) -> AgentTally {
        self.state
            .lock()
            .unwrap()
            .agents
            .get(&(team_id.to_string(), agent.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Total cost across all agents of a team.
    pub fn team_cost(&self, team_id: &str) -> f64 {
        self.state
            .lock()
            .unwrap()
            .agents
            .iter()
            .filter(|((team, _), _)| team == team_id)
            .map(|(_, tally)| tally.cost)
            .sum()
    }

    pub fn team_history(&self, team_id: &str) -> Vec<CallRecord> {
        self.state
            .lock()
            .unwrap()
            .history
            .get(team_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn team_escalations(&self, team_id: &str) -> Vec<EscalationEvent> {
        self.state
            .lock()
            .unwrap()
            .escalations
            .get(team_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Clears tallies, history, and escalation events for one team.
    pub fn reset_team(&self, team_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.agents.retain(|(team, _), _| team != team_id);
        state.history.remove(team_id);
        state.escalations.remove(team_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(cost: f64) -> Usage {
        Usage {
            input_tokens: 100,
            output_tokens: 50,
            total_cost: cost,
        }
    }

    #[test]
    fn tallies_accumulate_per_agent() {
        let tracker = CostTracker::new();
        tracker.record_call("t1", "alice", "zai:glm-5", &usage(0.01), None);
        tracker.record_call("t1", "alice", "zai:glm-5", &usage(0.02), Some("task-9"));
        tracker.record_call("t1", "bob", "zai:glm-5", &usage(0.10), None);

        let alice = tracker.agent_tally("t1", "alice");
        assert_eq!(alice.requests, 2);
        assert_eq!(alice.input_tokens, 200);
        assert!((tracker.team_cost("t1") - 0.13).abs() < 1e-9);

        let history = tracker.team_history("t1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].task_id.as_deref(), Some("task-9"));
    }

    #[test]
    fn history_is_capped() {
        let tracker = CostTracker::new();
        for _ in 0..(CALL_HISTORY_CAP + 10) {
            tracker.record_call("t1", "alice", "m", &usage(0.0), None);
        }
        assert_eq!(tracker.team_history("t1").len(), CALL_HISTORY_CAP);
    }

    #[test]
    fn reset_team_clears_all_three_maps() {
        let tracker = CostTracker::new();
        tracker.record_call("t1", "alice", "m", &usage(0.5), None);
        tracker.record_escalation("t1", "alice", "weak", "strong");
        tracker.record_call("t2", "zoe", "m", &usage(0.5), None);

        tracker.reset_team("t1");
        assert_eq!(tracker.agent_tally("t1", "alice"), AgentTally::default());
        assert!(tracker.team_history("t1").is_empty());
        assert!(tracker.team_escalations("t1").is_empty());
        // Other teams untouched.
        assert!((tracker.team_cost("t2") - 0.5).abs() < 1e-9);
    }
}
