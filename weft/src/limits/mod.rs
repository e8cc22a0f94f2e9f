//! Shared-resource guards: per-provider rate limiting, per-team budget, and
//! cost accounting.

pub mod budget;
pub mod cost;
pub mod rate;

pub use budget::{Budget, RateDecision};
pub use cost::{AgentTally, CallRecord, CostTracker, EscalationEvent};
pub use rate::{Acquire, RateLimiter};
