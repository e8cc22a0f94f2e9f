//! Routing: role → model selection with escalation, and peer query delivery.

pub mod model;
pub mod query;

pub use model::{Escalation, ModelRouter, ESCALATION_THRESHOLD};
pub use query::{AskOptions, QueryRouter, QueryState, RouteError, DEFAULT_MAX_HOPS, QUERY_TTL};
