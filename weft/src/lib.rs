//! # Weft
//!
//! A multi-agent coordination runtime for AI coding assistants. A *team* is a
//! supervised group of long-lived *agents*; each agent drives a ReAct loop
//! against an external LLM provider, executes tools, and collaborates with
//! its peers through three substrates:
//!
//! - a topic-based [`Bus`](bus::Bus) (best-effort, at-most-once pub/sub);
//! - a shared, persistent [`DecisionGraph`](decision::DecisionGraph) of goals,
//!   decisions, options, actions, and outcomes with supersede semantics and
//!   pulse analytics;
//! - [`Keepers`](context::Keepers) holding offloaded conversation chunks with
//!   keyword and LLM-backed retrieval.
//!
//! ## Main modules
//!
//! - [`agent_loop`]: the ReAct iterator, an explicit [`run`](agent_loop::run) /
//!   [`resume`](agent_loop::resume) pair with a serializable pending handle for
//!   interactive permission approval.
//! - [`team`]: the fabric: [`TeamManager`](team::TeamManager) (supervised
//!   spawning, templates, sub-teams), [`AgentHandle`](team::AgentHandle)
//!   workers, [`TaskManager`](team::TaskManager).
//! - [`session`]: solo mode with interactive permission gating and architect
//!   mode (plan with a strong model, execute with a fast one).
//! - [`decision`]: the shared decision graph over the store.
//! - [`context`]: token-budgeted windowing and context keepers.
//! - [`route`]: [`ModelRouter`](route::ModelRouter) (role → model, failure
//!   counting, escalation chain) and [`QueryRouter`](route::QueryRouter)
//!   (peer questions with bounded forwarding and enrichments).
//! - [`limits`]: per-provider token buckets, per-team budget ceiling, cost
//!   accounting.
//! - [`tools`]: the tool contract and the built-in coordination tools; file,
//!   shell, git, and LSP tools are host-provided implementations of the same
//!   trait.
//! - [`store`]: the embedded SQLite store (sessions, messages, graph, tasks,
//!   grants, keeper snapshots, metrics).
//! - [`llm`]: the external client contract plus a scripted mock.
//!
//! The LLM HTTP transport, tool implementations, and every presentation
//! surface are external collaborators; this crate is the orchestration core.

pub mod agent_loop;
pub mod bus;
pub mod context;
pub mod decision;
pub mod event;
pub mod limits;
pub mod llm;
pub mod message;
pub mod permissions;
pub mod registry;
pub mod route;
pub mod runtime;
pub mod session;
pub mod store;
pub mod team;
pub mod tools;

pub use agent_loop::{LoopError, LoopOptions, LoopOutcome, PendingHandle};
pub use bus::{Bus, BusSubscription};
pub use event::{topic, Event};
pub use llm::{LlmClient, LlmResponse, MockLlm, ModelRef, Usage};
pub use message::{Message, Role, ToolCallRequest};
pub use runtime::Runtime;
pub use session::{PermissionAction, Session, SessionReply};
pub use store::Store;
pub use team::{AgentHandle, TeamManager};
