//! Context management: token-budgeted windowing for LLM calls, and the
//! keepers that hold offloaded conversation chunks.

pub mod keeper;
pub mod retrieval;
pub mod window;

pub use keeper::{KeeperError, KeeperHandle, KeeperInfo, Keepers, PERSIST_DEBOUNCE};
pub use retrieval::{detect_mode, RetrieveMode};
pub use window::{build_messages, model_limit, WindowOptions};
