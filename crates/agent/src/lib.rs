//! The agentic loop for codeloop.
//!
//! One goal runs as a task through a **request → act → observe** cycle:
//!
//! 1. **Assemble** the request: layered system message (rules, project,
//!    recalled tasks, reference hint, tool warnings, todos) plus the
//!    bounded conversation window
//! 2. **Send** it to the provider and read exactly one action back
//! 3. **If tool calls**: prepare each through the dispatcher, schedule
//!    them into waves, run each wave with bounded fan-out, append results
//!    in request order, loop back to step 1
//! 4. **If completion**: archive the task into Task Memory and return
//!
//! The loop ends as Failed on the first fatal error and as Aborted once
//! the iteration budget is spent.

pub mod confirm;
pub mod context;
pub mod dispatcher;
pub mod loop_runner;
pub mod scheduler;
pub mod tracker;

pub use confirm::{ApproveAll, Confirmer, DenyAll};
pub use context::{ConversationState, ConversationWindow, RequestAssembler};
pub use dispatcher::{Dispatcher, Prepared, PreparedCall};
pub use loop_runner::AgentLoop;
pub use scheduler::{Footprint, plan_waves};
pub use tracker::{ToolRecord, ToolUsageTracker, UsageOutcome};
