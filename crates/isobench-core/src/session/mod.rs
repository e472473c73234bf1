//! Session orchestration
//!
//! - [`context`]: counters shared across sessions
//! - [`state`]: roles and the per-role state machine
//! - [`orchestrator`]: one benchmark pass
//! - [`scheduler`]: periodic payload transmission while active
//! - [`role_loop`]: repeated passes driven by a role source

pub mod context;
pub mod orchestrator;
pub mod role_loop;
pub mod scheduler;
pub mod state;
