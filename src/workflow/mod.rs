//! Finite state machine over a session's lifecycle.
//!
//! State/event enums and the transition table live in [`state`] rather than
//! in [`engine`], so the façade (`crate::orchestrator`) can depend on the
//! vocabulary without depending on the registry that drives it — the cyclic
//! import the source codebase had between its orchestrator and subsystem
//! packages is avoided by keeping the leaf types leaf.

pub mod engine;
pub mod state;

pub use engine::WorkflowEngine;
pub use state::{
    default_handlers, transition_table, NoopHandler, StateHandler, StateTransition, WorkflowEvent,
    WorkflowState,
};
