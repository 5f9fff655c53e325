//! # docwork-orchestrator
//!
//! The orchestration kernel behind an AI-driven documentation-workflow
//! server: a session manager, a workflow finite-state-machine, and a
//! per-session priority work queue, wired together behind a small façade.
//!
//! Agents on the other side of the transport layer cannot receive file
//! contents over the control channel (a strict 25,000-token budget per
//! exchange) — this crate coordinates work *by reference*. It assigns file
//! paths, tracks completion, and aggregates progress; it never reads,
//! parses, or stores the documentation text itself.
//!
//! ## Modules
//!
//! - `error` — the unified error taxonomy and exponential-backoff recovery
//!   manager; a leaf module every other component depends on.
//! - `queue` — the per-session priority work queue: dispensation, per-item
//!   status, and aggregate progress counters.
//! - `session` — durable session records: cache, optimistic-concurrency
//!   updates, background expiry.
//! - `workflow` — the lifecycle finite state machine and its per-state
//!   handlers.
//! - `container` — the name-keyed service container the façade uses to wire
//!   the above together.
//! - `orchestrator` — the public façade: `StartDocumentation`, `GetSession`,
//!   `ProcessNextFile`, `CompleteSession`.
//! - `config` — the knob groups (database, session, workflow, logging) an
//!   external loader populates from TOML.

pub mod config;
pub mod container;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod session;
pub mod workflow;
