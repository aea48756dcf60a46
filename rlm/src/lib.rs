//! Bounded agentic reasoning loop.
//!
//! One step turns a query plus accumulated context into a schema-validated
//! decision, executes at most one action, and reports whether reasoning has
//! converged. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (types, schema enforcement, routing,
//!   summary synthesis). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (configuration, generator, orchestrator
//!   client, skills, child processes, action log). Behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`step`], [`looping`], [`dispatch`], [`self_heal`],
//! [`vertical`]) compose core logic with I/O.

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod self_heal;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vertical;
