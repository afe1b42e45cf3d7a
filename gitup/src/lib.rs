//! Safe branch synchronization with supervised subprocess execution.
//!
//! This crate implements a commit-and-sync workflow that never leaves the
//! repository worse than it found it: a rollback point is captured and
//! validated before anything mutates, failures are classified and undone,
//! and final state is re-verified instead of trusting exit codes. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (output classification,
//!   outcome types, recovery commands). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process supervision, git
//!   subprocess calls, backup/rollback, configuration files).
//!
//! Orchestration modules ([`sync`], [`checks`], [`watchdog`]) coordinate
//! core logic with I/O; shared state ([`activity`], [`cancel`]) is passed
//! explicitly at construction, never held in globals.

pub mod activity;
pub mod cancel;
pub mod checks;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod prompt;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watchdog;
