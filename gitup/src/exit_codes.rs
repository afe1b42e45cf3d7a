//! Stable exit codes for the gitup CLI.

/// Workflow completed: committed, synced, and pushed as requested.
pub const OK: i32 = 0;
/// Workflow failed or was refused (dirty tree, conflicts, rejected push, ...).
pub const FAILURE: i32 = 1;
/// The watchdog killed the process after the hard idle threshold.
pub const WATCHDOG: i32 = 124;
/// User interrupt (Ctrl-C), the conventional 128 + SIGINT.
pub const INTERRUPTED: i32 = 130;
