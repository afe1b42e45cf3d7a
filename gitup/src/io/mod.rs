//! Side-effecting operations: process supervision, git subprocess calls,
//! backup/rollback, configuration files.

pub mod backup;
pub mod config;
pub mod git;
pub mod process;
