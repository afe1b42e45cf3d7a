//! Pure, deterministic logic: output classification, outcome types,
//! recovery-command generation. No I/O, fully testable in isolation.

pub mod classifier;
pub mod outcome;
pub mod recovery;
