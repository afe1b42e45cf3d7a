//! Result types for a synchronization attempt.

use std::fmt;

/// A resolved commit hash captured before any mutating operation.
///
/// Only [`crate::io::backup::BackupManager::capture`] constructs these, and
/// only after independently verifying the object exists, so holding a
/// `BackupRef` means it was resolvable at capture time. Never persisted
/// across process restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRef(String);

impl BackupRef {
    pub(crate) fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display, like git's short hashes.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for BackupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a sync or push attempt failed.
///
/// Kinds before the mutation point (`CaptureFailed`, `DirtyWorkingTree`,
/// `FetchFailed`) mean nothing was changed and no rollback was attempted.
/// Kinds at or after it mean automatic recovery (abort, then forced
/// rollback) ran before the failure was surfaced. `RollbackFailed` is the
/// one state that needs immediate human attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The pre-rebase backup ref could not be captured or validated.
    CaptureFailed,
    /// The working tree had pending changes before the rebase.
    DirtyWorkingTree,
    /// `git fetch` failed; rebase was never attempted against stale refs.
    FetchFailed,
    /// The rebase hit merge conflicts; the repository was restored.
    ConflictDetected,
    /// The rebase failed for a non-conflict reason; the repository was restored.
    OtherRebaseFailure,
    /// The rebase exited 0 but post-conditions did not hold.
    VerificationFailed,
    /// `git rebase --abort` failed; the forced rollback restored state.
    AbortFailed,
    /// Neither abort nor forced rollback restored the repository.
    RollbackFailed,
    /// The push was rejected again after the one bounded sync-and-retry.
    PushRejected,
    /// The push failed for a reason other than rejection.
    PushFailedOther,
}

/// Result of one synchronization attempt.
///
/// Exactly one of three shapes holds: success, conflict (`had_conflicts`
/// with a non-empty error message), or plain failure (non-empty error
/// message). Terminal failures always carry recovery commands.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub had_conflicts: bool,
    pub backup_ref: Option<BackupRef>,
    pub error_message: String,
    pub recovery_commands: Vec<String>,
    pub kind: Option<FailureKind>,
}

impl SyncOutcome {
    pub fn succeeded(backup: BackupRef) -> Self {
        Self {
            success: true,
            had_conflicts: false,
            backup_ref: Some(backup),
            error_message: String::new(),
            recovery_commands: Vec::new(),
            kind: None,
        }
    }

    pub fn conflict(
        kind: FailureKind,
        backup: BackupRef,
        message: impl Into<String>,
        recovery: Vec<String>,
    ) -> Self {
        let message = message.into();
        debug_assert!(!message.is_empty() && !recovery.is_empty());
        Self {
            success: false,
            had_conflicts: true,
            backup_ref: Some(backup),
            error_message: message,
            recovery_commands: recovery,
            kind: Some(kind),
        }
    }

    pub fn failed(
        kind: FailureKind,
        backup: Option<BackupRef>,
        message: impl Into<String>,
        recovery: Vec<String>,
    ) -> Self {
        let message = message.into();
        debug_assert!(!message.is_empty() && !recovery.is_empty());
        Self {
            success: false,
            had_conflicts: false,
            backup_ref: backup,
            error_message: message,
            recovery_commands: recovery,
            kind: Some(kind),
        }
    }
}

/// Result of the push phase, including the one bounded sync-and-retry.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub success: bool,
    /// Whether a rejection triggered the sync-and-retry cycle.
    pub retried: bool,
    pub error_message: String,
    pub recovery_commands: Vec<String>,
    pub kind: Option<FailureKind>,
    /// Outcome of the rejection-triggered sync, when one ran.
    pub sync_outcome: Option<SyncOutcome>,
}

impl PushOutcome {
    pub fn succeeded(retried: bool, sync_outcome: Option<SyncOutcome>) -> Self {
        Self {
            success: true,
            retried,
            error_message: String::new(),
            recovery_commands: Vec::new(),
            kind: None,
            sync_outcome,
        }
    }

    pub fn failed(
        kind: FailureKind,
        message: impl Into<String>,
        recovery: Vec<String>,
        retried: bool,
        sync_outcome: Option<SyncOutcome>,
    ) -> Self {
        let message = message.into();
        debug_assert!(!message.is_empty() && !recovery.is_empty());
        Self {
            success: false,
            retried,
            error_message: message,
            recovery_commands: recovery,
            kind: Some(kind),
            sync_outcome,
        }
    }
}
