//! The safe synchronization state machine.
//!
//! One attempt walks: capture backup → verify clean tree → fetch → rebase →
//! classify the failure (conflict vs. other) → abort/rollback → verify.
//! Exit codes are never trusted on their own; every success path re-checks
//! the repository state. Push gets exactly one sync-and-retry cycle on a
//! non-fast-forward rejection.
//!
//! The engine runs sequentially, one git operation at a time. Cancellation
//! is checked at every phase boundary; past the capture phase it triggers a
//! best-effort rollback before propagating.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::cancel::{CancelToken, Cancelled};
use crate::core::classifier::{is_conflict, is_push_rejected};
use crate::core::outcome::{BackupRef, FailureKind, PushOutcome, SyncOutcome};
use crate::core::recovery::{
    dirty_tree_recovery, emergency_recovery, fetch_recovery, generic_recovery, push_recovery,
    rebase_recovery,
};
use crate::io::backup::{BackupManager, RestoreOutcome};
use crate::io::git::Git;

/// Sequences one synchronization attempt and the bounded push retry.
pub struct SyncEngine {
    git: Git,
    cancel: CancelToken,
    /// Caller-supplied rebase target (branch name or full upstream ref).
    target_hint: Option<String>,
}

impl SyncEngine {
    pub fn new(git: Git, cancel: CancelToken, target_hint: Option<String>) -> Self {
        Self {
            git,
            cancel,
            target_hint,
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Resolve the rebase target.
    ///
    /// An explicit hint is used as-is when it already carries an `origin/`
    /// prefix (never doubled), otherwise prefixed once. Without a hint the
    /// branch's configured upstream wins, falling back to the detected
    /// primary branch.
    pub fn remote_ref(&self) -> Result<String> {
        if let Some(hint) = &self.target_hint {
            let hint = hint.trim();
            if hint.starts_with("origin/") {
                return Ok(hint.to_string());
            }
            return Ok(format!("origin/{hint}"));
        }
        if let Some(upstream) = self.git.upstream_branch()? {
            debug!(upstream = %upstream, "rebase target from tracking branch");
            return Ok(upstream);
        }
        let primary = self.git.primary_branch()?;
        debug!(primary = %primary, "rebase target from primary branch");
        Ok(format!("origin/{primary}"))
    }

    /// Whether HEAD is behind `remote_ref`. Unknown refs count as "no".
    pub fn rebase_needed(&self, remote_ref: &str) -> Result<bool> {
        let Some(remote) = self.git.rev_parse(remote_ref)? else {
            return Ok(false);
        };
        let Some(base) = self.git.merge_base(remote_ref)? else {
            return Ok(false);
        };
        Ok(base != remote)
    }

    /// Run one synchronization attempt.
    ///
    /// Returns `Err(Cancelled)` on user interruption (after a best-effort
    /// rollback); any other result is a [`SyncOutcome`].
    #[instrument(skip_all)]
    pub fn sync(&self) -> Result<SyncOutcome> {
        self.cancel.check()?;
        let manager = BackupManager::new(&self.git);

        println!("Capturing pre-rebase state for safety...");
        let backup = match manager.capture() {
            Ok(backup) => backup,
            Err(err) if err.is::<Cancelled>() => return Err(err),
            Err(err) => {
                warn!(err = %err, "backup capture failed, nothing was mutated");
                return Ok(SyncOutcome::failed(
                    FailureKind::CaptureFailed,
                    None,
                    "Failed to capture pre-rebase state",
                    generic_recovery(),
                ));
            }
        };
        let remote_ref = self.remote_ref()?;

        let result = self.sync_from(&manager, &backup, &remote_ref);
        match result {
            Err(err) if err.is::<Cancelled>() => {
                warn!("sync interrupted, attempting best-effort rollback");
                let recovery_git = self.git.detached();
                let recovery = BackupManager::new(&recovery_git);
                match recovery.rollback(&backup) {
                    Ok(true) => info!("rollback after interruption succeeded"),
                    Ok(false) => warn!("rollback after interruption failed"),
                    Err(rollback_err) => {
                        warn!(err = %rollback_err, "rollback after interruption errored");
                    }
                }
                Err(err)
            }
            other => other,
        }
    }

    /// The mutating phases, with a validated backup in hand.
    fn sync_from(
        &self,
        manager: &BackupManager<'_>,
        backup: &BackupRef,
        remote_ref: &str,
    ) -> Result<SyncOutcome> {
        self.cancel.check()?;
        if !manager.verify_clean_working_tree()? {
            return Ok(SyncOutcome::failed(
                FailureKind::DirtyWorkingTree,
                Some(backup.clone()),
                "Working directory not clean",
                dirty_tree_recovery(),
            ));
        }

        self.cancel.check()?;
        println!("Fetching latest changes from remote...");
        let fetch = self.git.fetch()?;
        if !fetch.success() {
            // Never rebase against stale remote refs.
            return Ok(SyncOutcome::failed(
                FailureKind::FetchFailed,
                Some(backup.clone()),
                "Failed to fetch from remote",
                fetch_recovery(),
            ));
        }

        self.cancel.check()?;
        println!("Attempting rebase onto {remote_ref}...");
        let rebase = self.git.rebase(remote_ref)?;

        if rebase.success() {
            return self.verify_rebase(manager, backup, remote_ref);
        }

        let conflict = is_conflict(&rebase.stdout, &rebase.stderr);
        let restored = manager.abort_and_restore(backup)?;

        if conflict {
            info!("rebase conflicts detected");
            if restored.restored() {
                println!("Conflicts detected and clean state restored");
            } else {
                println!("Conflicts detected but recovery failed - manual intervention required");
            }
            let kind = match restored {
                RestoreOutcome::Failed => FailureKind::RollbackFailed,
                RestoreOutcome::AbortFailed => FailureKind::AbortFailed,
                RestoreOutcome::CleanAbort | RestoreOutcome::RolledBack => {
                    FailureKind::ConflictDetected
                }
            };
            let (message, recovery) = if restored.restored() {
                (
                    "Rebase conflicts detected".to_string(),
                    rebase_recovery(Some(backup), remote_ref),
                )
            } else {
                (
                    "Rebase conflicts detected and rollback failed".to_string(),
                    emergency_recovery(Some(backup)),
                )
            };
            return Ok(SyncOutcome::conflict(kind, backup.clone(), message, recovery));
        }

        warn!(exit_code = rebase.exit_code, "rebase failed without conflict markers");
        let summary = failure_summary(&rebase.stdout);
        if restored.restored() {
            Ok(SyncOutcome::failed(
                FailureKind::OtherRebaseFailure,
                Some(backup.clone()),
                format!("Rebase failed: {summary}"),
                rebase_recovery(Some(backup), remote_ref),
            ))
        } else {
            Ok(SyncOutcome::failed(
                FailureKind::RollbackFailed,
                Some(backup.clone()),
                format!("Rebase failed and rollback failed: {summary}"),
                emergency_recovery(Some(backup)),
            ))
        }
    }

    /// A rebase exit code of 0 is not trusted on its own.
    fn verify_rebase(
        &self,
        manager: &BackupManager<'_>,
        backup: &BackupRef,
        remote_ref: &str,
    ) -> Result<SyncOutcome> {
        self.cancel.check()?;
        if manager.verify_clean_working_tree()? && self.git.object_exists("HEAD")? {
            println!("Successfully rebased onto {remote_ref}");
            return Ok(SyncOutcome::succeeded(backup.clone()));
        }

        warn!("rebase exited 0 but final state verification failed");
        if manager.rollback(backup)? {
            Ok(SyncOutcome::failed(
                FailureKind::VerificationFailed,
                Some(backup.clone()),
                "Rebase completed but final state verification failed",
                rebase_recovery(Some(backup), remote_ref),
            ))
        } else {
            Ok(SyncOutcome::failed(
                FailureKind::RollbackFailed,
                Some(backup.clone()),
                "Rebase verification and rollback both failed",
                emergency_recovery(Some(backup)),
            ))
        }
    }

    /// Push, with at most one sync-and-retry cycle on rejection.
    ///
    /// `allow_sync` is false under `--no-rebase`: a rejection is then
    /// terminal instead of triggering the rebase flow.
    #[instrument(skip_all)]
    pub fn push_with_retry(&self, allow_sync: bool) -> Result<PushOutcome> {
        self.cancel.check()?;
        println!("Attempting to push to remote...");
        let first = self.git.push()?;
        if first.success() {
            println!("Successfully pushed to remote");
            return Ok(PushOutcome::succeeded(false, None));
        }

        let remote_ref = self.remote_ref()?;
        if !is_push_rejected(&first.stdout) {
            let summary = failure_summary(&first.stdout);
            return Ok(PushOutcome::failed(
                FailureKind::PushFailedOther,
                format!("Push failed: {summary}"),
                push_recovery(&remote_ref),
                false,
                None,
            ));
        }

        if !allow_sync {
            return Ok(PushOutcome::failed(
                FailureKind::PushRejected,
                "Push rejected (non-fast-forward) and rebase is disabled",
                push_recovery(&remote_ref),
                false,
                None,
            ));
        }

        println!("Push rejected (non-fast-forward). Rebasing and retrying once...");
        let sync = self.sync()?;
        if !sync.success {
            let message = format!("Push rejected and rebase failed: {}", sync.error_message);
            let recovery = sync.recovery_commands.clone();
            let kind = sync.kind.unwrap_or(FailureKind::PushRejected);
            return Ok(PushOutcome::failed(kind, message, recovery, true, Some(sync)));
        }

        self.cancel.check()?;
        let second = self.git.push()?;
        if second.success() {
            println!("Successfully pushed to remote after rebase");
            return Ok(PushOutcome::succeeded(true, Some(sync)));
        }

        // Bounded retry: a second rejection is terminal, no loop.
        let summary = failure_summary(&second.stdout);
        if is_push_rejected(&second.stdout) {
            Ok(PushOutcome::failed(
                FailureKind::PushRejected,
                format!("Push rejected again after rebase: {summary}"),
                push_recovery(&remote_ref),
                true,
                Some(sync),
            ))
        } else {
            Ok(PushOutcome::failed(
                FailureKind::PushFailedOther,
                format!("Push failed after rebase: {summary}"),
                push_recovery(&remote_ref),
                true,
                Some(sync),
            ))
        }
    }
}

/// One-line summary of captured command output for error messages; the
/// full stream was already mirrored to the console.
fn failure_summary(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map_or_else(|| "no output captured".to_string(), |line| line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    fn engine(repo: &TestRepo) -> SyncEngine {
        SyncEngine::new(repo.git(), CancelToken::new(), None)
    }

    fn engine_with_hint(repo: &TestRepo, hint: &str) -> SyncEngine {
        SyncEngine::new(repo.git(), CancelToken::new(), Some(hint.to_string()))
    }

    #[test]
    fn bare_branch_hint_gains_the_origin_prefix() {
        let repo = TestRepo::new().expect("repo");
        let engine = engine_with_hint(&repo, "feature-x");
        assert_eq!(engine.remote_ref().expect("resolve"), "origin/feature-x");
    }

    /// A hint that already carries `origin/` is used as-is, never doubled.
    #[test]
    fn prefixed_hint_is_never_doubled() {
        let repo = TestRepo::new().expect("repo");
        let engine = engine_with_hint(&repo, "origin/feature-x");
        assert_eq!(engine.remote_ref().expect("resolve"), "origin/feature-x");
    }

    #[test]
    fn upstream_tracking_branch_wins_without_a_hint() {
        let repo = TestRepo::new().expect("repo");
        let engine = engine(&repo);
        assert_eq!(engine.remote_ref().expect("resolve"), "origin/main");
    }

    #[test]
    fn rebase_needed_tracks_remote_advance() {
        let repo = TestRepo::new().expect("repo");
        let engine = engine(&repo);
        assert!(!engine.rebase_needed("origin/main").expect("up to date"));

        repo.remote_commit("upstream.txt", "upstream\n", "remote work");
        repo.run_git(&["fetch"]).expect("fetch");
        assert!(engine.rebase_needed("origin/main").expect("behind"));
    }

    #[test]
    fn pre_cancelled_sync_propagates_cancellation() {
        let repo = TestRepo::new().expect("repo");
        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = SyncEngine::new(repo.git(), cancel, None);
        let err = engine.sync().expect_err("cancelled");
        assert!(err.is::<Cancelled>());
    }

    #[test]
    fn failure_summary_takes_the_last_line() {
        assert_eq!(failure_summary("a\nb\n\n"), "b");
        assert_eq!(failure_summary(""), "no output captured");
    }
}
