//! Backup capture and forced rollback around mutating git operations.
//!
//! A rebase is only attempted once a validated rollback point exists.
//! Rollback never trusts exit codes alone: it re-verifies that HEAD equals
//! the backup and that the working tree is clean before reporting success.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::outcome::BackupRef;
use crate::io::git::Git;

/// How an abort-and-restore attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// `git rebase --abort` restored the captured state.
    CleanAbort,
    /// The abort left the wrong state behind; the forced rollback restored it.
    RolledBack,
    /// The abort command itself failed; the forced rollback restored state.
    AbortFailed,
    /// Neither abort nor forced rollback restored the state.
    Failed,
}

impl RestoreOutcome {
    pub fn restored(self) -> bool {
        !matches!(self, RestoreOutcome::Failed)
    }
}

/// Captures a rollback point and can force the repository back to it.
#[derive(Debug)]
pub struct BackupManager<'a> {
    git: &'a Git,
}

impl<'a> BackupManager<'a> {
    pub fn new(git: &'a Git) -> Self {
        Self { git }
    }

    /// Capture the current HEAD as a rollback point.
    ///
    /// Two round-trips on purpose: resolve HEAD, then independently verify
    /// the object exists. Guards against reading HEAD while the object
    /// database is inconsistent. Never returns a silently-empty ref.
    #[instrument(skip_all)]
    pub fn capture(&self) -> Result<BackupRef> {
        let sha = self.git.head_sha()?;
        if !self.git.object_exists(&sha)? {
            return Err(anyhow!("backup reference {sha} is not resolvable"));
        }
        debug!(backup = %sha, "captured pre-rebase state");
        Ok(BackupRef::new(sha))
    }

    /// True only if porcelain status output is empty.
    pub fn verify_clean_working_tree(&self) -> Result<bool> {
        self.git.is_clean()
    }

    /// Whether HEAD equals the backup AND the working tree is clean.
    pub fn verify_matches(&self, backup: &BackupRef) -> Result<bool> {
        let head = self.git.head_sha()?;
        if head != backup.as_str() {
            return Ok(false);
        }
        self.verify_clean_working_tree()
    }

    /// Force the repository back to the captured state.
    ///
    /// Aborts a mid-flight rebase first, then hard-resets, then re-verifies
    /// both post-conditions. A reset that "succeeds" by exit code but
    /// leaves a dirty tree counts as a rollback failure.
    #[instrument(skip_all, fields(backup = %backup.short()))]
    pub fn rollback(&self, backup: &BackupRef) -> Result<bool> {
        if self.git.rebase_in_progress()? {
            info!("aborting in-flight rebase before rollback");
            let abort = self.git.rebase_abort()?;
            if !abort.success() {
                warn!("rebase abort failed, continuing with hard reset");
            }
        }

        println!("Rolling back to {}...", backup.short());
        let reset = self.git.reset_hard(backup.as_str())?;
        if !reset.success() {
            warn!(exit_code = reset.exit_code, "hard reset failed");
            return Ok(false);
        }

        let restored = self.verify_matches(backup)?;
        if restored {
            info!("rollback verified");
        } else {
            warn!("reset exited 0 but post-conditions do not hold");
        }
        Ok(restored)
    }

    /// Abort a failed rebase and make sure the captured state is back.
    ///
    /// Escalates to [`Self::rollback`] when the abort itself fails or when
    /// the post-abort state does not match the backup.
    #[instrument(skip_all)]
    pub fn abort_and_restore(&self, backup: &BackupRef) -> Result<RestoreOutcome> {
        println!("Aborting rebase and restoring clean state...");
        let abort = self.git.rebase_abort()?;

        let abort_failed = !abort.success();
        if !abort_failed {
            if self.verify_matches(backup)? {
                return Ok(RestoreOutcome::CleanAbort);
            }
            warn!("rebase aborted but state verification failed, forcing rollback");
        } else {
            warn!(exit_code = abort.exit_code, "rebase abort failed, forcing rollback");
        }

        if self.rollback(backup)? {
            if abort_failed {
                Ok(RestoreOutcome::AbortFailed)
            } else {
                Ok(RestoreOutcome::RolledBack)
            }
        } else {
            Ok(RestoreOutcome::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn capture_returns_resolvable_head() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let backup = BackupManager::new(&git).capture().expect("capture");
        assert_eq!(backup.as_str(), git.head_sha().expect("head"));
        assert!(git.object_exists(backup.as_str()).expect("resolvable"));
    }

    #[test]
    fn capture_fails_without_commits() {
        let repo = TestRepo::empty().expect("repo");
        let git = repo.git();
        let err = BackupManager::new(&git).capture().expect_err("no HEAD yet");
        assert!(err.to_string().contains("failed"));
    }

    #[test]
    fn clean_tree_check_sees_any_pending_change() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let manager = BackupManager::new(&git);
        assert!(manager.verify_clean_working_tree().expect("clean"));

        repo.write_file("pending.txt", "edit\n");
        assert!(!manager.verify_clean_working_tree().expect("dirty"));
    }

    #[test]
    fn rollback_restores_head_and_discards_changes() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let manager = BackupManager::new(&git);
        let backup = manager.capture().expect("capture");

        repo.commit_file("later.txt", "later\n", "later commit");
        repo.write_file("dirty.txt", "dirty\n");
        assert_ne!(git.head_sha().expect("head"), backup.as_str());

        assert!(manager.rollback(&backup).expect("rollback"));
        assert_eq!(git.head_sha().expect("head"), backup.as_str());
        assert!(git.is_clean().expect("clean"));
    }

    /// Rolling back twice in a row yields the same HEAD and clean tree
    /// both times.
    #[test]
    fn rollback_is_idempotent() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let manager = BackupManager::new(&git);
        let backup = manager.capture().expect("capture");

        repo.commit_file("later.txt", "later\n", "later commit");

        assert!(manager.rollback(&backup).expect("first rollback"));
        let head_after_first = git.head_sha().expect("head");

        assert!(manager.rollback(&backup).expect("second rollback"));
        assert_eq!(git.head_sha().expect("head"), head_after_first);
        assert!(git.is_clean().expect("clean"));
    }

    #[test]
    fn verify_matches_requires_both_conditions() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let manager = BackupManager::new(&git);
        let backup = manager.capture().expect("capture");

        assert!(manager.verify_matches(&backup).expect("matches"));

        repo.write_file("drift.txt", "drift\n");
        assert!(!manager.verify_matches(&backup).expect("dirty tree fails"));
    }
}
