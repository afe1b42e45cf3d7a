//! Manual-recovery command lists shown with every terminal failure.
//!
//! Every failure the workflow surfaces carries a non-empty list of
//! copy-pasteable commands, so the user is never left without a next step.

use crate::core::outcome::BackupRef;

/// Standard block for failures at or after the rebase attempt.
pub fn rebase_recovery(backup: Option<&BackupRef>, remote_ref: &str) -> Vec<String> {
    let mut commands = vec!["# Manual recovery options:".to_string()];
    if let Some(backup) = backup {
        commands.push(format!("# Backup reference: {}...", backup.short()));
        commands.push(format!("git reset --hard {backup}"));
    }
    commands.push(format!("git rebase {remote_ref}"));
    commands.push("git reflog".to_string());
    commands.push("git status".to_string());
    commands
}

/// Generic block for failures before anything was mutated.
pub fn generic_recovery() -> Vec<String> {
    vec!["git status".to_string(), "git reflog".to_string()]
}

/// Block for the dirty-working-tree precondition failure.
pub fn dirty_tree_recovery() -> Vec<String> {
    vec![
        "git status".to_string(),
        "git stash".to_string(),
        "git reset --hard HEAD".to_string(),
    ]
}

/// Block for fetch failures: re-attempt the fetch, check connectivity.
pub fn fetch_recovery() -> Vec<String> {
    vec![
        "# Manual recovery options:".to_string(),
        "git fetch --verbose".to_string(),
        "git remote -v".to_string(),
        "git status".to_string(),
    ]
}

/// Block for a push still rejected after the bounded retry.
pub fn push_recovery(remote_ref: &str) -> Vec<String> {
    vec![
        "# Manual recovery options:".to_string(),
        "git fetch".to_string(),
        format!("git rebase {remote_ref}"),
        "git push".to_string(),
        "git status".to_string(),
    ]
}

/// Aggressive block for failures where the rollback itself failed and the
/// repository may be in an inconsistent state.
pub fn emergency_recovery(backup: Option<&BackupRef>) -> Vec<String> {
    let mut commands = vec![
        "# Emergency recovery options:".to_string(),
        "git status".to_string(),
        "git reflog --oneline -10".to_string(),
    ];
    match backup {
        Some(backup) => {
            commands.push(format!("git reset --hard {backup}"));
            commands.push(format!("# Backup reference: {}...", backup.short()));
        }
        None => {
            commands.push("git reset --hard ORIG_HEAD".to_string());
            commands.push("git fsck --lost-found".to_string());
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup() -> BackupRef {
        BackupRef::new("a3f29c1d9b2e4f5061728394a5b6c7d8e9f00112")
    }

    #[test]
    fn rebase_recovery_lists_reset_to_full_ref() {
        let commands = rebase_recovery(Some(&backup()), "origin/main");
        assert_eq!(commands[0], "# Manual recovery options:");
        assert_eq!(commands[1], "# Backup reference: a3f29c1d...");
        assert_eq!(
            commands[2],
            "git reset --hard a3f29c1d9b2e4f5061728394a5b6c7d8e9f00112"
        );
        assert!(commands.contains(&"git rebase origin/main".to_string()));
        assert!(commands.contains(&"git reflog".to_string()));
        assert!(commands.contains(&"git status".to_string()));
    }

    #[test]
    fn rebase_recovery_without_backup_skips_reset() {
        let commands = rebase_recovery(None, "origin/main");
        assert!(!commands.iter().any(|c| c.starts_with("git reset")));
        assert!(commands.contains(&"git rebase origin/main".to_string()));
    }

    #[test]
    fn emergency_recovery_without_backup_suggests_fsck() {
        let commands = emergency_recovery(None);
        assert!(commands.contains(&"git fsck --lost-found".to_string()));
        assert!(commands.contains(&"git reset --hard ORIG_HEAD".to_string()));
    }

    #[test]
    fn every_block_is_non_empty() {
        assert!(!generic_recovery().is_empty());
        assert!(!dirty_tree_recovery().is_empty());
        assert!(!fetch_recovery().is_empty());
        assert!(!push_recovery("origin/main").is_empty());
        assert!(!emergency_recovery(Some(&backup())).is_empty());
    }
}
