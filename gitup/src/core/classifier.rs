//! Heuristic classification of failed git output.
//!
//! Git reports conflicts and push rejections in human-readable text, not in
//! a machine-readable format, so classification is a case-insensitive
//! substring match over captured output. Best effort: if git's wording
//! changes across versions these checks can miss (false negatives). The
//! vocabulary is frozen together with the fixtures in the tests below;
//! extend both or neither.

/// Substrings (lowercase) that mark a failed rebase/merge as a conflict.
const CONFLICT_MARKERS: &[&str] = &[
    "conflict",
    "failed to merge",
    "merge conflict",
    "automatic merge failed",
    "resolve conflicts",
    "fix conflicts",
    "both modified",
    "both added",
    "added by us",
    "added by them",
    "deleted by us",
    "deleted by them",
];

/// Substrings (lowercase) that mark a failed push as a rejection that a
/// rebase can fix, as opposed to e.g. an auth or network failure.
const REJECTION_MARKERS: &[&str] = &["non-fast-forward", "rejected"];

/// True if the combined output of a failed git operation looks like a
/// merge/rebase conflict rather than an unrelated failure.
pub fn is_conflict(stdout: &str, stderr: &str) -> bool {
    let combined = format!("{stdout} {stderr}").to_lowercase();
    CONFLICT_MARKERS
        .iter()
        .any(|marker| combined.contains(marker))
}

/// True if failed push output indicates a non-fast-forward rejection.
pub fn is_push_rejected(output: &str) -> bool {
    let lowered = output.to_lowercase();
    REJECTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Captured from real `git rebase` / `git push` runs; the classifier
    // contract is pinned against these.

    const CONTENT_CONFLICT: &str = "\
Auto-merging file.txt
CONFLICT (content): Merge conflict in file.txt
error: could not apply 3b18e51... change line one
hint: Resolve all conflicts manually, mark them as resolved with
hint: \"git add/rm <conflicted_files>\", then run \"git rebase --continue\".";

    const DELETE_MODIFY_CONFLICT: &str = "\
CONFLICT (modify/delete): file.txt deleted in HEAD and modified in 9f2c511.
Version 9f2c511 of file.txt left in tree.";

    const STATUS_BOTH_MODIFIED: &str = "\
Unmerged paths:
  (use \"git restore --staged <file>...\" to unstage)
  both modified:   src/main.rs";

    const UNSTAGED_REFUSAL: &str = "\
error: cannot rebase: You have unstaged changes.
error: Please commit or stash them.";

    const BAD_UPSTREAM: &str = "fatal: invalid upstream 'origin/nope'";

    const PUSH_REJECTED: &str = "\
To /tmp/origin.git
 ! [rejected]        main -> main (non-fast-forward)
error: failed to push some refs to '/tmp/origin.git'
hint: Updates were rejected because the tip of your current branch is behind";

    #[test]
    fn content_conflict_is_detected() {
        assert!(is_conflict(CONTENT_CONFLICT, ""));
    }

    #[test]
    fn modify_delete_conflict_is_detected() {
        assert!(is_conflict("", DELETE_MODIFY_CONFLICT));
    }

    #[test]
    fn status_vocabulary_is_detected() {
        assert!(is_conflict(STATUS_BOTH_MODIFIED, ""));
    }

    #[test]
    fn detection_spans_both_streams() {
        assert!(is_conflict("", CONTENT_CONFLICT));
        assert!(is_conflict(CONTENT_CONFLICT, ""));
    }

    #[test]
    fn detection_is_case_insensitive() {
        assert!(is_conflict("CONFLICT (CONTENT)", ""));
        assert!(is_conflict("Failed To Merge", ""));
    }

    #[test]
    fn non_conflict_failures_are_not_conflicts() {
        assert!(!is_conflict(UNSTAGED_REFUSAL, ""));
        assert!(!is_conflict(BAD_UPSTREAM, ""));
        assert!(!is_conflict("", ""));
    }

    #[test]
    fn push_rejection_is_detected() {
        assert!(is_push_rejected(PUSH_REJECTED));
        assert!(is_push_rejected("! [REJECTED] main -> main"));
    }

    #[test]
    fn other_push_failures_are_not_rejections() {
        assert!(!is_push_rejected(
            "fatal: could not read Username for 'https://example.com'"
        ));
        assert!(!is_push_rejected(""));
    }
}
