//! Git adapter built on the process supervisor.
//!
//! All mutating operations are executed with live streaming so a human
//! watching the CLI sees progress; plumbing queries run quiet and
//! captured. Text output is interpreted heuristically; git is an external
//! process here, not an object model.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{ProcessResult, RunRequest, Supervisor};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }

    pub fn is_staged(&self) -> bool {
        !self.is_untracked() && !self.code.starts_with(' ')
    }

    pub fn is_unstaged(&self) -> bool {
        !self.is_untracked() && self.code.chars().nth(1).is_some_and(|c| c != ' ')
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    supervisor: Supervisor,
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// A handle whose commands keep running after the main cancel token
    /// has tripped. Used for best-effort rollback on interruption.
    pub fn detached(&self) -> Git {
        Git {
            supervisor: self.supervisor.detached(),
            workdir: self.workdir.clone(),
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Resolve HEAD to a full commit hash.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        let sha = out.trim().to_string();
        if sha.is_empty() {
            return Err(anyhow!("git rev-parse HEAD returned empty output"));
        }
        Ok(sha)
    }

    /// Whether the object database can resolve `rev` to an existing object.
    pub fn object_exists(&self, rev: &str) -> Result<bool> {
        let result = self.run_quiet(&["cat-file", "-e", rev])?;
        Ok(result.success())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True only if porcelain status reports nothing at all. Any pending
    /// change, staged or not, makes the tree dirty.
    pub fn is_clean(&self) -> Result<bool> {
        Ok(self.status_porcelain()?.is_empty())
    }

    /// Upstream tracking ref of the current branch, e.g. `origin/feature-x`.
    pub fn upstream_branch(&self) -> Result<Option<String>> {
        let result = self.run_quiet(&[
            "rev-parse",
            "--abbrev-ref",
            "--symbolic-full-name",
            "@{u}",
        ])?;
        if !result.success() {
            debug!("no upstream tracking branch configured");
            return Ok(None);
        }
        let name = result.stdout.trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    /// Detect the primary branch name (`main`, `master`, ...).
    ///
    /// Prefers the remote HEAD symref; falls back to probing well-known
    /// names, then defaults to `main`.
    #[instrument(skip_all)]
    pub fn primary_branch(&self) -> Result<String> {
        let result = self.run_quiet(&["symbolic-ref", "refs/remotes/origin/HEAD"])?;
        if result.success()
            && let Some(name) = result.stdout.trim().rsplit('/').next()
            && !name.is_empty()
        {
            debug!(branch = %name, "primary branch from remote HEAD");
            return Ok(name.to_string());
        }

        for candidate in ["main", "master"] {
            let probe = self.run_quiet(&["rev-parse", "--verify", &format!("origin/{candidate}")])?;
            if probe.success() {
                debug!(branch = %candidate, "primary branch from probe");
                return Ok(candidate.to_string());
            }
        }

        Ok("main".to_string())
    }

    /// Whether the current branch carries commits its upstream does not.
    ///
    /// No upstream configured counts as nothing to push.
    pub fn has_unpushed_commits(&self) -> Result<bool> {
        let result = self.run_quiet(&["rev-list", "@{u}..HEAD", "--count"])?;
        if !result.success() {
            return Ok(false);
        }
        let count: u64 = result.stdout.trim().parse().unwrap_or(0);
        Ok(count > 0)
    }

    /// Hash of a remote ref, for the behind-upstream check.
    pub fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        let result = self.run_quiet(&["rev-parse", "--verify", rev])?;
        if !result.success() {
            return Ok(None);
        }
        let sha = result.stdout.trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    /// Merge base between HEAD and `rev`, when one exists.
    pub fn merge_base(&self, rev: &str) -> Result<Option<String>> {
        let result = self.run_quiet(&["merge-base", "HEAD", rev])?;
        if !result.success() {
            return Ok(None);
        }
        let sha = result.stdout.trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    /// `git fetch`, streamed.
    pub fn fetch(&self) -> Result<ProcessResult> {
        self.run_streamed(&["fetch"], "FETCH")
    }

    /// `git rebase <onto>`, streamed and captured for conflict classification.
    pub fn rebase(&self, onto: &str) -> Result<ProcessResult> {
        self.run_streamed(&["rebase", onto], "REBASE")
    }

    /// `git rebase --abort`, streamed.
    pub fn rebase_abort(&self) -> Result<ProcessResult> {
        self.run_streamed(&["rebase", "--abort"], "RECOVER")
    }

    /// Whether a rebase is mid-flight, detected by probing the git dir for
    /// `rebase-merge`/`rebase-apply` rather than grepping status text.
    pub fn rebase_in_progress(&self) -> Result<bool> {
        for state_dir in ["rebase-merge", "rebase-apply"] {
            let result = self.run_quiet(&["rev-parse", "--git-path", state_dir])?;
            if !result.success() {
                continue;
            }
            let path = self.workdir.join(result.stdout.trim());
            if path.exists() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `git reset --hard <rev>`, streamed.
    pub fn reset_hard(&self, rev: &str) -> Result<ProcessResult> {
        self.run_streamed(&["reset", "--hard", rev], "RECOVER")
    }

    /// `git push`, setting the upstream on first push of a new branch.
    #[instrument(skip_all)]
    pub fn push(&self) -> Result<ProcessResult> {
        if self.upstream_branch()?.is_some() {
            return self.run_streamed(&["push"], "PUSH");
        }
        let branch = self.current_branch()?;
        debug!(branch = %branch, "no upstream, pushing with -u origin");
        self.run_streamed(&["push", "-u", "origin", &branch], "PUSH")
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "."], "STAGE")?;
        Ok(())
    }

    /// Stage a single file.
    pub fn add_file(&self, path: &str) -> Result<()> {
        self.run_checked(&["add", path], "STAGE")?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message], "COMMIT")?;
        Ok(true)
    }

    /// Quiet captured run; non-zero exit is an error.
    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let result = self.run_quiet(args)?;
        if !result.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                result.stdout.trim()
            ));
        }
        Ok(result.stdout)
    }

    /// Streamed run; non-zero exit is an error.
    fn run_checked(&self, args: &[&str], phase: &'static str) -> Result<ProcessResult> {
        let result = self.run_streamed(args, phase)?;
        if !result.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                result.stdout.trim()
            ));
        }
        Ok(result)
    }

    /// Quiet captured run; exit code passed through on the result.
    fn run_quiet(&self, args: &[&str]) -> Result<ProcessResult> {
        let mut request = self.request(args, "GIT");
        request.quiet = true;
        self.supervisor.run(&request)
    }

    /// Run with output mirrored to the console and captured for inspection.
    fn run_streamed(&self, args: &[&str], phase: &'static str) -> Result<ProcessResult> {
        let request = self.request(args, phase);
        self.supervisor.run(&request)
    }

    fn request(&self, args: &[&str], phase: &'static str) -> RunRequest {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|a| (*a).to_string()));
        let mut request = RunRequest::new(argv, phase);
        request.cwd = Some(self.workdir.clone());
        request.capture = true;
        request
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
