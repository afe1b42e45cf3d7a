//! Test-only fixtures: real git repositories with a local bare origin.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::activity::{ActivityClock, ContextSlot};
use crate::cancel::CancelToken;
use crate::io::git::Git;
use crate::io::process::Supervisor;

/// A working clone wired to a local bare `origin`, with helpers to commit
/// locally and to land commits on the origin "from elsewhere".
pub struct TestRepo {
    dir: TempDir,
    work: PathBuf,
    origin: PathBuf,
    peer_counter: Cell<u32>,
}

impl TestRepo {
    /// Repo with one pushed commit and `main` tracking `origin/main`.
    pub fn new() -> Result<Self> {
        let repo = Self::empty()?;
        fs::write(repo.root().join("README.md"), "hello\n").context("write README")?;
        repo.run_git(&["add", "README.md"])?;
        repo.run_git(&["commit", "-m", "chore: init"])?;
        repo.run_git(&["push", "-u", "origin", "main"])?;
        Ok(repo)
    }

    /// Fresh repo with an origin remote but no commits yet.
    pub fn empty() -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let origin = dir.path().join("origin.git");
        run_git_in(dir.path(), &["init", "--bare", "-b", "main", "origin.git"])?;

        let work = dir.path().join("work");
        fs::create_dir(&work).context("create work dir")?;
        run_git_in(&work, &["init", "-b", "main"])?;
        configure_user(&work)?;
        let origin_str = origin.to_string_lossy().into_owned();
        run_git_in(&work, &["remote", "add", "origin", &origin_str])?;

        Ok(Self {
            dir,
            work,
            origin,
            peer_counter: Cell::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.work
    }

    /// Supervisor with fresh shared state and a generous idle bound.
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            ActivityClock::new(),
            ContextSlot::new(),
            CancelToken::new(),
            Duration::from_secs(600),
        )
    }

    pub fn git(&self) -> Git {
        Git::new(&self.work, self.supervisor())
    }

    /// Raw git call in the working clone; asserts success, returns stdout.
    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        run_git_in(&self.work, args)
    }

    pub fn write_file(&self, name: &str, contents: &str) {
        fs::write(self.work.join(name), contents).expect("write file");
    }

    /// Write, stage, and commit a file in the working clone (no push).
    pub fn commit_file(&self, name: &str, contents: &str, message: &str) {
        self.write_file(name, contents);
        self.run_git(&["add", name]).expect("git add");
        self.run_git(&["commit", "-m", message]).expect("git commit");
    }

    pub fn head_sha(&self) -> String {
        self.run_git(&["rev-parse", "HEAD"])
            .expect("rev-parse HEAD")
            .trim()
            .to_string()
    }

    /// Land a commit on the origin from a separate clone, simulating
    /// upstream work the local clone has not seen.
    pub fn remote_commit(&self, name: &str, contents: &str, message: &str) {
        let n = self.peer_counter.get() + 1;
        self.peer_counter.set(n);
        let peer = self.dir.path().join(format!("peer-{n}"));
        let origin_str = self.origin.to_string_lossy().into_owned();
        let peer_str = peer.to_string_lossy().into_owned();
        run_git_in(self.dir.path(), &["clone", &origin_str, &peer_str]).expect("git clone");
        configure_user(&peer).expect("configure peer");
        fs::write(peer.join(name), contents).expect("write peer file");
        run_git_in(&peer, &["add", name]).expect("peer add");
        run_git_in(&peer, &["commit", "-m", message]).expect("peer commit");
        run_git_in(&peer, &["push", "origin", "main"]).expect("peer push");
    }
}

fn run_git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn configure_user(dir: &Path) -> Result<()> {
    run_git_in(dir, &["config", "user.name", "test-user"])?;
    run_git_in(dir, &["config", "user.email", "test@example.com"])?;
    Ok(())
}
