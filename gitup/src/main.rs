//! Commit-and-sync workflow CLI.
//!
//! Runs: status summary, optional ./lint and ./test scripts, stage and
//! commit, then safely rebase onto the upstream and push. Every external
//! command is supervised (streamed, liveness-tracked) and a background
//! watchdog terminates the whole process if output stops for too long.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{debug, warn};

use gitup::activity::{ActivityClock, ContextSlot};
use gitup::cancel::{CancelToken, Cancelled};
use gitup::checks::run_script;
use gitup::core::outcome::{PushOutcome, SyncOutcome};
use gitup::exit_codes;
use gitup::io::config::{GitupConfig, load_config};
use gitup::io::git::{Git, StatusEntry};
use gitup::io::process::Supervisor;
use gitup::prompt::Prompter;
use gitup::sync::SyncEngine;
use gitup::watchdog::{WatchdogConfig, WatchdogMonitor};

#[derive(Parser)]
#[command(
    name = "gitup",
    version,
    about = "Safely commit, rebase, and push the current branch"
)]
struct Cli {
    /// Path to the repository (defaults to the current directory).
    repo: Option<PathBuf>,

    /// Commit message (skips the interactive prompt).
    #[arg(short, long)]
    message: Option<String>,

    /// Branch or remote ref to rebase onto (defaults to the upstream).
    #[arg(long)]
    target: Option<String>,

    /// Do not push after a successful commit.
    #[arg(long)]
    no_push: bool,

    /// Do not rebase, neither proactively nor on push rejection.
    #[arg(long)]
    no_rebase: bool,

    /// Do not run the ./lint script.
    #[arg(long)]
    no_lint: bool,

    /// Do not run the ./test script.
    #[arg(long)]
    no_test: bool,

    /// Never prompt; take defaults and report failures instead of asking.
    #[arg(long)]
    no_interactive: bool,

    /// Pass --verbose to the lint and test scripts.
    #[arg(long)]
    verbose: bool,
}

fn main() {
    gitup::logging::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            if err.is::<Cancelled>() {
                eprintln!("Aborting");
                process::exit(exit_codes::INTERRUPTED);
            }
            eprintln!("{:#}", err);
            process::exit(exit_codes::FAILURE);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let start_dir = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("current dir")?,
    };
    let root = find_git_root(&start_dir)
        .ok_or_else(|| anyhow!("no .git directory found near {}", start_dir.display()))?;
    let config = load_config(&root)?;

    let clock = ActivityClock::new();
    let context = ContextSlot::new();
    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);
    WatchdogMonitor::new(
        clock.clone(),
        context.clone(),
        WatchdogConfig::from_timers(&config.watchdog),
    )
    .spawn();

    let supervisor = Supervisor::new(
        clock,
        context,
        cancel.clone(),
        Duration::from_secs(config.idle_timeout_secs),
    );
    let git = Git::new(&root, supervisor.clone());
    let prompter = Prompter::new(
        cancel.clone(),
        Duration::from_secs(config.prompt_timeout_secs),
        !cli.no_interactive,
    );

    let entries = git.status_porcelain()?;
    print_status_summary(&entries);
    let has_changes = !entries.is_empty();
    if !has_changes && !git.has_unpushed_commits()? {
        println!("No changes to commit, working tree clean.");
        return Ok(exit_codes::FAILURE);
    }

    if has_changes {
        let untracked: Vec<String> = entries
            .iter()
            .filter(|e| e.is_untracked())
            .map(|e| e.path.clone())
            .collect();
        if !untracked.is_empty() && !stage_untracked(&git, &prompter, &untracked)? {
            println!("Aborting.");
            return Ok(exit_codes::FAILURE);
        }

        run_checks(&supervisor, &root, cli, &config)?;

        git.add_all()?;
        if git.has_staged_changes()? {
            let message = resolve_commit_message(cli, &prompter)?;
            println!("Running: git commit -m \"{message}\"");
            git.commit_staged(&message)?;
        }
    }

    if cli.no_push {
        return Ok(exit_codes::OK);
    }

    let engine = SyncEngine::new(git, cancel, cli.target.clone());

    if !cli.no_rebase {
        println!("Fetching latest changes from remote...");
        let fetch = engine.git().fetch()?;
        if !fetch.success() {
            eprintln!("Error: git fetch failed");
            return Ok(exit_codes::FAILURE);
        }

        let remote_ref = engine.remote_ref()?;
        if engine.rebase_needed(&remote_ref)? {
            println!("Current branch is behind {remote_ref}");
            if prompter.is_interactive()
                && !prompter.ask_yes_no(&format!("Attempt rebase onto {remote_ref}?"), true)?
            {
                println!("Skipping rebase.");
                return Ok(exit_codes::FAILURE);
            }
            let outcome = engine.sync()?;
            if !outcome.success {
                report_sync_failure(&outcome);
                return Ok(exit_codes::FAILURE);
            }
        } else {
            debug!(remote_ref = %remote_ref, "already up to date with the remote");
        }
    }

    let push = engine.push_with_retry(!cli.no_rebase)?;
    if !push.success {
        report_push_failure(&push);
        return Ok(exit_codes::FAILURE);
    }

    Ok(exit_codes::OK)
}

fn install_interrupt_handler(cancel: &CancelToken) {
    let cancel = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping...");
        cancel.cancel();
    }) {
        warn!(err = %err, "failed to install Ctrl-C handler");
    }
}

/// Walk up at most 3 levels looking for a `.git` directory.
fn find_git_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    let mut dir = start.as_path();
    for _ in 0..3 {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
    None
}

fn print_status_summary(entries: &[StatusEntry]) {
    if entries.is_empty() {
        return;
    }
    println!("Changes detected:");
    for entry in entries {
        let marker = if is_suspicious_file(&entry.path) {
            "  <- usually not committed"
        } else {
            ""
        };
        println!("  {} {}{}", entry.code, entry.path, marker);
    }
}

/// Stage untracked files, per-file interactively or all of them when no
/// terminal is available. Returns false when the user aborts.
fn stage_untracked(git: &Git, prompter: &Prompter, untracked: &[String]) -> Result<bool> {
    println!("There are untracked files.");
    if !prompter.is_interactive() {
        println!("Adding all untracked files.");
        for path in untracked {
            println!("  Adding {path}");
            git.add_file(path)?;
        }
        return Ok(true);
    }

    if !prompter.ask_yes_no("Continue?", true)? {
        return Ok(false);
    }
    for path in untracked {
        if prompter.ask_yes_no(&format!("  Add {path}?"), true)? {
            git.add_file(path)?;
        } else {
            println!("  Skipping {path}");
        }
    }
    Ok(true)
}

fn run_checks(
    supervisor: &Supervisor,
    root: &Path,
    cli: &Cli,
    config: &GitupConfig,
) -> Result<()> {
    let timeout = Duration::from_secs(config.check_timeout_secs);
    if !cli.no_lint
        && let Some(outcome) = run_script(supervisor, root, "lint", "LINT", cli.verbose, timeout)?
        && !outcome.passed
    {
        return Err(anyhow!("linting failed with exit code {}", outcome.exit_code));
    }
    if !cli.no_test
        && let Some(outcome) = run_script(supervisor, root, "test", "TEST", cli.verbose, timeout)?
        && !outcome.passed
    {
        return Err(anyhow!("tests failed with exit code {}", outcome.exit_code));
    }
    Ok(())
}

fn resolve_commit_message(cli: &Cli, prompter: &Prompter) -> Result<String> {
    if let Some(message) = &cli.message {
        return Ok(message.clone());
    }
    if let Some(line) = prompter.read_line("Commit message: ")? {
        let line = line.trim().to_string();
        if !line.is_empty() {
            return Ok(line);
        }
    }
    println!("Using generic commit message as fallback...");
    Ok("chore: automated commit".to_string())
}

fn report_sync_failure(outcome: &SyncOutcome) {
    eprintln!("Error: {}", outcome.error_message);
    if outcome.had_conflicts {
        eprintln!("Resolve the conflicts manually, then re-run gitup.");
    }
    for command in &outcome.recovery_commands {
        eprintln!("{command}");
    }
}

fn report_push_failure(push: &PushOutcome) {
    eprintln!("Error: {}", push.error_message);
    for command in &push.recovery_commands {
        eprintln!("{command}");
    }
}

/// Extensions and name patterns that usually should not be committed.
fn is_suspicious_file(filename: &str) -> bool {
    const SUSPICIOUS_SUFFIXES: &[&str] = &[
        ".log", ".tmp", ".temp", ".o", ".obj", ".exe", ".dll", ".so", ".dylib", ".pyc",
        ".cache", ".bak", ".swp", ".swo",
    ];
    let lowered = filename.to_lowercase();
    SUSPICIOUS_SUFFIXES.iter().any(|s| lowered.ends_with(s))
        || lowered.contains("tmp")
        || lowered.contains("temp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["gitup"]);
        assert!(cli.repo.is_none());
        assert!(!cli.no_push && !cli.no_rebase && !cli.no_interactive);
        assert!(cli.message.is_none());
    }

    #[test]
    fn parse_mode_flags() {
        let cli = Cli::parse_from([
            "gitup",
            "--no-push",
            "--no-rebase",
            "--no-interactive",
            "-m",
            "fix: something",
        ]);
        assert!(cli.no_push && cli.no_rebase && cli.no_interactive);
        assert_eq!(cli.message.as_deref(), Some("fix: something"));
    }

    #[test]
    fn git_root_is_found_up_to_three_levels() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(".git")).expect("fake .git");
        let nested = temp.path().join("a/b");
        fs::create_dir_all(&nested).expect("nested");

        let found = find_git_root(&nested).expect("found");
        assert_eq!(found, temp.path().canonicalize().expect("canon"));

        let deeper = temp.path().join("a/b/c");
        fs::create_dir_all(&deeper).expect("deeper");
        assert!(find_git_root(&deeper).is_none());
    }

    #[test]
    fn suspicious_files_are_flagged() {
        assert!(is_suspicious_file("build.log"));
        assert!(is_suspicious_file("scratch.tmp"));
        assert!(is_suspicious_file("notes-temp.md"));
        assert!(!is_suspicious_file("src/main.rs"));
    }
}
