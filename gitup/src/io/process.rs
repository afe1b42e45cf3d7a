//! Supervised child processes: streamed output, liveness ticks, bounded waits.
//!
//! Every external command (git, lint/test scripts) runs through
//! [`Supervisor::run`]. Child stderr is merged with stdout into a single
//! line stream; each line ticks the shared [`ActivityClock`], is mirrored
//! to the console unless quiet, and is captured when requested. A per-line
//! idle bound kills commands that stop producing output, and the shared
//! [`CancelToken`] is polled between lines so Ctrl-C interrupts a blocked
//! read instead of waiting it out.

use std::io::{BufRead, BufReader, IsTerminal, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, warn};
use wait_timeout::ChildExt;

use crate::activity::{ActivityClock, CommandContext, ContextSlot};
use crate::cancel::{CancelToken, Cancelled};

/// Exit code reserved for "executable not found".
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when a command is killed for producing no output.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Stand-in when the child died without an exit code (e.g. by signal).
const EXIT_UNKNOWN: i32 = -1;

/// How often a blocked line read wakes up to poll cancellation and idleness.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bounded wait for a child to exit after a kill or after closing its pipes.
const REAP_TIMEOUT: Duration = Duration::from_secs(10);

/// One external command invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Command and arguments.
    pub argv: Vec<String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Short phase label for watchdog diagnostics, e.g. "REBASE".
    pub phase: &'static str,
    /// Suppress mirroring lines to the console.
    pub quiet: bool,
    /// Accumulate lines into the returned [`ProcessResult`].
    pub capture: bool,
}

impl RunRequest {
    pub fn new<I, S>(argv: I, phase: &'static str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            phase,
            quiet: false,
            capture: false,
        }
    }
}

/// Captured completion of one supervised command. Immutable after creation.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exit_code: i32,
    /// Captured output (empty unless capturing). Child stderr is merged
    /// into this same stream.
    pub stdout: String,
    /// Always empty: stderr is redirected into `stdout`. Kept so call
    /// sites that care about the distinction read naturally.
    pub stderr: String,
    /// Whether the command was killed for exceeding the idle bound.
    pub timed_out: bool,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs external commands with streaming, liveness tracking, and kill/cancel.
#[derive(Debug, Clone)]
pub struct Supervisor {
    clock: ActivityClock,
    context: ContextSlot,
    cancel: CancelToken,
    idle_timeout: Duration,
}

impl Supervisor {
    pub fn new(
        clock: ActivityClock,
        context: ContextSlot,
        cancel: CancelToken,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            clock,
            context,
            cancel,
            idle_timeout,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// A supervisor sharing this one's clock and context but with a fresh,
    /// untripped cancel token. Recovery commands run through this after a
    /// cancellation, so the rollback is not itself refused.
    pub fn detached(&self) -> Supervisor {
        Supervisor {
            clock: self.clock.clone(),
            context: self.context.clone(),
            cancel: CancelToken::new(),
            idle_timeout: self.idle_timeout,
        }
    }

    /// Run a command with the supervisor's default idle timeout.
    pub fn run(&self, request: &RunRequest) -> Result<ProcessResult> {
        self.run_with_timeout(request, self.idle_timeout)
    }

    /// Run a command, killing it if no output line arrives within `idle_timeout`.
    ///
    /// Returns `Err(Cancelled)` when the run was interrupted; callers never
    /// observe a normal [`ProcessResult`] after a cancellation.
    pub fn run_with_timeout(
        &self,
        request: &RunRequest,
        idle_timeout: Duration,
    ) -> Result<ProcessResult> {
        self.cancel.check()?;
        let command_line = request.argv.join(" ");
        if request.argv.is_empty() {
            return Err(anyhow!("refusing to run an empty command"));
        }
        debug!(command = %command_line, phase = request.phase, "spawning child process");

        let mut cmd = Command::new(&request.argv[0]);
        cmd.args(&request.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so killing the command takes its tree with it.
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(command = %command_line, "executable not found");
                eprintln!("Command not found: {command_line}");
                return Ok(ProcessResult {
                    exit_code: EXIT_NOT_FOUND,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: false,
                });
            }
            Err(err) => {
                error!(err = %err, command = %command_line, "failed to spawn command");
                return Err(err).with_context(|| format!("spawn {command_line}"));
            }
        };

        self.context.set(CommandContext {
            phase: request.phase,
            command: command_line,
            started: Instant::now(),
            interactive: std::io::stdin().is_terminal(),
        });
        let result = self.drain(&mut child, request, idle_timeout);
        self.context.clear();
        result
    }

    fn drain(
        &self,
        child: &mut Child,
        request: &RunRequest,
        idle_timeout: Duration,
    ) -> Result<ProcessResult> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        // Merge both pipes into one line stream. Readers drop their sender
        // at EOF; line order across the two streams is arrival order.
        let (tx, rx) = mpsc::channel::<String>();
        let tx_err = tx.clone();
        let stdout_reader = thread::spawn(move || forward_lines(stdout, &tx));
        let stderr_reader = thread::spawn(move || forward_lines(stderr, &tx_err));

        enum DrainEnd {
            Eof,
            TimedOut,
            Cancelled,
        }

        let mut captured = String::new();
        let mut last_line = Instant::now();
        let end = loop {
            if self.cancel.is_cancelled() {
                break DrainEnd::Cancelled;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    self.clock.tick();
                    last_line = Instant::now();
                    if request.capture {
                        captured.push_str(&line);
                        captured.push('\n');
                    }
                    if !request.quiet {
                        println!("{line}");
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_line.elapsed() >= idle_timeout {
                        break DrainEnd::TimedOut;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break DrainEnd::Eof,
            }
        };
        drop(rx);

        match end {
            DrainEnd::Cancelled => {
                warn!("cancellation requested, killing child process tree");
                kill_tree(child);
                let _ = child.wait_timeout(REAP_TIMEOUT).context("wait after cancel")?;
                let _ = join_reader(stdout_reader);
                let _ = join_reader(stderr_reader);
                Err(Cancelled.into())
            }
            DrainEnd::TimedOut => {
                warn!(
                    idle_secs = idle_timeout.as_secs(),
                    "no output within idle bound, killing child process tree"
                );
                kill_tree(child);
                let _ = child
                    .wait_timeout(REAP_TIMEOUT)
                    .context("wait after idle kill")?;
                let _ = join_reader(stdout_reader);
                let _ = join_reader(stderr_reader);
                Ok(ProcessResult {
                    exit_code: EXIT_TIMED_OUT,
                    stdout: captured,
                    stderr: String::new(),
                    timed_out: true,
                })
            }
            DrainEnd::Eof => {
                join_reader(stdout_reader).context("join stdout reader")?;
                join_reader(stderr_reader).context("join stderr reader")?;
                let mut timed_out = false;
                let status = match child
                    .wait_timeout(REAP_TIMEOUT)
                    .context("wait for command")?
                {
                    Some(status) => status,
                    None => {
                        warn!("child closed its pipes but did not exit, killing");
                        timed_out = true;
                        kill_tree(child);
                        child.wait().context("wait after kill")?
                    }
                };
                let exit_code = if timed_out {
                    EXIT_TIMED_OUT
                } else {
                    status.code().unwrap_or(EXIT_UNKNOWN)
                };
                debug!(exit_code, timed_out, "command finished");
                Ok(ProcessResult {
                    exit_code,
                    stdout: captured,
                    stderr: String::new(),
                    timed_out,
                })
            }
        }
    }
}

/// Forward a pipe to the merged channel, one line at a time.
fn forward_lines<R: Read>(reader: R, tx: &mpsc::Sender<String>) -> Result<()> {
    let mut reader = BufReader::new(reader);
    loop {
        let mut buf = Vec::new();
        let n = reader.read_until(b'\n', &mut buf).context("read line")?;
        if n == 0 {
            return Ok(());
        }
        while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        // Receiver gone means the run was cancelled or timed out; just drain.
        if tx.send(line).is_err() {
            return Ok(());
        }
    }
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // The child was spawned into its own process group, so pgid == pid.
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(pid, Signal::SIGKILL) {
        debug!(err = %err, "killpg failed, falling back to direct kill");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Supervisor {
        Supervisor::new(
            ActivityClock::new(),
            ContextSlot::new(),
            CancelToken::new(),
            Duration::from_secs(600),
        )
    }

    fn captured(argv: &[&str]) -> RunRequest {
        let mut request = RunRequest::new(argv.iter().copied(), "TEST");
        request.quiet = true;
        request.capture = true;
        request
    }

    #[test]
    fn captures_streamed_lines() {
        let result = supervisor()
            .run(&captured(&["echo", "hello"]))
            .expect("run echo");
        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[test]
    fn missing_executable_reports_127() {
        let result = supervisor()
            .run(&captured(&["gitup-no-such-binary-470f"]))
            .expect("spawn failure handled");
        assert_eq!(result.exit_code, EXIT_NOT_FOUND);
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[test]
    fn exit_codes_pass_through_verbatim() {
        let result = supervisor()
            .run(&captured(&["sh", "-c", "exit 3"]))
            .expect("run sh");
        assert_eq!(result.exit_code, 3);
    }

    #[cfg(unix)]
    #[test]
    fn stderr_is_merged_into_stdout() {
        let result = supervisor()
            .run(&captured(&["sh", "-c", "echo out; echo err 1>&2"]))
            .expect("run sh");
        assert!(result.stdout.contains("out"));
        assert!(result.stdout.contains("err"));
        assert!(result.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn silent_command_is_killed_after_idle_bound() {
        let start = Instant::now();
        let result = supervisor()
            .run_with_timeout(&captured(&["sleep", "30"]), Duration::from_millis(300))
            .expect("idle kill");
        assert!(result.timed_out);
        assert_eq!(result.exit_code, EXIT_TIMED_OUT);
        assert!(start.elapsed() < Duration::from_secs(15));
    }

    #[test]
    fn pre_cancelled_token_refuses_to_run() {
        let sup = supervisor();
        sup.cancel_token().cancel();
        let err = sup.run(&captured(&["echo", "hello"])).expect_err("cancelled");
        assert!(err.is::<Cancelled>());
    }

    /// Cancellation mid-run kills the child and propagates `Cancelled`
    /// instead of returning a normal result.
    #[cfg(unix)]
    #[test]
    fn cancellation_interrupts_a_blocked_read() {
        let sup = supervisor();
        let token = sup.cancel_token().clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            token.cancel();
        });

        let start = Instant::now();
        let err = sup
            .run(&captured(&["sleep", "30"]))
            .expect_err("cancelled mid-run");
        assert!(err.is::<Cancelled>());
        assert!(start.elapsed() < Duration::from_secs(15));
        canceller.join().expect("canceller");
    }

    #[test]
    fn lines_advance_the_activity_clock() {
        let clock = ActivityClock::new();
        let sup = Supervisor::new(
            clock.clone(),
            ContextSlot::new(),
            CancelToken::new(),
            Duration::from_secs(600),
        );
        thread::sleep(Duration::from_millis(50));
        sup.run(&captured(&["echo", "tick"])).expect("run echo");
        assert!(clock.idle_for() < Duration::from_millis(50));
    }

    #[test]
    fn context_slot_is_cleared_after_the_run() {
        let slot = ContextSlot::new();
        let sup = Supervisor::new(
            ActivityClock::new(),
            slot.clone(),
            CancelToken::new(),
            Duration::from_secs(600),
        );
        sup.run(&captured(&["echo", "ctx"])).expect("run echo");
        assert!(slot.snapshot().is_none());
    }
}
