//! Interactive input with timeouts and cancellation.
//!
//! Reading stdin happens on a helper thread so the waiting side can poll
//! the cancel token and a deadline instead of blocking forever. Without an
//! interactive terminal every question resolves to its default.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::cancel::CancelToken;

/// How often a pending prompt wakes up to poll cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct Prompter {
    cancel: CancelToken,
    timeout: Duration,
    interactive: bool,
}

impl Prompter {
    /// `interactive_allowed` is false under `--no-interactive`; even when
    /// allowed, prompts only happen with a terminal on stdin.
    pub fn new(cancel: CancelToken, timeout: Duration, interactive_allowed: bool) -> Self {
        Self {
            cancel,
            timeout,
            interactive: interactive_allowed && io::stdin().is_terminal(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Ask a yes/no question. Non-interactive sessions take the default.
    pub fn ask_yes_no(&self, question: &str, default: bool) -> Result<bool> {
        let default_label = if default { "y" } else { "n" };
        if !self.interactive {
            println!("{question} [y/n]: {default_label} (auto-selected, no terminal)");
            return Ok(default);
        }
        loop {
            let Some(answer) = self.read_line(&format!("{question} [y/n]: "))? else {
                println!("Input timed out, using default: {default_label}");
                return Ok(default);
            };
            let answer = answer.trim().to_lowercase();
            if answer.contains('y') {
                return Ok(true);
            }
            if answer.contains('n') {
                return Ok(false);
            }
            if answer.is_empty() {
                return Ok(default);
            }
            println!("Please answer 'yes' or 'no'.");
        }
    }

    /// Read one line from the user.
    ///
    /// `Ok(None)` when no terminal is attached, the timeout elapsed, or
    /// stdin was closed. `Err(Cancelled)` when the user interrupted.
    pub fn read_line(&self, prompt: &str) -> Result<Option<String>> {
        if !self.interactive {
            return Ok(None);
        }
        print!("{prompt}");
        io::stdout().flush().context("flush prompt")?;

        // The reader thread is abandoned on timeout; it exits on the next
        // line (its send fails once the receiver is gone).
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let result = io::stdin().lock().read_line(&mut line);
            let _ = tx.send(result.map(|n| (n, line)));
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            self.cancel.check()?;
            if Instant::now() >= deadline {
                warn!(timeout_secs = self.timeout.as_secs(), "input timed out");
                println!();
                return Ok(None);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok((0, _))) => {
                    debug!("stdin closed");
                    return Ok(None);
                }
                Ok(Ok((_, line))) => return Ok(Some(line.trim_end().to_string())),
                Ok(Err(err)) => return Err(err).context("read stdin"),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_interactive() -> Prompter {
        Prompter::new(CancelToken::new(), Duration::from_secs(1), false)
    }

    #[test]
    fn non_interactive_yes_no_takes_the_default() {
        let prompter = non_interactive();
        assert!(prompter.ask_yes_no("Continue?", true).expect("default yes"));
        assert!(!prompter.ask_yes_no("Continue?", false).expect("default no"));
    }

    #[test]
    fn non_interactive_read_line_yields_nothing() {
        let prompter = non_interactive();
        assert!(prompter.read_line("> ").expect("no input").is_none());
    }

    #[test]
    fn no_interactive_flag_wins_over_terminal_detection() {
        let prompter = Prompter::new(CancelToken::new(), Duration::from_secs(1), false);
        assert!(!prompter.is_interactive());
    }
}
