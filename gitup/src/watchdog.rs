//! Background liveness monitor for the whole program.
//!
//! Independent of the sync engine: a safety net for liveness, never part
//! of normal control flow. The monitor polls the shared [`ActivityClock`];
//! sustained silence first earns a one-shot warning and eventually a
//! diagnostic dump followed by forced process termination.

use std::backtrace::Backtrace;
use std::process;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::activity::{ActivityClock, ContextSlot};
use crate::exit_codes;
use crate::io::config::WatchdogTimers;

/// Longest command text shown in the diagnostic block.
const COMMAND_DISPLAY_LIMIT: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
    pub warn_after: Duration,
    pub kill_after: Duration,
}

impl WatchdogConfig {
    pub fn from_timers(timers: &WatchdogTimers) -> Self {
        Self {
            poll_interval: Duration::from_secs(timers.poll_secs),
            warn_after: Duration::from_secs(timers.warn_after_secs),
            kill_after: Duration::from_secs(timers.kill_after_secs),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from_timers(&WatchdogTimers::default())
    }
}

/// What one poll of the activity clock calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Activity is recent (also re-arms the warning).
    Quiet,
    /// Soft threshold crossed and not yet warned.
    Warn,
    /// Soft threshold crossed, already warned.
    AlreadyWarned,
    /// Hard threshold crossed.
    Terminate,
}

/// Pure decision function for one poll, so the warn/kill/reset timeline is
/// testable without real time.
pub fn assess(idle: Duration, warned: bool, config: &WatchdogConfig) -> Verdict {
    if idle >= config.kill_after {
        Verdict::Terminate
    } else if idle < config.warn_after {
        Verdict::Quiet
    } else if warned {
        Verdict::AlreadyWarned
    } else {
        Verdict::Warn
    }
}

/// Background loop watching the activity clock for the program's lifetime.
pub struct WatchdogMonitor {
    clock: ActivityClock,
    context: ContextSlot,
    config: WatchdogConfig,
}

impl WatchdogMonitor {
    pub fn new(clock: ActivityClock, context: ContextSlot, config: WatchdogConfig) -> Self {
        Self {
            clock,
            context,
            config,
        }
    }

    /// Start the monitor thread. It holds unilateral authority to end the
    /// process and never joins back.
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                self.run(|| process::exit(exit_codes::WATCHDOG));
            })
            .expect("spawn watchdog thread")
    }

    /// The poll loop, with termination injectable for tests.
    fn run<F: FnOnce()>(self, terminate: F) {
        let mut warned = false;
        loop {
            thread::sleep(self.config.poll_interval);
            let idle = self.clock.idle_for();
            match assess(idle, warned, &self.config) {
                Verdict::Quiet => warned = false,
                Verdict::AlreadyWarned => {}
                Verdict::Warn => {
                    warned = true;
                    warn!(idle_secs = idle.as_secs(), "no command output for a while");
                    eprintln!(
                        "Warning: no output for {}s (will terminate at {}s idle)",
                        idle.as_secs(),
                        self.config.kill_after.as_secs()
                    );
                }
                Verdict::Terminate => {
                    self.dump_diagnostics(idle);
                    terminate();
                    return;
                }
            }
            debug!(idle_millis = idle.as_millis() as u64, warned, "watchdog poll");
        }
    }

    fn dump_diagnostics(&self, idle: Duration) {
        eprintln!("{}", "=".repeat(60));
        eprintln!(
            "WATCHDOG: no output for {}s, terminating process",
            idle.as_secs()
        );
        match self.context.snapshot() {
            Some(context) => {
                eprintln!("  phase:       {}", context.phase);
                eprintln!("  command:     {}", truncate(&context.command, COMMAND_DISPLAY_LIMIT));
                eprintln!("  running for: {}s", context.started.elapsed().as_secs());
                eprintln!("  interactive: {}", context.interactive);
            }
            None => eprintln!("  no command currently running"),
        }
        eprintln!("backtrace:");
        eprintln!("{}", Backtrace::force_capture());
        eprintln!("{}", "=".repeat(60));
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn config() -> WatchdogConfig {
        WatchdogConfig::default()
    }

    /// Frozen clock timeline: quiet until 240s, one warning between 240s
    /// and 300s, termination at 300s.
    #[test]
    fn assess_follows_the_idle_timeline() {
        let cfg = config();
        assert_eq!(assess(Duration::from_secs(0), false, &cfg), Verdict::Quiet);
        assert_eq!(assess(Duration::from_secs(239), false, &cfg), Verdict::Quiet);
        assert_eq!(assess(Duration::from_secs(240), false, &cfg), Verdict::Warn);
        assert_eq!(
            assess(Duration::from_secs(260), true, &cfg),
            Verdict::AlreadyWarned
        );
        assert_eq!(
            assess(Duration::from_secs(300), true, &cfg),
            Verdict::Terminate
        );
        assert_eq!(
            assess(Duration::from_secs(301), false, &cfg),
            Verdict::Terminate
        );
    }

    /// A line of output resets the countdown: after activity the verdict
    /// drops back to Quiet, which re-arms the warning.
    #[test]
    fn activity_resets_the_warning() {
        let cfg = config();
        assert_eq!(assess(Duration::from_secs(250), false, &cfg), Verdict::Warn);
        // activity happened; idle is small again even though we warned before
        assert_eq!(assess(Duration::from_secs(10), true, &cfg), Verdict::Quiet);
        // silence builds up again: a fresh warning fires
        assert_eq!(assess(Duration::from_secs(245), false, &cfg), Verdict::Warn);
    }

    #[test]
    fn monitor_terminates_a_frozen_clock() {
        let clock = ActivityClock::new();
        let monitor = WatchdogMonitor::new(
            clock,
            ContextSlot::new(),
            WatchdogConfig {
                poll_interval: Duration::from_millis(10),
                warn_after: Duration::from_millis(40),
                kill_after: Duration::from_millis(80),
            },
        );

        let terminated = Arc::new(AtomicBool::new(false));
        let flag = terminated.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            monitor.run(|| flag.store(true, Ordering::SeqCst));
        });
        handle.join().expect("monitor thread");

        assert!(terminated.load(Ordering::SeqCst));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn ticking_clock_keeps_the_monitor_alive() {
        let clock = ActivityClock::new();
        let writer = clock.clone();
        let monitor = WatchdogMonitor::new(
            clock,
            ContextSlot::new(),
            WatchdogConfig {
                poll_interval: Duration::from_millis(10),
                warn_after: Duration::from_millis(60),
                kill_after: Duration::from_millis(120),
            },
        );

        let terminated = Arc::new(AtomicBool::new(false));
        let flag = terminated.clone();
        let handle = thread::spawn(move || {
            monitor.run(|| flag.store(true, Ordering::SeqCst));
        });

        // Keep ticking past several would-be kill windows, then go silent.
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(20));
            writer.tick();
            assert!(!terminated.load(Ordering::SeqCst));
        }
        handle.join().expect("monitor thread");
        assert!(terminated.load(Ordering::SeqCst));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 120), "short");
        let long = "x".repeat(200);
        assert_eq!(truncate(&long, 120).len(), 120);
    }
}
