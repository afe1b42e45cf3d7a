//! Shared liveness state read by the watchdog.
//!
//! Every supervised process ticks the [`ActivityClock`] when it emits an
//! output line; the watchdog polls the clock to detect hung commands. The
//! [`ContextSlot`] carries a snapshot of whatever command is currently
//! running. Both are explicit shared handles passed in at construction,
//! and the context is used only for diagnostics, never for control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Timestamp of the last observed output line, shared between all active
/// supervisors (writers) and the watchdog (reader).
///
/// Stored as milliseconds since clock construction in an atomic, advanced
/// with `fetch_max` so the value is monotonically non-decreasing even with
/// concurrent writers.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    epoch: Instant,
    last_millis: Arc<AtomicU64>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record activity "now". Only ever moves the clock forward.
    pub fn tick(&self) {
        let now = self.elapsed_millis();
        self.last_millis.fetch_max(now, Ordering::SeqCst);
    }

    /// Time elapsed since the last tick (or since construction if never ticked).
    pub fn idle_for(&self) -> Duration {
        let now = self.elapsed_millis();
        let last = self.last_millis.load(Ordering::SeqCst);
        Duration::from_millis(now.saturating_sub(last))
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata describing the command currently being supervised.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Short phase label, e.g. "REBASE" or "TEST".
    pub phase: &'static str,
    /// Display string of the command being run.
    pub command: String,
    /// When the command started.
    pub started: Instant,
    /// Whether an interactive terminal is attached to stdin.
    pub interactive: bool,
}

/// Shared, clearable slot holding the current [`CommandContext`].
///
/// Set when a supervised command begins, cleared when it ends.
#[derive(Debug, Clone, Default)]
pub struct ContextSlot {
    inner: Arc<Mutex<Option<CommandContext>>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, context: CommandContext) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(context);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
    }

    pub fn snapshot(&self) -> Option<CommandContext> {
        self.inner.lock().ok().and_then(|slot| slot.clone())
    }
}
