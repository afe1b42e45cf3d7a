//! Workflow configuration stored in `.gitup.toml` at the repository root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Tunable timeouts (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitupConfig {
    /// Kill a supervised command if no output line arrives for this long.
    pub idle_timeout_secs: u64,

    /// Idle bound for the `./lint` and `./test` scripts.
    pub check_timeout_secs: u64,

    /// Give up on interactive prompts after this long.
    pub prompt_timeout_secs: u64,

    pub watchdog: WatchdogTimers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchdogTimers {
    /// How often the watchdog polls the activity clock.
    pub poll_secs: u64,
    /// Idle time before the one-shot soft warning.
    pub warn_after_secs: u64,
    /// Idle time before the diagnostic dump and forced termination.
    pub kill_after_secs: u64,
}

impl Default for WatchdogTimers {
    fn default() -> Self {
        Self {
            poll_secs: 60,
            warn_after_secs: 4 * 60,
            kill_after_secs: 5 * 60,
        }
    }
}

impl Default for GitupConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            check_timeout_secs: 600,
            prompt_timeout_secs: 300,
            watchdog: WatchdogTimers::default(),
        }
    }
}

impl GitupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(anyhow!("idle_timeout_secs must be > 0"));
        }
        if self.check_timeout_secs == 0 {
            return Err(anyhow!("check_timeout_secs must be > 0"));
        }
        if self.prompt_timeout_secs == 0 {
            return Err(anyhow!("prompt_timeout_secs must be > 0"));
        }
        if self.watchdog.poll_secs == 0 {
            return Err(anyhow!("watchdog.poll_secs must be > 0"));
        }
        if self.watchdog.warn_after_secs >= self.watchdog.kill_after_secs {
            return Err(anyhow!(
                "watchdog.warn_after_secs must be below watchdog.kill_after_secs"
            ));
        }
        Ok(())
    }
}

/// Load config from `<root>/.gitup.toml`.
///
/// If the file is missing, returns `GitupConfig::default()`.
pub fn load_config(root: &Path) -> Result<GitupConfig> {
    let path = root.join(".gitup.toml");
    if !path.exists() {
        let cfg = GitupConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GitupConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(root: &Path, cfg: &GitupConfig) -> Result<()> {
    cfg.validate()?;
    let path = root.join(".gitup.toml");
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
