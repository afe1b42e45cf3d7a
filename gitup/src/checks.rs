//! Project lint/test scripts run through the supervisor.
//!
//! Repositories opt in by carrying executable `./lint` and `./test`
//! scripts at the root. They stream like any other supervised command, so
//! their output ticks the activity clock and a hung check is killed.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::io::process::{RunRequest, Supervisor};

/// Outcome of one optional project script.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub script: String,
    pub exit_code: i32,
    pub passed: bool,
}

/// Run `./<script>` if it exists. `Ok(None)` when the script is absent.
pub fn run_script(
    supervisor: &Supervisor,
    root: &Path,
    script: &str,
    phase: &'static str,
    verbose: bool,
    timeout: Duration,
) -> Result<Option<CheckOutcome>> {
    let path = root.join(script);
    if !path.exists() {
        debug!(script, "script not present, skipping");
        return Ok(None);
    }

    println!("Running: ./{script}");
    let mut argv = vec!["bash".to_string(), format!("./{script}")];
    if verbose {
        argv.push("--verbose".to_string());
    }
    let mut request = RunRequest::new(argv, phase);
    request.cwd = Some(root.to_path_buf());
    request.capture = true;

    let result = supervisor.run_with_timeout(&request, timeout)?;
    debug!(script, exit_code = result.exit_code, "script finished");
    Ok(Some(CheckOutcome {
        script: script.to_string(),
        exit_code: result.exit_code,
        passed: result.success(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityClock, ContextSlot};
    use crate::cancel::CancelToken;
    use std::fs;

    fn supervisor() -> Supervisor {
        Supervisor::new(
            ActivityClock::new(),
            ContextSlot::new(),
            CancelToken::new(),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn absent_script_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = run_script(
            &supervisor(),
            temp.path(),
            "lint",
            "LINT",
            false,
            Duration::from_secs(30),
        )
        .expect("run");
        assert!(outcome.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn passing_script_reports_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("lint"), "#!/bin/bash\necho lint ok\n").expect("write");
        let outcome = run_script(
            &supervisor(),
            temp.path(),
            "lint",
            "LINT",
            false,
            Duration::from_secs(30),
        )
        .expect("run")
        .expect("present");
        assert!(outcome.passed);
        assert_eq!(outcome.exit_code, 0);
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_reports_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("test"), "#!/bin/bash\nexit 2\n").expect("write");
        let outcome = run_script(
            &supervisor(),
            temp.path(),
            "test",
            "TEST",
            false,
            Duration::from_secs(30),
        )
        .expect("run")
        .expect("present");
        assert!(!outcome.passed);
        assert_eq!(outcome.exit_code, 2);
    }
}
