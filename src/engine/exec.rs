//! Bounded shell action execution.
//!
//! Every external process the controller spawns (restart procedures,
//! dependency checks and fixes, AI-generated fragments) goes through
//! here. A non-zero exit or a timeout is a report, never an `Err`:
//! failed remediation is an outcome the caller records, not an error
//! that can crash the orchestrator.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Captured output is capped to prevent a chatty child from ballooning
/// the attempt log (100KB, matching the stderr cap on executions).
const MAX_CAPTURE_BYTES: usize = 100 * 1024;

/// What happened when an action ran.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ActionReport {
    fn spawn_failure(error: String, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: error,
            timed_out: false,
            duration,
        }
    }

    /// One-line summary for execution_details and tracing.
    pub fn summary(&self) -> String {
        if self.timed_out {
            return format!("timed out after {:.1}s", self.duration.as_secs_f64());
        }
        match self.exit_code {
            Some(0) => "exit status 0".into(),
            Some(code) => {
                let stderr_tail = tail(&self.stderr, 200);
                if stderr_tail.is_empty() {
                    format!("exit status {code}")
                } else {
                    format!("exit status {code}: {stderr_tail}")
                }
            }
            None => format!("terminated by signal: {}", tail(&self.stderr, 200)),
        }
    }
}

/// Run a shell action with a hard timeout, inheriting the parent
/// environment. A timed-out child is killed, never left running.
pub async fn run_action(action: &str, timeout: Duration, workdir: Option<&Path>) -> ActionReport {
    let mut cmd = shell_command(action);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    run_command(cmd, timeout).await
}

/// Run a staged script under an interpreter with a scrubbed environment:
/// fresh working directory, minimal PATH, no inherited secrets. Used for
/// AI-generated fragments, which are untrusted input.
pub async fn run_isolated(
    interpreter: &Path,
    script: &Path,
    timeout: Duration,
    workdir: &Path,
) -> ActionReport {
    let mut cmd = Command::new(interpreter);
    cmd.arg(script)
        .current_dir(workdir)
        .env_clear()
        .env("PATH", "/usr/local/bin:/usr/bin:/bin")
        .env("HOME", workdir)
        .env("LANG", "C.UTF-8");
    run_command(cmd, timeout).await
}

fn shell_command(action: &str) -> Command {
    #[cfg(windows)]
    {
        #[allow(unused_imports)]
        use std::os::windows::process::CommandExt;
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(action);
        // CREATE_NO_WINDOW
        cmd.creation_flags(0x08000000);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(action);
        cmd
    }
}

async fn run_command(mut cmd: Command, timeout: Duration) -> ActionReport {
    let start = Instant::now();

    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        // Dropping the wait future on timeout must not leak the child
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ActionReport::spawn_failure(
                format!("failed to spawn: {e}"),
                start.elapsed(),
            );
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => ActionReport {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: capped_lossy(&output.stdout),
            stderr: capped_lossy(&output.stderr),
            timed_out: false,
            duration: start.elapsed(),
        },
        Ok(Err(e)) => ActionReport::spawn_failure(
            format!("failed to collect output: {e}"),
            start.elapsed(),
        ),
        Err(_) => ActionReport {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            duration: start.elapsed(),
        },
    }
}

fn capped_lossy(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_CAPTURE_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut s = String::from_utf8_lossy(&bytes[..MAX_CAPTURE_BYTES]).into_owned();
    s.push_str("\n... [output truncated at 100KB]");
    s
}

fn tail(s: &str, max: usize) -> &str {
    let trimmed = s.trim();
    if trimmed.len() <= max {
        return trimmed;
    }
    let mut start = trimmed.len() - max;
    while start < trimmed.len() && !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(unix)]
    async fn test_successful_action() {
        let report = run_action("exit 0", Duration::from_secs(5), None).await;
        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));
        assert!(!report.timed_out);
        assert_eq!(report.summary(), "exit status 0");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_failing_action_is_report_not_error() {
        let report = run_action("echo broken >&2; exit 3", Duration::from_secs(5), None).await;
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
        assert!(report.stderr.contains("broken"));
        assert!(report.summary().contains("exit status 3"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_timeout_kills_child() {
        let report = run_action("sleep 30", Duration::from_millis(200), None).await;
        assert!(!report.success);
        assert!(report.timed_out);
        assert!(report.duration < Duration::from_secs(5));
        assert!(report.summary().starts_with("timed out"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_isolated_env_is_scrubbed() {
        std::env::set_var("CUSTODIAN_TEST_SECRET", "leak-me");
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("probe.sh");
        std::fs::write(&script, "test -z \"$CUSTODIAN_TEST_SECRET\"\n").unwrap();

        let report = run_isolated(
            Path::new("/bin/sh"),
            &script,
            Duration::from_secs(5),
            dir.path(),
        )
        .await;
        assert!(report.success, "secret leaked into isolated env: {:?}", report);
        std::env::remove_var("CUSTODIAN_TEST_SECRET");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_folded() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_isolated(
            Path::new("/nonexistent/interpreter"),
            Path::new("script"),
            Duration::from_secs(1),
            dir.path(),
        )
        .await;
        assert!(!report.success);
        assert!(report.stderr.contains("failed to spawn"));
    }
}
