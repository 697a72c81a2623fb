use super::LaunchError;
use crate::model::{ScriptCommand, ScriptKind, ScriptOutcome};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// A shell script running on its own task, with an awaitable outcome.
pub struct ScriptTask {
    kind: ScriptKind,
    handle: Option<JoinHandle<ScriptOutcome>>,
    outcome: Option<ScriptOutcome>,
}

impl ScriptTask {
    /// Wait for the script to finish. Safe to call again after completion.
    pub async fn wait(&mut self) -> ScriptOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let outcome = match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!(kind = ?self.kind, error = %e, "script task panicked");
                ScriptOutcome::not_run()
            }),
            None => ScriptOutcome::not_run(),
        };
        self.outcome = Some(outcome);
        outcome
    }
}

fn shell_command(cmd: &ScriptCommand, cwd: &Path, inherit_output: bool) -> Command {
    let mut command = Command::new("sh");
    command
        .arg(&cmd.script)
        .args(&cmd.args)
        .current_dir(cwd)
        .stdin(Stdio::null());
    if !inherit_output {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    command
}

fn ensure_readable_script(script: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(script)?;
    if !file.metadata()?.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok(())
}

/// Spawn the workspace selector and return its pid without waiting for it.
/// The child is reaped on a background task that only logs its exit.
pub(crate) fn launch_workspace_selector(
    cmd: &ScriptCommand,
    cwd: &Path,
    inherit_output: bool,
) -> Result<Option<u32>, LaunchError> {
    // `sh` spawns fine even when the script is missing, so check it first.
    ensure_readable_script(&cmd.script).map_err(|source| {
        tracing::error!(command = %cmd.display(), error = %source, "workspace selector is not runnable");
        LaunchError::Spawn {
            kind: ScriptKind::Selector,
            command: cmd.display(),
            source,
        }
    })?;

    let mut child = shell_command(cmd, cwd, inherit_output)
        .spawn()
        .map_err(|source| {
            tracing::error!(
                command = %cmd.display(),
                code = source.raw_os_error().unwrap_or(-1),
                "failed to spawn workspace selector"
            );
            LaunchError::Spawn {
                kind: ScriptKind::Selector,
                command: cmd.display(),
                source,
            }
        })?;

    let pid = child.id();
    tracing::info!(command = %cmd.display(), pid, "workspace selector launched");

    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                let outcome = ScriptOutcome::from_status(status);
                tracing::debug!(pid, outcome = %outcome.describe(), "workspace selector exited");
            }
            Err(e) => tracing::warn!(pid, error = %e, "failed to reap workspace selector"),
        }
    });

    Ok(pid)
}

/// Run a script to completion on a separate task. Success or the exit status is
/// logged there; callers may also await the outcome through the returned task.
pub(crate) fn run_in_background(
    kind: ScriptKind,
    cmd: &ScriptCommand,
    cwd: &Path,
    inherit_output: bool,
    timeout: Option<Duration>,
) -> ScriptTask {
    let mut command = shell_command(cmd, cwd, inherit_output);
    let command_line = cmd.display();

    let handle = tokio::spawn(async move {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    command = %command_line,
                    code = e.raw_os_error().unwrap_or(-1),
                    error = %e,
                    "failed to run {} script",
                    kind.label()
                );
                return ScriptOutcome::not_run();
            }
        };

        let status = match timeout {
            Some(t) => match tokio::time::timeout(t, child.wait()).await {
                Ok(r) => r,
                Err(_) => {
                    tracing::warn!(command = %command_line, timeout = ?t, "script did not finish in time, killing it");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(command = %command_line, error = %e, "failed to kill overrunning script");
                    }
                    return ScriptOutcome::timed_out();
                }
            },
            None => child.wait().await,
        };

        match status {
            Ok(status) => {
                let outcome = ScriptOutcome::from_status(status);
                if outcome.success {
                    tracing::info!(command = %command_line, "{} script finished", kind.label());
                } else {
                    tracing::warn!(
                        command = %command_line,
                        exit_code = ?outcome.exit_code,
                        "{} script failed",
                        kind.label()
                    );
                }
                outcome
            }
            Err(e) => {
                tracing::error!(
                    command = %command_line,
                    error = %e,
                    "failed to wait for {} script",
                    kind.label()
                );
                ScriptOutcome::not_run()
            }
        }
    });

    ScriptTask {
        kind,
        handle: Some(handle),
        outcome: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn script(dir: &Path, name: &str, body: &str) -> ScriptCommand {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        ScriptCommand::new(path, &[])
    }

    #[tokio::test]
    async fn background_script_reports_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = script(dir.path(), "ok.sh", "touch ran\n");

        let mut task = run_in_background(ScriptKind::Start, &cmd, dir.path(), false, None);
        let outcome = task.wait().await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(dir.path().join("ran").exists());
        // Waiting again returns the cached outcome.
        assert_eq!(task.wait().await, outcome);
    }

    #[tokio::test]
    async fn background_script_reports_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = script(dir.path(), "fail.sh", "exit 3\n");

        let mut task = run_in_background(ScriptKind::Stop, &cmd, dir.path(), false, None);
        let outcome = task.wait().await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[tokio::test]
    async fn script_arguments_are_passed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("che.sh");
        fs::write(&path, "echo \"$1\" > last-action\n").unwrap();
        let cmd = ScriptCommand::new(path, &["stop"]);

        let outcome = run_in_background(ScriptKind::Stop, &cmd, dir.path(), false, None)
            .wait()
            .await;

        assert!(outcome.success);
        let action = fs::read_to_string(dir.path().join("last-action")).unwrap();
        assert_eq!(action.trim(), "stop");
    }

    #[tokio::test]
    async fn slow_script_hits_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = script(dir.path(), "slow.sh", "sleep 1\ntouch stopped\n");

        let outcome = run_in_background(
            ScriptKind::Stop,
            &cmd,
            dir.path(),
            false,
            Some(Duration::from_millis(100)),
        )
        .wait()
        .await;

        assert_eq!(outcome, ScriptOutcome::timed_out());
        assert!(outcome.describe().contains("timed out"));

        // The killed shell never reaches the line after the sleep.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("stopped").exists());
    }

    #[tokio::test]
    async fn script_within_timeout_reports_exit_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = script(dir.path(), "quick.sh", "touch stopped\nexit 0\n");

        let outcome = run_in_background(
            ScriptKind::Stop,
            &cmd,
            dir.path(),
            false,
            Some(Duration::from_secs(5)),
        )
        .wait()
        .await;

        assert!(outcome.success);
        assert!(!outcome.timed_out);
        assert!(dir.path().join("stopped").exists());
    }

    #[tokio::test]
    async fn missing_selector_script_is_a_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = ScriptCommand::new(dir.path().join("workspace.sh"), &[]);

        let err = launch_workspace_selector(&cmd, dir.path(), false).unwrap_err();
        match err {
            LaunchError::Spawn { kind, source, .. } => {
                assert_eq!(kind, ScriptKind::Selector);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn selector_directory_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("workspace.sh")).unwrap();
        let cmd = ScriptCommand::new(dir.path().join("workspace.sh"), &[]);

        assert!(matches!(
            launch_workspace_selector(&cmd, dir.path(), false),
            Err(LaunchError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn selector_spawn_fails_for_missing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = script(dir.path(), "workspace.sh", "exit 0\n");
        let missing = dir.path().join("no-such-bin");

        let err = launch_workspace_selector(&cmd, &missing, false).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Spawn {
                kind: ScriptKind::Selector,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn selector_runs_detached() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = script(dir.path(), "workspace.sh", "sleep 1\n");

        let started = std::time::Instant::now();
        let pid = launch_workspace_selector(&cmd, dir.path(), false).unwrap();

        assert!(pid.is_some());
        assert!(started.elapsed() < Duration::from_millis(900));
    }
}
