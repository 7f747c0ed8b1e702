//! External command execution.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{ConvertError, ConvertResult};

/// Build `sh -c <command_line>` started from `working_dir`.
#[must_use]
pub fn shell(command_line: &str, working_dir: &Path) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line).current_dir(working_dir);
    command
}

/// Run `command` to completion, capturing stdout and stderr.
///
/// The child is killed if the returned future is dropped, so an abandoned request
/// never leaves a converter running. `label` is the command line reported in errors.
///
/// # Errors
///
/// Returns [`ConvertError::Spawn`] when the process cannot be started and
/// [`ConvertError::CommandFailed`] when it exits unsuccessfully.
pub async fn run(mut command: Command, label: &str) -> ConvertResult<String> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ConvertError::Spawn {
            command: label.to_string(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        Err(ConvertError::CommandFailed {
            command: label.to_string(),
            status: output.status.code(),
            output: combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_both_streams() -> anyhow::Result<()> {
        let dir = std::env::temp_dir();
        let output = run(shell("printf out; printf err >&2", &dir), "printf").await?;
        assert_eq!(output, "outerr");
        Ok(())
    }

    #[tokio::test]
    async fn run_reports_exit_status_and_output() {
        let dir = std::env::temp_dir();
        let result = run(shell("echo broken; exit 3", &dir), "exit 3").await;
        assert!(matches!(
            result,
            Err(ConvertError::CommandFailed {
                status: Some(3),
                ref output,
                ..
            }) if output.trim() == "broken"
        ));
    }

    #[tokio::test]
    async fn run_reports_missing_programs() {
        let result = run(Command::new("/nonexistent/converter"), "converter").await;
        assert!(matches!(result, Err(ConvertError::Spawn { .. })));
    }

    #[tokio::test]
    async fn shell_runs_from_working_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("marker"), b"")?;
        let output = run(shell("ls", dir.path()), "ls").await?;
        assert_eq!(output.trim(), "marker");
        Ok(())
    }
}
