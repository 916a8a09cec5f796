use crate::backend::VcsError;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Runs `command` to completion. The child is killed when `deadline` elapses
/// or `cancel` fires.
pub async fn run_command(
    mut command: Command,
    label: &str,
    deadline: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput, VcsError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = command.spawn().map_err(|err| VcsError::CommandFailed {
        command: label.to_string(),
        reason: err.to_string(),
    })?;

    let started = Instant::now();
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);
    let expired = async {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    // Dropping the in-flight `wait_with_output` drops the child, which kills it.
    let output = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(VcsError::Cancelled),
        () = expired => {
            return Err(VcsError::Timeout {
                command: label.to_string(),
            });
        }
        output = child.wait_with_output() => output.map_err(|err| VcsError::CommandFailed {
            command: label.to_string(),
            reason: err.to_string(),
        })?,
    };

    tracing::debug!(
        command = label,
        code = ?output.status.code(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "command finished"
    );
    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
