//! External tool execution for command-backed probes
//!
//! Vendor tools (`nvidia-smi`, `vcgencmd`, PowerShell) are run without a shell,
//! with piped output and a hard timeout. A timeout or non-zero exit is an error.

use anyhow::{anyhow, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Default time budget for one probe command
pub(crate) const PROBE_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Run `program args...` and return its stdout
pub(crate) async fn run_probe_command(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    debug!("Running probe command: {} {:?} (timeout: {:?})", program, args, timeout);

    let output = tokio::time::timeout(
        timeout,
        AsyncCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .with_context(|| format!("{} timed out", program))?
    .with_context(|| format!("Failed to execute {}", program))?;

    if !output.status.success() {
        return Err(anyhow!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_output() {
        let output = run_probe_command("echo", &["42"], PROBE_COMMAND_TIMEOUT).await.unwrap();
        assert_eq!(output.trim(), "42");
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let result = run_probe_command("ledpanel-no-such-tool", &[], PROBE_COMMAND_TIMEOUT).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let result = run_probe_command("false", &[], PROBE_COMMAND_TIMEOUT).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let result = run_probe_command("sleep", &["10"], Duration::from_millis(200)).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
