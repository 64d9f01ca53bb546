//! Hypervisor command execution.
//!
//! Every operation runs as one short-lived PowerShell child process. The
//! script is passed as `-EncodedCommand` (base64 of UTF-16LE), so nothing is
//! written to disk and no quoting survives into the command line.
//!
//! ```text
//! ControlPlane ──► dyn CommandRunner::run(script, timeout)
//!                      └─► PowerShell: tokio::process::Command
//!                              ├─► kill_on_drop(true)
//!                              └─► tokio::time::timeout(wait_with_output)
//! ```
//!
//! The trait seam lets tests substitute an in-memory hypervisor.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::ControlError;
use crate::config::HypervisorConfig;

/// Prepended to every script. Progress records otherwise leak into stderr as
/// CLIXML and get misread as failures. Redirected output defaults to the OEM
/// code page, so both streams are switched to UTF-8 before anything prints.
const SCRIPT_PRELUDE: &str = "$ProgressPreference = 'SilentlyContinue'\n\
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8\n\
$OutputEncoding = [System.Text.Encoding]::UTF8\n";

/// Outcome of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The text to classify on failure: stderr when present, else stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs management scripts against the hypervisor.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Whether this host can run management commands at all.
    fn is_supported(&self) -> bool;

    /// Run `script` to completion, or fail with [`ControlError::Timeout`]
    /// once `timeout` elapses. A non-zero exit is not an error at this layer.
    async fn run(&self, script: &str, timeout: Duration) -> Result<CommandResult, ControlError>;
}

// ---------------------------------------------------------------------------
// PowerShell runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
    supported: bool,
}

impl PowerShell {
    /// Runner for `program`, supported only when compiled for Windows.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            supported: cfg!(target_os = "windows"),
        }
    }

    pub fn from_config(config: &HypervisorConfig) -> Self {
        Self {
            program: config.program.clone(),
            supported: config.supported.unwrap_or(cfg!(target_os = "windows")),
        }
    }
}

/// Encode a script for `-EncodedCommand`: base64 over UTF-16LE code units.
pub fn encode_command(script: &str) -> String {
    let full = format!("{SCRIPT_PRELUDE}{script}");
    let bytes: Vec<u8> = full.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// Arguments for a non-interactive, profile-free invocation of `script`.
pub fn command_args(script: &str) -> Vec<String> {
    [
        "-NoLogo",
        "-NoProfile",
        "-NonInteractive",
        "-ExecutionPolicy",
        "Bypass",
        "-OutputFormat",
        "Text",
        "-EncodedCommand",
    ]
    .into_iter()
    .map(String::from)
    .chain(std::iter::once(encode_command(script)))
    .collect()
}

#[async_trait]
impl CommandRunner for PowerShell {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn run(&self, script: &str, timeout: Duration) -> Result<CommandResult, ControlError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(command_args(script))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW: no console flash when running as a service.
            cmd.creation_flags(0x0800_0000);
        }

        run_command(cmd, &self.program, timeout).await
    }
}

/// Spawn `cmd` and collect its output, killing it once `timeout` elapses.
async fn run_command(
    mut cmd: Command,
    label: &str,
    timeout: Duration,
) -> Result<CommandResult, ControlError> {
    let child = cmd.spawn().map_err(|e| {
        warn!(program = %label, error = %e, "Failed to spawn hypervisor shell");
        ControlError::HypervisorError(format!("failed to launch {label}: {e}"))
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ControlError::HypervisorError(format!(
                "failed to collect output from {label}: {e}"
            )));
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Hypervisor command timed out");
            return Err(ControlError::Timeout(timeout));
        }
    };

    let result = CommandResult {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(
        exit_code = ?result.exit_code,
        stdout_len = result.stdout.len(),
        stderr_len = result.stderr.len(),
        "Hypervisor command finished"
    );

    Ok(result)
}
