//! The VM control plane: lifecycle, screenshot and input operations.
//!
//! Stateless between calls. Each operation builds one script, hands it to the
//! [`CommandRunner`], and interprets the result. Reads degrade to sentinel or
//! empty values; mutations return a classified [`ControlError`].

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};

use super::classify::classify;
use super::error::ControlError;
use super::executor::{CommandResult, CommandRunner, PowerShell};
use super::parser::parse_enumeration;
use super::scripts::{self, THUMBNAIL_ERROR_PREFIX, THUMBNAIL_PREFIX};
use super::{ConsoleInput, ControlAction, CreateSpec, VmRecord, validate_name};
use crate::config::HypervisorConfig;

/// First eight bytes of every PNG file.
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Extension of the backing disk created for each VM.
const DISK_EXTENSION: &str = "vhdx";

pub struct ControlPlane {
    runner: Arc<dyn CommandRunner>,
    settings: HypervisorConfig,
}

impl ControlPlane {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: HypervisorConfig) -> Self {
        Self { runner, settings }
    }

    /// Control plane backed by the configured PowerShell.
    pub fn from_config(settings: HypervisorConfig) -> Self {
        let runner = Arc::new(PowerShell::from_config(&settings));
        Self::new(runner, settings)
    }

    pub fn is_supported(&self) -> bool {
        self.runner.is_supported()
    }

    /// Backing disk path for `name`.
    pub fn disk_path(&self, name: &str) -> PathBuf {
        self.settings
            .storage_root
            .join(format!("{name}.{DISK_EXTENSION}"))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Enumerate all VMs.
    ///
    /// Never fails: on an unsupported host the list is empty, and any query
    /// failure yields a single [`VmRecord::enumeration_failed`] record.
    pub async fn list(&self) -> Vec<VmRecord> {
        if !self.is_supported() {
            debug!("Hypervisor not supported on this host; reporting no VMs");
            return Vec::new();
        }

        let result = match self
            .runner
            .run(&scripts::enumerate(), self.settings.command_timeout())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "VM enumeration failed");
                return vec![VmRecord::enumeration_failed(e.to_string())];
            }
        };

        // Any stderr output counts as failure, even with a zero exit code.
        if !result.success() || !result.stderr.trim().is_empty() {
            let diagnostic = failure_text(&result);
            warn!(exit_code = ?result.exit_code, error = %diagnostic, "VM enumeration failed");
            return vec![VmRecord::enumeration_failed(diagnostic)];
        }

        match parse_enumeration(&result.stdout) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "VM enumeration output could not be parsed");
                vec![VmRecord::enumeration_failed(e.to_string())]
            }
        }
    }

    /// Start, force-stop or restart a VM.
    pub async fn control(&self, name: &str, action: ControlAction) -> Result<(), ControlError> {
        let name = validate_name(name)?;
        self.ensure_supported()?;

        info!(vm = %name, action = %action, "Issuing power action");
        self.execute(&scripts::control(name, action)).await
    }

    /// Provision a new VM as described by `spec`.
    ///
    /// Partial failures are not rolled back.
    pub async fn create(&self, spec: &CreateSpec) -> Result<(), ControlError> {
        spec.validate()?;
        self.ensure_supported()?;

        let root = &self.settings.storage_root;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| ControlError::Storage {
                path: root.clone(),
                source,
            })?;

        let name = spec.name.trim();
        let disk = self.disk_path(name);
        info!(
            vm = %name,
            memory_mb = spec.memory_mb,
            cpus = spec.cpu_count,
            disk_gb = spec.disk_gb,
            disk = %disk.display(),
            os = %spec.metadata.os,
            "Creating VM"
        );

        let script = scripts::create(
            spec,
            &disk,
            &self.settings.switch_name,
            self.settings.generation,
        );
        self.execute(&script).await?;

        info!(vm = %name, "VM created");
        Ok(())
    }

    /// Power off and remove a VM, then its backing disk. Deleting a VM that
    /// does not exist succeeds.
    pub async fn delete(&self, name: &str) -> Result<(), ControlError> {
        let name = validate_name(name)?;
        self.ensure_supported()?;

        info!(vm = %name, "Deleting VM");
        self.execute(&scripts::delete(name)).await?;

        let disk = self.disk_path(name);
        match tokio::fs::remove_file(&disk).await {
            Ok(()) => info!(vm = %name, disk = %disk.display(), "Removed backing disk"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(vm = %name, disk = %disk.display(), "No backing disk to remove");
            }
            Err(e) => {
                warn!(vm = %name, disk = %disk.display(), error = %e, "Failed to remove backing disk");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Console
    // -----------------------------------------------------------------------

    /// Capture a thumbnail of the VM's display as base64 PNG.
    ///
    /// `None` when the VM is off, has no video yet, or anything fails.
    pub async fn screenshot(&self, name: &str) -> Option<String> {
        if !self.is_supported() {
            return None;
        }

        let script = scripts::thumbnail(
            name,
            self.settings.thumbnail_width,
            self.settings.thumbnail_height,
        );
        match self
            .runner
            .run(&script, self.settings.screenshot_timeout())
            .await
        {
            Ok(result) if result.success() => decode_thumbnail(name, &result.stdout),
            Ok(result) => {
                debug!(vm = %name, error = %failure_text(&result), "Screenshot command failed");
                None
            }
            Err(e) => {
                debug!(vm = %name, error = %e, "Screenshot command failed");
                None
            }
        }
    }

    /// Inject one input event. Failures are logged, never returned.
    pub async fn send_input(&self, name: &str, input: &ConsoleInput) {
        if !self.is_supported() {
            return;
        }

        let outcome = self
            .runner
            .run(&scripts::input(name, input), self.settings.input_timeout())
            .await;
        match outcome {
            Ok(result) if result.success() => {
                debug!(vm = %name, input = ?input, "Input delivered");
            }
            Ok(result) => {
                warn!(vm = %name, input = ?input, error = %failure_text(&result), "Input injection failed");
            }
            Err(e) => {
                warn!(vm = %name, input = ?input, error = %e, "Input injection failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_supported(&self) -> Result<(), ControlError> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(ControlError::NotSupported)
        }
    }

    /// Run a mutating script; a non-zero exit becomes a classified error.
    async fn execute(&self, script: &str) -> Result<(), ControlError> {
        let result = self
            .runner
            .run(script, self.settings.command_timeout())
            .await?;
        if result.success() {
            return Ok(());
        }

        let diagnostic = failure_text(&result);
        let err = classify(&diagnostic);
        warn!(exit_code = ?result.exit_code, kind = ?err.kind(), error = %diagnostic, "Hypervisor command failed");
        Err(err)
    }
}

/// Diagnostic for a failed command, never empty.
fn failure_text(result: &CommandResult) -> String {
    let diagnostic = result.diagnostic();
    if diagnostic.is_empty() {
        match result.exit_code {
            Some(code) => format!("hypervisor command exited with code {code}"),
            None => "hypervisor command was terminated".to_string(),
        }
    } else {
        diagnostic.to_string()
    }
}

/// Extract the PNG payload from thumbnail script output.
fn decode_thumbnail(name: &str, stdout: &str) -> Option<String> {
    for line in stdout.lines().map(str::trim) {
        if let Some(message) = line.strip_prefix(THUMBNAIL_ERROR_PREFIX) {
            warn!(vm = %name, error = %message.trim(), "Thumbnail request failed");
            return None;
        }
        if let Some(payload) = line.strip_prefix(THUMBNAIL_PREFIX) {
            let payload = payload.trim();
            return match STANDARD.decode(payload) {
                Ok(bytes) if bytes.starts_with(&PNG_SIGNATURE) => Some(payload.to_string()),
                Ok(_) => {
                    warn!(vm = %name, "Thumbnail payload is not a PNG");
                    None
                }
                Err(e) => {
                    warn!(vm = %name, error = %e, "Thumbnail payload is not valid base64");
                    None
                }
            };
        }
    }
    None
}
