//! VM management module for vmdeck.
//!
//! Translates lifecycle and console operations into Hyper-V management
//! commands. Every call re-derives state from the hypervisor; nothing here
//! caches VM state between calls.
//!
//! ```text
//! ControlPlane
//!     ├─► scripts     (PowerShell text for each operation)
//!     ├─► executor    (one child process per command, with timeout)
//!     ├─► parser      (enumeration JSON → VmRecord)
//!     └─► classify    (stderr text → ControlError)
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod classify;
pub mod control_plane;
pub mod error;
pub mod executor;
pub mod parser;
pub mod scripts;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// Address reported when no IPv4 literal could be resolved for a VM.
pub const ADDRESS_UNAVAILABLE: &str = "unavailable";

/// Guest OS tag assumed for records created before tagging existed.
pub const DEFAULT_OS_TAG: &str = "windows";

/// Name carried by the placeholder record returned when enumeration fails.
pub const ENUMERATION_FAILED_NAME: &str = "ENUMERATION FAILED";

/// Outward power state. Every hypervisor state code collapses to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
}

/// Guest OS tag and ephemeral credential stored alongside a VM.
///
/// Persisted in the VM's notes field as `tag|credential`. The credential is
/// transient: it exists so an operator can hand out first-login details and
/// may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestMetadata {
    pub os: String,
    #[serde(rename = "tempPass")]
    pub temp_pass: String,
}

impl GuestMetadata {
    pub fn new(os: impl Into<String>, temp_pass: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            temp_pass: temp_pass.into(),
        }
    }

    /// Split a packed notes field on its first `|`.
    ///
    /// An empty tag falls back to [`DEFAULT_OS_TAG`].
    pub fn decode(notes: &str) -> Self {
        let (tag, credential) = notes.split_once('|').unwrap_or((notes, ""));
        let tag = tag.trim();
        Self {
            os: if tag.is_empty() {
                DEFAULT_OS_TAG.to_string()
            } else {
                tag.to_string()
            },
            temp_pass: credential.trim_end_matches(['\r', '\n']).to_string(),
        }
    }

    /// Pack into the notes representation understood by [`GuestMetadata::decode`].
    pub fn encode(&self) -> String {
        format!("{}|{}", self.os.trim(), self.temp_pass)
    }
}

/// One VM as observed at enumeration time.
///
/// Serializes to the shape the admin and user panels already consume:
/// `{"name","status","uptime","memory","ip","os","tempPass"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub name: String,
    #[serde(rename = "status")]
    pub state: PowerState,
    /// Time since last start; zero while stopped.
    #[serde(with = "uptime_secs")]
    pub uptime: Duration,
    #[serde(rename = "memory")]
    pub memory_mb: u64,
    /// First IPv4 address, or [`ADDRESS_UNAVAILABLE`].
    #[serde(rename = "ip")]
    pub address: String,
    #[serde(flatten)]
    pub metadata: GuestMetadata,
    /// Set only on the enumeration-failure placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VmRecord {
    /// Placeholder returned in place of the VM list when the hypervisor could
    /// not be queried, so callers can tell "no VMs" from "query failed".
    pub fn enumeration_failed(message: impl Into<String>) -> Self {
        Self {
            name: ENUMERATION_FAILED_NAME.to_string(),
            state: PowerState::Stopped,
            uptime: Duration::ZERO,
            memory_mb: 0,
            address: ADDRESS_UNAVAILABLE.to_string(),
            metadata: GuestMetadata::decode(""),
            error: Some(message.into()),
        }
    }

    pub fn is_enumeration_failure(&self) -> bool {
        self.error.is_some()
    }
}

mod uptime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(uptime: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(uptime.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}

/// Imperative power actions accepted by [`control_plane::ControlPlane::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    /// Forceful power-off. There is no graceful in-guest shutdown path.
    Stop,
    Restart,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = error::ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "restart" => Ok(ControlAction::Restart),
            other => Err(error::ControlError::InvalidSpec(format!(
                "unknown action `{other}` (expected start, stop or restart)"
            ))),
        }
    }
}

/// Everything needed to provision a new VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpec {
    pub name: String,
    pub memory_mb: u64,
    pub cpu_count: u32,
    pub disk_gb: u64,
    /// ISO attached as a DVD drive and made the first boot device.
    #[serde(default)]
    pub install_media: Option<PathBuf>,
    #[serde(flatten)]
    pub metadata: GuestMetadata,
}

impl CreateSpec {
    /// Reject specs the hypervisor would choke on before anything is submitted.
    pub fn validate(&self) -> Result<(), error::ControlError> {
        validate_name(&self.name)?;
        if self.memory_mb == 0 {
            return Err(error::ControlError::InvalidSpec(
                "memory must be greater than zero".to_string(),
            ));
        }
        if self.cpu_count == 0 {
            return Err(error::ControlError::InvalidSpec(
                "vCPU count must be greater than zero".to_string(),
            ));
        }
        if self.disk_gb == 0 {
            return Err(error::ControlError::InvalidSpec(
                "disk size must be greater than zero".to_string(),
            ));
        }
        if self.metadata.os.contains('|') {
            return Err(error::ControlError::InvalidSpec(
                "OS tag must not contain `|`".to_string(),
            ));
        }
        Ok(())
    }
}

/// Characters that cannot appear in a VM name because the name doubles as the
/// backing disk's file name.
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Check a VM name and return it trimmed.
pub fn validate_name(name: &str) -> Result<&str, error::ControlError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(error::ControlError::InvalidSpec(
            "VM name must not be empty".to_string(),
        ));
    }
    if trimmed.contains(FORBIDDEN_NAME_CHARS) || trimmed == "." || trimmed == ".." {
        return Err(error::ControlError::InvalidSpec(format!(
            "VM name `{trimmed}` contains characters not allowed in a file name"
        )));
    }
    Ok(trimmed)
}

/// Mouse buttons the console can click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
}

/// One input event injected into a VM's console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    /// A single virtual key code.
    Key { key_code: u32 },
    /// Absolute pointer position in the normalized 0..=65535 range on both
    /// axes (not display pixels), with an optional click at that position.
    Mouse {
        x: u16,
        y: u16,
        click: Option<MouseButton>,
    },
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use classify::classify;
pub use control_plane::ControlPlane;
pub use error::{ControlError, ErrorKind};
pub use executor::{CommandResult, CommandRunner, PowerShell};
pub use parser::parse_enumeration;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_splits_on_first_delimiter_only() {
        let meta = GuestMetadata::decode("linux|pa|ss");
        assert_eq!(meta.os, "linux");
        assert_eq!(meta.temp_pass, "pa|ss");
    }

    #[test]
    fn metadata_empty_tag_defaults_to_windows() {
        assert_eq!(GuestMetadata::decode("").os, "windows");
        assert_eq!(GuestMetadata::decode("|secret").os, "windows");
        assert_eq!(GuestMetadata::decode("|secret").temp_pass, "secret");
    }

    #[test]
    fn metadata_encode_then_decode_preserves_fields() {
        let meta = GuestMetadata::new("linux", "abc123");
        assert_eq!(meta.encode(), "linux|abc123");
        assert_eq!(GuestMetadata::decode(&meta.encode()), meta);
    }

    #[test]
    fn record_serializes_to_panel_shape() {
        let record = VmRecord {
            name: "vm1".to_string(),
            state: PowerState::Running,
            uptime: Duration::from_secs(90),
            memory_mb: 2048,
            address: "10.0.0.4".to_string(),
            metadata: GuestMetadata::new("linux", "abc123"),
            error: None,
        };

        let json = serde_json::to_value(&record).expect("serialize");

        assert_eq!(json["name"], "vm1");
        assert_eq!(json["status"], "running");
        assert_eq!(json["uptime"], 90.0);
        assert_eq!(json["memory"], 2048);
        assert_eq!(json["ip"], "10.0.0.4");
        assert_eq!(json["os"], "linux");
        assert_eq!(json["tempPass"], "abc123");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn enumeration_failure_record_is_distinguishable() {
        let record = VmRecord::enumeration_failed("access denied");
        assert!(record.is_enumeration_failure());
        assert_eq!(record.state, PowerState::Stopped);
        assert_eq!(record.error.as_deref(), Some("access denied"));
    }

    #[test]
    fn control_action_parses_case_insensitively() {
        assert_eq!("START".parse::<ControlAction>().unwrap(), ControlAction::Start);
        assert_eq!(" stop ".parse::<ControlAction>().unwrap(), ControlAction::Stop);
        assert!("pause".parse::<ControlAction>().is_err());
    }

    fn spec() -> CreateSpec {
        CreateSpec {
            name: "vm1".to_string(),
            memory_mb: 2048,
            cpu_count: 2,
            disk_gb: 40,
            install_media: None,
            metadata: GuestMetadata::new("linux", "abc123"),
        }
    }

    #[test]
    fn create_spec_accepts_positive_resources() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn create_spec_rejects_zero_resources_and_blank_names() {
        let mut s = spec();
        s.memory_mb = 0;
        assert!(s.validate().is_err());

        let mut s = spec();
        s.cpu_count = 0;
        assert!(s.validate().is_err());

        let mut s = spec();
        s.disk_gb = 0;
        assert!(s.validate().is_err());

        let mut s = spec();
        s.name = "   ".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn names_that_escape_the_storage_root_are_rejected() {
        assert!(validate_name("../evil").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("..").is_err());
        assert_eq!(validate_name("  build-01 ").unwrap(), "build-01");
    }

    #[test]
    fn create_spec_deserializes_from_panel_json() {
        let json = r#"{"name":"vm1","memoryMb":1024,"cpuCount":1,"diskGb":20,"os":"linux","tempPass":"x"}"#;
        let spec: CreateSpec = serde_json::from_str(json).expect("deserialize");
        assert_eq!(spec.metadata.os, "linux");
        assert_eq!(spec.metadata.temp_pass, "x");
        assert!(spec.install_media.is_none());
    }
}
