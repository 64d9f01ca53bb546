//! Runtime configuration for vmdeck.
//!
//! All tunables are gathered into a single `Config` struct that round-trips
//! through TOML. Every section and field has a default, so a partial file (or
//! no file at all) is valid.
//!
//! ```toml
//! [hypervisor]
//! command_timeout_secs = 120
//! storage_root = 'D:\vms'
//!
//! [console]
//! tick_interval_ms = 1000
//!
//! [server]
//! bind = "0.0.0.0:3001"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::paths;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub hypervisor: HypervisorConfig,
    pub console: ConsoleConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Shell used to run management scripts.
    pub program: String,
    /// Overrides host detection. Unset means "supported on Windows only".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported: Option<bool>,
    /// Bound for list, control, create and delete.
    pub command_timeout_secs: u64,
    pub screenshot_timeout_secs: u64,
    pub input_timeout_secs: u64,
    /// Directory holding `<name>.vhdx` disks.
    pub storage_root: PathBuf,
    /// Virtual switch new VMs are connected to.
    pub switch_name: String,
    pub generation: u8,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Cadence of status lines and screenshot polling.
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            program: "powershell.exe".to_string(),
            supported: None,
            command_timeout_secs: 120,
            screenshot_timeout_secs: 15,
            input_timeout_secs: 10,
            storage_root: paths::default_storage_root(),
            switch_name: "Default Switch".to_string(),
            generation: 2,
            thumbnail_width: 800,
            thumbnail_height: 600,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3001".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl HypervisorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn screenshot_timeout(&self) -> Duration {
        Duration::from_secs(self.screenshot_timeout_secs)
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.input_timeout_secs)
    }
}

impl ConsoleConfig {
    /// Tick cadence, never zero (a zero-period interval panics).
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl Config {
    /// Serialize to a pretty-printed TOML string.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Deserialize from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.hypervisor.program, "powershell.exe");
        assert_eq!(c.hypervisor.command_timeout(), Duration::from_secs(120));
        assert_eq!(c.hypervisor.screenshot_timeout(), Duration::from_secs(15));
        assert_eq!(c.hypervisor.input_timeout(), Duration::from_secs(10));
        assert_eq!(c.hypervisor.switch_name, "Default Switch");
        assert_eq!(c.hypervisor.generation, 2);
        assert_eq!((c.hypervisor.thumbnail_width, c.hypervisor.thumbnail_height), (800, 600));
        assert_eq!(c.console.tick_interval(), Duration::from_secs(1));
        assert_eq!(c.server.bind, "127.0.0.1:3001");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c = Config::from_toml(
            r#"
            [hypervisor]
            command_timeout_secs = 30
            supported = true

            [console]
            tick_interval_ms = 250
            "#,
        )
        .expect("parse");

        assert_eq!(c.hypervisor.command_timeout_secs, 30);
        assert_eq!(c.hypervisor.supported, Some(true));
        assert_eq!(c.hypervisor.screenshot_timeout_secs, 15);
        assert_eq!(c.console.tick_interval(), Duration::from_millis(250));
        assert_eq!(c.server, ServerConfig::default());
    }

    #[test]
    fn toml_output_parses_back() {
        let mut c = Config::default();
        c.hypervisor.storage_root = PathBuf::from("/srv/vms");
        c.server.bind = "0.0.0.0:9000".to_string();

        let parsed = Config::from_toml(&c.to_toml()).expect("parse");
        assert_eq!(parsed, c);
    }

    #[test]
    fn zero_tick_is_clamped() {
        let c = ConsoleConfig { tick_interval_ms: 0 };
        assert_eq!(c.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = Config::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(c, Config::default());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vmdeck.toml");
        std::fs::write(&path, "[console]\ntick_interval_ms = \"fast\"\n").expect("write");
        let err = Config::load(&path).expect_err("must fail");
        assert!(err.to_string().contains("vmdeck.toml"));
    }
}
