//! Application directory structure for vmdeck.
//!
//! Provides a single `VmdeckPaths` struct that resolves all standard
//! directories and ensures they exist on first launch:
//!
//! - Config:    `%APPDATA%\vmdeck\` or `~/.config/vmdeck/`
//! - Data:      `%LOCALAPPDATA%\vmdeck\` or `~/.local/share/vmdeck/`
//! - VM disks:  `<data>/vms/`
//! - Logs:      `<data>/logs/`

use std::path::PathBuf;
use tracing::info;

const APP_NAME: &str = "vmdeck";
const CONFIG_FILE: &str = "vmdeck.toml";

/// All resolved application directory paths.
#[derive(Debug, Clone)]
pub struct VmdeckPaths {
    /// Human-editable config directory
    pub config: PathBuf,
    /// Machine-managed application data root
    pub data: PathBuf,
    /// Default storage root for VM disk images
    pub vms: PathBuf,
    /// Application logs
    pub logs: PathBuf,
}

impl VmdeckPaths {
    /// Resolve all paths from the environment.
    /// Does not create any directories; call `ensure()` for that.
    pub fn resolve() -> Option<Self> {
        let config = resolve_config_dir()?;
        let data = resolve_data_dir()?;

        Some(Self {
            config,
            vms: data.join("vms"),
            logs: data.join("logs"),
            data,
        })
    }

    /// Create all directories that don't already exist.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.config, &self.data, &self.vms, &self.logs] {
            std::fs::create_dir_all(dir)?;
            info!("ensured directory: {}", dir.display());
        }
        Ok(())
    }

    /// Default location of the TOML config file.
    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILE)
    }
}

/// Storage root used when the config does not name one.
///
/// Falls back to `data/vms` under the working directory when no home or
/// profile directory can be found.
pub fn default_storage_root() -> PathBuf {
    VmdeckPaths::resolve()
        .map(|paths| paths.vms)
        .unwrap_or_else(|| PathBuf::from("data").join("vms"))
}

// ---------------------------------------------------------------------------
// Platform-specific path resolution
// ---------------------------------------------------------------------------

#[cfg(target_os = "windows")]
fn resolve_config_dir() -> Option<PathBuf> {
    env_dir("APPDATA").map(|p| p.join(APP_NAME))
}

#[cfg(not(target_os = "windows"))]
fn resolve_config_dir() -> Option<PathBuf> {
    if let Some(xdg) = env_dir("XDG_CONFIG_HOME") {
        return Some(xdg.join(APP_NAME));
    }
    env_dir("HOME").map(|home| home.join(".config").join(APP_NAME))
}

#[cfg(target_os = "windows")]
fn resolve_data_dir() -> Option<PathBuf> {
    env_dir("LOCALAPPDATA").map(|p| p.join(APP_NAME))
}

#[cfg(not(target_os = "windows"))]
fn resolve_data_dir() -> Option<PathBuf> {
    if let Some(xdg) = env_dir("XDG_DATA_HOME") {
        return Some(xdg.join(APP_NAME));
    }
    env_dir("HOME").map(|home| home.join(".local").join("share").join(APP_NAME))
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
