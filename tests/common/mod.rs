//! In-memory Hyper-V stand-in for integration tests.
//!
//! `FakeHyperV` implements `CommandRunner` by recognising the cmdlets in each
//! script and applying them to a small VM table, so control-plane and console
//! tests exercise the real script builders and parsers end to end.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use vmdeck::config::HypervisorConfig;
use vmdeck::vm::{CommandResult, CommandRunner, ControlError, ControlPlane};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// A tiny payload that passes PNG signature validation.
pub fn fake_png() -> String {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(b"\0\0\0\rIHDR");
    STANDARD.encode(bytes)
}

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub name: String,
    /// Hyper-V state code: 2 running, 3 off.
    pub state: i64,
    pub memory_mb: u64,
    pub notes: String,
    pub addresses: Vec<String>,
}

#[derive(Default)]
struct Inner {
    vms: Vec<FakeVm>,
    scripts: Vec<String>,
    overrides: VecDeque<Result<CommandResult, ControlError>>,
}

pub struct FakeHyperV {
    supported: bool,
    inner: Mutex<Inner>,
}

impl FakeHyperV {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            supported: true,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            supported: false,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn add_vm(&self, name: &str, state: i64, notes: &str) {
        self.inner.lock().unwrap().vms.push(FakeVm {
            name: name.to_string(),
            state,
            memory_mb: 1024,
            notes: notes.to_string(),
            addresses: vec!["fe80::1".to_string(), "10.0.0.7".to_string()],
        });
    }

    pub fn vm(&self, name: &str) -> Option<FakeVm> {
        self.inner
            .lock()
            .unwrap()
            .vms
            .iter()
            .find(|vm| vm.name == name)
            .cloned()
    }

    /// Make the next command return `result` instead of being simulated.
    pub fn push_override(&self, result: Result<CommandResult, ControlError>) {
        self.inner.lock().unwrap().overrides.push_back(result);
    }

    pub fn scripts(&self) -> Vec<String> {
        self.inner.lock().unwrap().scripts.clone()
    }

    /// Scripts that injected keyboard or mouse input, in order.
    pub fn input_scripts(&self) -> Vec<String> {
        self.scripts()
            .into_iter()
            .filter(|s| s.contains("Msvm_Keyboard") || s.contains("Msvm_SyntheticMouse"))
            .collect()
    }

    pub fn screenshot_requests(&self) -> usize {
        self.scripts()
            .iter()
            .filter(|s| s.contains("GetVirtualSystemThumbnailImage"))
            .count()
    }

    fn simulate(inner: &mut Inner, script: &str) -> CommandResult {
        if script.contains("ConvertTo-Json") {
            return Self::enumerate(&inner.vms);
        }

        if script.contains("GetVirtualSystemThumbnailImage") {
            let name = quoted_after(script, "Get-VM -Name ").unwrap_or_default();
            return match inner.vms.iter().find(|vm| vm.name == name) {
                Some(vm) if vm.state == 2 => CommandResult::ok(format!("IMG:{}\r\n", fake_png())),
                Some(_) => CommandResult::ok(""),
                None => CommandResult::ok(format!(
                    "ERR:Hyper-V was unable to find a virtual machine with name \"{name}\".\r\n"
                )),
            };
        }

        if script.contains("Msvm_Keyboard") || script.contains("Msvm_SyntheticMouse") {
            let name = quoted_after(script, "Get-VM -Name ").unwrap_or_default();
            return if inner.vms.iter().any(|vm| vm.name == name) {
                CommandResult::ok("")
            } else {
                CommandResult::failed(1, format!("VM '{name}' not found"))
            };
        }

        if script.contains("New-VM") {
            let name = quoted_after(script, "New-VM -Name ").unwrap_or_default();
            if inner.vms.iter().any(|vm| vm.name == name) {
                return CommandResult::failed(
                    1,
                    format!("New-VM : Failed to create a new virtual machine. The VM '{name}' already exists."),
                );
            }
            let memory_mb = between(script, "-MemoryStartupBytes ", "MB")
                .and_then(|m| m.parse().ok())
                .unwrap_or(0);
            let notes = quoted_after(script, "-Notes ").unwrap_or_default();
            inner.vms.push(FakeVm {
                name,
                state: 3,
                memory_mb,
                notes,
                addresses: Vec::new(),
            });
            return CommandResult::ok("");
        }

        if script.contains("Remove-VM") {
            let name = quoted_after(script, "Get-VM -Name ").unwrap_or_default();
            inner.vms.retain(|vm| vm.name != name);
            return CommandResult::ok("");
        }

        for (cmdlet, state) in [("Restart-VM", 2), ("Start-VM", 2), ("Stop-VM", 3)] {
            if let Some(name) = quoted_after(script, &format!("{cmdlet} -Name ")) {
                return match inner.vms.iter_mut().find(|vm| vm.name == name) {
                    Some(vm) => {
                        vm.state = state;
                        CommandResult::ok("")
                    }
                    None => CommandResult::failed(
                        1,
                        format!("{cmdlet} : Hyper-V was unable to find a virtual machine with name \"{name}\"."),
                    ),
                };
            }
        }

        CommandResult::failed(1, format!("unrecognised script: {script}"))
    }

    fn enumerate(vms: &[FakeVm]) -> CommandResult {
        let items: Vec<_> = vms
            .iter()
            .map(|vm| {
                json!({
                    "Name": vm.name,
                    "State": vm.state,
                    "UptimeSeconds": if vm.state == 2 { 42.0 } else { 0.0 },
                    "MemoryAssigned": vm.memory_mb * 1_048_576,
                    "IPAddresses": vm.addresses,
                    "Notes": vm.notes,
                })
            })
            .collect();
        // ConvertTo-Json prints nothing for no items and a bare object for one.
        let stdout = match items.len() {
            0 => String::new(),
            1 => items[0].to_string(),
            _ => serde_json::Value::Array(items).to_string(),
        };
        CommandResult::ok(stdout)
    }
}

#[async_trait]
impl CommandRunner for FakeHyperV {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn run(&self, script: &str, _timeout: Duration) -> Result<CommandResult, ControlError> {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.push(script.to_string());
        if let Some(result) = inner.overrides.pop_front() {
            return result;
        }
        Ok(Self::simulate(&mut inner, script))
    }
}

/// Control plane over `fake` with disks under `storage_root`.
pub fn plane(fake: &Arc<FakeHyperV>, storage_root: &Path) -> ControlPlane {
    let settings = HypervisorConfig {
        storage_root: storage_root.to_path_buf(),
        ..HypervisorConfig::default()
    };
    ControlPlane::new(fake.clone(), settings)
}

/// The single-quoted literal immediately following `marker`, unescaped.
pub fn quoted_after(script: &str, marker: &str) -> Option<String> {
    let start = script.find(marker)? + marker.len();
    let mut chars = script[start..].chars().peekable();
    if chars.next()? != '\'' {
        return None;
    }
    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                value.push('\'');
            } else {
                return Some(value);
            }
        } else {
            value.push(c);
        }
    }
    None
}

fn between<'a>(script: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = script.find(start)? + start.len();
    let len = script[from..].find(end)?;
    Some(&script[from..from + len])
}
