//! vmdeck: Hyper-V control plane
//!
//! Lists, starts, stops, creates and deletes VMs by running PowerShell
//! management commands, and streams a polling remote console (status lines,
//! then periodic screenshots, with keyboard and mouse injection) over a
//! WebSocket.

pub mod config;
pub mod console;
pub mod logging;
pub mod paths;
pub mod protocol;
pub mod server;
pub mod state_machine;
pub mod vm;
