//! vmdeck command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use vmdeck::config::Config;
use vmdeck::paths::VmdeckPaths;
use vmdeck::vm::{ControlAction, ControlPlane, CreateSpec, GuestMetadata, DEFAULT_OS_TAG};
use vmdeck::{logging, server};

/// Hyper-V control plane
#[derive(Parser, Debug)]
#[command(name = "vmdeck", version, about = "Hyper-V control plane and remote console")]
struct Args {
    /// Config file (defaults to vmdeck.toml in the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every VM as JSON
    List,
    /// Power on a VM
    Start { name: String },
    /// Force power-off a VM
    Stop { name: String },
    /// Force restart a VM
    Restart { name: String },
    /// Provision a new VM
    Create {
        name: String,
        #[arg(long)]
        memory_mb: u64,
        #[arg(long)]
        cpus: u32,
        #[arg(long)]
        disk_gb: u64,
        /// Install media attached as the first boot device
        #[arg(long)]
        iso: Option<PathBuf>,
        /// Guest OS tag
        #[arg(long, default_value = DEFAULT_OS_TAG)]
        os: String,
        /// First-login credential stored with the VM
        #[arg(long, default_value = "")]
        temp_pass: String,
    },
    /// Delete a VM and its backing disk
    Delete { name: String },
    /// Save a thumbnail of the VM's display as PNG
    Screenshot {
        name: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Serve the console WebSocket endpoint
    Serve {
        /// Listen address (overrides [server].bind)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init();
    let args = Args::parse();

    let paths = VmdeckPaths::resolve();
    if let Some(paths) = &paths {
        if let Err(e) = paths.ensure() {
            warn!(error = %e, "Failed to create application directories");
        }
    }

    let config_path = match args.config {
        Some(path) => path,
        None => paths
            .as_ref()
            .map(VmdeckPaths::config_file)
            .context("cannot determine config directory; pass --config")?,
    };
    let config = Config::load(&config_path)?;
    info!(config = %config_path.display(), "Configuration loaded");

    let plane = Arc::new(ControlPlane::from_config(config.hypervisor.clone()));

    match args.command {
        Command::List => {
            let vms = plane.list().await;
            println!("{}", serde_json::to_string_pretty(&vms)?);
        }
        Command::Start { name } => plane.control(&name, ControlAction::Start).await?,
        Command::Stop { name } => plane.control(&name, ControlAction::Stop).await?,
        Command::Restart { name } => plane.control(&name, ControlAction::Restart).await?,
        Command::Create {
            name,
            memory_mb,
            cpus,
            disk_gb,
            iso,
            os,
            temp_pass,
        } => {
            let spec = CreateSpec {
                name,
                memory_mb,
                cpu_count: cpus,
                disk_gb,
                install_media: iso,
                metadata: GuestMetadata::new(os, temp_pass),
            };
            plane.create(&spec).await?;
        }
        Command::Delete { name } => plane.delete(&name).await?,
        Command::Screenshot { name, out } => {
            let Some(frame) = plane.screenshot(&name).await else {
                bail!("no display image available for {name}");
            };
            let png = STANDARD.decode(frame).context("screenshot is not valid base64")?;
            std::fs::write(&out, png)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(vm = %name, out = %out.display(), "Screenshot saved");
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            server::serve(plane, &bind, &config.console).await?;
        }
    }

    Ok(())
}
