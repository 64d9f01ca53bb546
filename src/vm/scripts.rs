//! PowerShell script text for every hypervisor operation.
//!
//! Builders here are pure string functions: they never touch a process, so
//! the exact text handed to the executor can be asserted in tests. Every
//! caller-supplied value is embedded through [`ps_quote`].

use std::path::Path;

use super::{ConsoleInput, ControlAction, CreateSpec, MouseButton};

/// Prefix of the line carrying a base64 PNG thumbnail.
pub const THUMBNAIL_PREFIX: &str = "IMG:";

/// Prefix of the line carrying a thumbnail failure message.
pub const THUMBNAIL_ERROR_PREFIX: &str = "ERR:";

/// WMI namespace for the Hyper-V v2 provider.
const VIRT_NAMESPACE: &str = r"root\virtualization\v2";

/// Quote `value` as a PowerShell single-quoted literal.
///
/// Single-quoted strings are not interpolated; the only escape is a doubled
/// quote.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Enumerate every VM as compressed JSON.
///
/// Memory is emitted in bytes and uptime in seconds; the parser converts.
/// `IPAddresses` collects every address of every adapter, IPv6 included.
pub fn enumerate() -> String {
    r#"Get-VM | ForEach-Object {
    $vm = $_
    $addresses = @(Get-VMNetworkAdapter -VMName $vm.Name -ErrorAction SilentlyContinue | ForEach-Object { $_.IPAddresses })
    [PSCustomObject]@{
        Name = $vm.Name
        State = [int]$vm.State
        UptimeSeconds = $vm.Uptime.TotalSeconds
        MemoryAssigned = $vm.MemoryAssigned
        IPAddresses = $addresses
        Notes = $vm.Notes
    }
} | ConvertTo-Json -Compress -Depth 3"#
        .to_string()
}

/// One imperative power command.
pub fn control(name: &str, action: ControlAction) -> String {
    let name = ps_quote(name);
    match action {
        ControlAction::Start => format!("Start-VM -Name {name} -ErrorAction Stop"),
        ControlAction::Stop => format!("Stop-VM -Name {name} -TurnOff -ErrorAction Stop"),
        ControlAction::Restart => format!("Restart-VM -Name {name} -Force -ErrorAction Stop"),
    }
}

/// Provision a VM with a fresh VHDX at `disk_path`.
///
/// Runs as one composite script. A failure at any step writes the message to
/// stderr and exits 1; steps already applied are left in place.
pub fn create(spec: &CreateSpec, disk_path: &Path, switch_name: &str, generation: u8) -> String {
    let name = ps_quote(spec.name.trim());
    let disk = ps_quote(&disk_path.to_string_lossy());
    let notes = ps_quote(&spec.metadata.encode());
    let switch = ps_quote(switch_name);

    let mut body = vec![
        format!(
            "New-VM -Name {name} -MemoryStartupBytes {}MB -NewVHDPath {disk} -NewVHDSizeBytes {}GB -Generation {generation} | Out-Null",
            spec.memory_mb, spec.disk_gb
        ),
        format!(
            "Set-VM -VMName {name} -ProcessorCount {} -StaticMemory -Notes {notes}",
            spec.cpu_count
        ),
    ];

    // Firmware settings only exist on generation 2 (UEFI) VMs.
    let uefi = generation >= 2;
    if uefi {
        body.push(format!("Set-VMFirmware -VMName {name} -EnableSecureBoot Off"));
    }

    // Media attach is best-effort: a bad ISO path leaves a bootless VM, not
    // a failed create.
    if let Some(media) = &spec.install_media {
        let media = ps_quote(&media.to_string_lossy());
        body.push(format!(
            "Add-VMDvdDrive -VMName {name} -Path {media} -ErrorAction SilentlyContinue"
        ));
        if uefi {
            body.push(format!(
                "$dvd = Get-VMDvdDrive -VMName {name} -ErrorAction SilentlyContinue | Select-Object -First 1"
            ));
            body.push(format!(
                "if ($dvd) {{ Set-VMFirmware -VMName {name} -FirstBootDevice $dvd }}"
            ));
        }
    }

    body.push(format!(
        "Connect-VMNetworkAdapter -VMName {name} -SwitchName {switch} -ErrorAction SilentlyContinue"
    ));

    let body: String = body
        .into_iter()
        .map(|line| format!("    {line}\n"))
        .collect();

    format!(
        "$ErrorActionPreference = 'Stop'\n\
         try {{\n{body}}} catch {{\n    \
         [Console]::Error.WriteLine($_.Exception.Message)\n    \
         exit 1\n\
         }}"
    )
}

/// Power off (if running) and remove a VM definition. Succeeds when the VM
/// does not exist.
pub fn delete(name: &str) -> String {
    let name = ps_quote(name);
    format!(
        "$vm = Get-VM -Name {name} -ErrorAction SilentlyContinue\n\
         if ($vm) {{\n    \
         Stop-VM -VM $vm -TurnOff -ErrorAction SilentlyContinue\n    \
         Remove-VM -VM $vm -Force -ErrorAction Stop\n\
         }}"
    )
}

/// Resolve the VM's WMI object; shared prelude of the console scripts.
fn resolve_vm(name: &str) -> String {
    format!(
        "$guid = (Get-VM -Name {} -ErrorAction Stop).Id.Guid\n",
        ps_quote(name)
    )
}

/// Request a `width`x`height` thumbnail and print it as `IMG:<base64 PNG>`.
///
/// Prints nothing when the hypervisor has no image (VM off, no video yet) and
/// `ERR:<message>` on failure.
pub fn thumbnail(name: &str, width: u32, height: u32) -> String {
    format!(
        "Add-Type -AssemblyName System.Drawing\n\
         try {{\n\
         {resolve}\
         $system = Get-CimInstance -Namespace {ns} -ClassName Msvm_ComputerSystem -Filter \"Name='$guid'\"\n\
         $service = Get-CimInstance -Namespace {ns} -ClassName Msvm_VirtualSystemManagementService\n\
         $res = Invoke-CimMethod -InputObject $service -MethodName GetVirtualSystemThumbnailImage -Arguments @{{ TargetSystem = $system; WidthPixels = {width}; HeightPixels = {height} }}\n\
         if ($res.ImageData) {{\n\
         $raw = New-Object System.IO.MemoryStream(,$res.ImageData)\n\
         $bitmap = New-Object System.Drawing.Bitmap($raw)\n\
         $png = New-Object System.IO.MemoryStream\n\
         $bitmap.Save($png, [System.Drawing.Imaging.ImageFormat]::Png)\n\
         Write-Output (\"{prefix}\" + [Convert]::ToBase64String($png.ToArray()))\n\
         $bitmap.Dispose(); $raw.Dispose(); $png.Dispose()\n\
         }}\n\
         }} catch {{\n\
         Write-Output (\"{err}\" + $_.Exception.Message)\n\
         }}",
        resolve = resolve_vm(name),
        ns = VIRT_NAMESPACE,
        prefix = THUMBNAIL_PREFIX,
        err = THUMBNAIL_ERROR_PREFIX,
    )
}

/// Inject one console input event.
pub fn input(name: &str, input: &ConsoleInput) -> String {
    let resolve = resolve_vm(name);
    match *input {
        ConsoleInput::Key { key_code } => format!(
            "{resolve}\
             $keyboard = Get-CimInstance -Namespace {VIRT_NAMESPACE} -ClassName Msvm_Keyboard -Filter \"SystemName='$guid'\"\n\
             Invoke-CimMethod -InputObject $keyboard -MethodName TypeKey -Arguments @{{ keyCode = {key_code} }} | Out-Null"
        ),
        ConsoleInput::Mouse { x, y, click } => {
            let mut script = format!(
                "{resolve}\
                 $mouse = Get-CimInstance -Namespace {VIRT_NAMESPACE} -ClassName Msvm_SyntheticMouse -Filter \"SystemName='$guid'\"\n\
                 Invoke-CimMethod -InputObject $mouse -MethodName SetAbsolutePosition -Arguments @{{ horizontalPosition = {x}; verticalPosition = {y} }} | Out-Null"
            );
            if let Some(MouseButton::Left) = click {
                script.push_str(
                    "\nInvoke-CimMethod -InputObject $mouse -MethodName ClickButton -Arguments @{ buttonIndex = 1 } | Out-Null",
                );
            }
            script
        }
    }
}
