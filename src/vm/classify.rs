//! Maps raw hypervisor error text onto [`ControlError`].
//!
//! Matching is by case-insensitive substring: Hyper-V's wording changes with
//! the host locale and OS build, while the embedded HRESULT and a few key
//! phrases stay stable.

use super::error::ControlError;

/// Lowercased fragments that identify an out-of-memory failure.
///
/// * `0x800705aa`: ERROR_NO_SYSTEM_RESOURCES, raised by Start-VM when the
///   host cannot commit the VM's startup memory.
/// * `mémoire`: the French-locale rendering of the same failure.
const INSUFFICIENT_MEMORY_MARKERS: &[&str] = &[
    "0x800705aa",
    "mémoire",
    "not enough memory",
    "insufficient system resources",
];

const INSUFFICIENT_MEMORY_REMEDIATION: &str = "Not enough free RAM on the host to start this VM. \
     Close other applications on the host or lower the VM's memory assignment, then try again.";

/// Classify one diagnostic string.
///
/// Known out-of-memory text becomes [`ControlError::InsufficientResources`]
/// with a remediation message; anything else is returned as
/// [`ControlError::HypervisorError`] carrying `raw` byte-for-byte.
pub fn classify(raw: &str) -> ControlError {
    let lowered = raw.to_lowercase();
    if INSUFFICIENT_MEMORY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        ControlError::InsufficientResources {
            message: INSUFFICIENT_MEMORY_REMEDIATION.to_string(),
            raw: raw.to_string(),
        }
    } else {
        ControlError::HypervisorError(raw.to_string())
    }
}
