//! Parser for the enumeration script's JSON output.
//!
//! `ConvertTo-Json` is loose about shape: no VMs prints nothing, one VM prints
//! a bare object, several print an array, and a one-element `IPAddresses` may
//! collapse to a scalar. Parsing walks `serde_json::Value` rather than a
//! derived struct so each of those is accepted.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::{ADDRESS_UNAVAILABLE, GuestMetadata, PowerState, VmRecord};

/// `VMState` values reported as running: Running and RunningCritical.
/// Off is 3; transitional and saved states count as stopped.
const RUNNING_STATE_CODES: &[i64] = &[2, 32785];

const BYTES_PER_MB: u64 = 1_048_576;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("enumeration output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("enumeration output has unexpected shape: {0}")]
    Shape(String),
}

/// Parse enumeration output into records, in hypervisor order.
pub fn parse_enumeration(raw: &str) -> Result<Vec<VmRecord>, ParseError> {
    let text = raw.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(text)?;
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(ParseError::Shape(format!(
                "expected an object or array, got {other}"
            )));
        }
    };

    Ok(items.iter().filter_map(parse_record).collect())
}

fn parse_record(item: &Value) -> Option<VmRecord> {
    let name = match item.get("Name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => {
            warn!(item = %item, "Skipping enumeration entry without a name");
            return None;
        }
    };

    let state = power_state(item.get("State").unwrap_or(&Value::Null));
    let uptime = match state {
        PowerState::Running => item
            .get("UptimeSeconds")
            .and_then(Value::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default(),
        PowerState::Stopped => Duration::ZERO,
    };
    let memory_mb = item
        .get("MemoryAssigned")
        .and_then(as_u64_lenient)
        .map(|bytes| bytes / BYTES_PER_MB)
        .unwrap_or(0);
    let address = first_ipv4(item.get("IPAddresses").unwrap_or(&Value::Null))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| ADDRESS_UNAVAILABLE.to_string());
    let notes = item.get("Notes").and_then(Value::as_str).unwrap_or("");

    Some(VmRecord {
        name,
        state,
        uptime,
        memory_mb,
        address,
        metadata: GuestMetadata::decode(notes),
        error: None,
    })
}

/// Collapse a hypervisor state (numeric code or name) to [`PowerState`].
pub fn power_state(state: &Value) -> PowerState {
    let running = match state {
        Value::Number(n) => n
            .as_i64()
            .is_some_and(|code| RUNNING_STATE_CODES.contains(&code)),
        Value::String(s) => s.trim().eq_ignore_ascii_case("running"),
        _ => false,
    };
    if running {
        PowerState::Running
    } else {
        PowerState::Stopped
    }
}

/// First entry that parses as an IPv4 literal. Accepts an array or a bare
/// string.
pub fn first_ipv4(addresses: &Value) -> Option<Ipv4Addr> {
    let candidates: Vec<&str> = match addresses {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(s) => vec![s.as_str()],
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .find_map(|candidate| candidate.trim().parse::<Ipv4Addr>().ok())
}

fn as_u64_lenient(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}
