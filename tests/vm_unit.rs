//! Pure unit tests for VM types and logic.
//!
//! These tests exercise parsing, classification and script generation without
//! a hypervisor. They run as part of the standard `cargo test` invocation with
//! no feature flags required.
//!
//! Tested in this file:
//! - `parse_enumeration()` against captured output in `tests/fixtures/`
//! - `classify()` over the known out-of-memory phrasings
//! - `GuestMetadata` packing in the VM notes field
//! - script builders quoting untrusted names

use std::time::Duration;

use vmdeck::vm::scripts;
use vmdeck::vm::{
    ControlAction, ControlError, ErrorKind, GuestMetadata, PowerState, classify,
    parse_enumeration,
};

const MANY: &str = include_str!("fixtures/enumerate_many.json");
const SINGLE: &str = include_str!("fixtures/enumerate_single.json");
const BOM: &str = include_str!("fixtures/enumerate_bom.json");
const EMPTY: &str = include_str!("fixtures/enumerate_empty.json");

// ---------------------------------------------------------------------------
// Tests: parse_enumeration
// ---------------------------------------------------------------------------

#[test]
fn fixture_many_preserves_order() {
    let vms = parse_enumeration(MANY).expect("parse");
    let names: Vec<_> = vms.iter().map(|vm| vm.name.as_str()).collect();
    assert_eq!(names, ["build-01", "win-desk", "db-critical"]);
}

#[test]
fn fixture_many_maps_fields() {
    let vms = parse_enumeration(MANY).expect("parse");

    let build = &vms[0];
    assert_eq!(build.state, PowerState::Running);
    assert_eq!(build.uptime, Duration::from_secs_f64(3725.25));
    assert_eq!(build.memory_mb, 4096);
    assert_eq!(build.address, "172.22.112.5");
    assert_eq!(build.metadata, GuestMetadata::new("linux", "Xk4mP9"));

    let desk = &vms[1];
    assert_eq!(desk.state, PowerState::Stopped);
    assert_eq!(desk.uptime, Duration::ZERO);
    assert_eq!(desk.address, "unavailable");
    assert_eq!(desk.metadata.os, "windows");

    let critical = &vms[2];
    assert_eq!(critical.state, PowerState::Running);
    assert_eq!(critical.memory_mb, 1024);
    assert_eq!(critical.address, "unavailable");
}

#[test]
fn fixture_single_object_and_scalar_address() {
    let vms = parse_enumeration(SINGLE).expect("parse");
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].address, "192.168.0.44");
    assert_eq!(vms[0].metadata.temp_pass, "hunter2");
}

#[test]
fn fixture_bom_and_nulls() {
    let vms = parse_enumeration(BOM).expect("parse");
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].state, PowerState::Running);
    assert_eq!(vms[0].memory_mb, 512);
    assert_eq!(vms[0].address, "unavailable");
    assert_eq!(vms[0].metadata.os, "windows");
}

#[test]
fn fixture_empty_is_empty_list() {
    assert!(parse_enumeration(EMPTY).expect("parse").is_empty());
}

#[test]
fn every_record_state_is_running_or_stopped() {
    for raw in [MANY, SINGLE, BOM, EMPTY] {
        for vm in parse_enumeration(raw).expect("parse") {
            assert!(matches!(vm.state, PowerState::Running | PowerState::Stopped));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests: classify
// ---------------------------------------------------------------------------

#[test]
fn classify_recognises_memory_markers_in_any_case() {
    for raw in [
        "Start-VM : 'vm1' failed to start. (Virtual machine ID 1234) 0x800705AA",
        "L'ordinateur virtuel n'a pas pu démarrer : MÉMOIRE insuffisante",
        "Not Enough Memory in the system to start the virtual machine",
        "INSUFFICIENT SYSTEM RESOURCES EXIST TO COMPLETE THE REQUESTED SERVICE",
    ] {
        assert_eq!(classify(raw).kind(), ErrorKind::InsufficientResources, "{raw}");
    }
}

#[test]
fn classify_keeps_other_text_verbatim() {
    let raw = "Stop-VM : The operation cannot be performed while the object is in its current state.";
    match classify(raw) {
        ControlError::HypervisorError(text) => assert_eq!(text, raw),
        other => panic!("expected HypervisorError, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests: GuestMetadata
// ---------------------------------------------------------------------------

#[test]
fn metadata_credential_may_contain_delimiter() {
    let meta = GuestMetadata::new("linux", "a|b");
    assert_eq!(GuestMetadata::decode(&meta.encode()), meta);
}

#[test]
fn metadata_without_delimiter_is_all_tag() {
    let meta = GuestMetadata::decode("ubuntu");
    assert_eq!(meta.os, "ubuntu");
    assert_eq!(meta.temp_pass, "");
}

// ---------------------------------------------------------------------------
// Tests: script quoting
// ---------------------------------------------------------------------------

#[test]
fn control_script_cannot_be_escaped_by_name() {
    let script = scripts::control("x'; Remove-VM -Name * -Force; '", ControlAction::Start);
    assert_eq!(
        script,
        "Start-VM -Name 'x''; Remove-VM -Name * -Force; ''' -ErrorAction Stop"
    );
}

#[test]
fn thumbnail_script_quotes_name() {
    let script = scripts::thumbnail("it's", 800, 600);
    assert!(script.contains("Get-VM -Name 'it''s'"));
}
