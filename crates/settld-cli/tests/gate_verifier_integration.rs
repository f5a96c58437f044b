// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `settld-gate-verifier` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn settld_gate_verifier() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("settld-gate-verifier").expect("binary `settld-gate-verifier` should be built")
}

fn ok_report(schema: &str) -> String {
    serde_json::json!({ "schemaVersion": schema, "verdict": { "ok": true } }).to_string()
}

fn failing_report(schema: &str) -> String {
    serde_json::json!({ "schemaVersion": schema, "verdict": { "ok": false } }).to_string()
}

#[test]
fn passes_when_the_only_composed_gate_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let kernel_path = dir.path().join("kernel.json");
    fs::write(&kernel_path, ok_report("KernelV0ShipGate.v1")).unwrap();
    let guard_path = dir.path().join("guard.json");

    settld_gate_verifier()
        .env_clear()
        .env("RELEASE_PROMOTION_GUARD_REPORT_PATH", &guard_path)
        .env("RELEASE_PROMOTION_REF", "v1.2.3")
        .env("KERNEL_V0_SHIP_GATE_REPORT_PATH", &kernel_path)
        .env("RELEASE_PROMOTION_GUARD_NOW", "2026-01-01T00:00:00Z")
        .assert()
        .success();

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&guard_path).unwrap()).unwrap();
    assert_eq!(report["verdict"], "pass");
    assert_eq!(report["composedGates"], serde_json::json!(["kernel_v0_ship_gate"]));
}

#[test]
fn fails_closed_without_override_when_a_gate_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cutover_path = dir.path().join("cutover.json");
    fs::write(&cutover_path, failing_report("ProductionCutoverGate.v1")).unwrap();
    let guard_path = dir.path().join("guard.json");

    settld_gate_verifier()
        .env_clear()
        .env("RELEASE_PROMOTION_GUARD_REPORT_PATH", &guard_path)
        .env("RELEASE_PROMOTION_REF", "v1.2.3")
        .env("PRODUCTION_CUTOVER_GATE_REPORT_PATH", &cutover_path)
        .env("RELEASE_PROMOTION_GUARD_NOW", "2026-01-01T00:00:00Z")
        .assert()
        .failure()
        .code(1);

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&guard_path).unwrap()).unwrap();
    assert_eq!(report["verdict"], "fail");
}

#[test]
fn missing_required_env_var_exits_with_usage_code() {
    settld_gate_verifier()
        .env_clear()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("RELEASE_PROMOTION_GUARD_REPORT_PATH"));
}
