// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `settld-gate-verifier`: the release-promotion guard (§4.10, §6
//! "Environment variables (gate verifier)").
//!
//! Reads gate reports and an optional signed override from paths named
//! entirely through the environment (no argv surface is specified for
//! this tool), composes them with `settld-promotion::evaluate`, and
//! writes a `GuardReport.v1` to `RELEASE_PROMOTION_GUARD_REPORT_PATH`.
//! Grounded on `settld-cli`'s exit-code convention: 0 for pass or
//! override_pass, 1 for fail or a runtime error reading inputs.

use chrono::Utc;
use serde::Serialize;
use settld_config::{collect_warnings, load_gate_verifier_config, ConfigError, GateVerifierConfig};
use settld_promotion::{evaluate, PromotionOverride, PromotionVerdict, ReportRequirement};
use std::path::Path;
use std::process::ExitCode;

const EXIT_PASS: u8 = 0;
const EXIT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

/// One named gate report this guard composes over, paired with the
/// `schemaVersion` its report must carry.
struct NamedGate {
    name: &'static str,
    expected_schema_version: &'static str,
    path: Option<String>,
}

fn named_gates(config: &GateVerifierConfig) -> Vec<NamedGate> {
    vec![
        NamedGate {
            name: "kernel_v0_ship_gate",
            expected_schema_version: "KernelV0ShipGate.v1",
            path: config.gate_reports.kernel_v0_ship_gate_report_path.clone(),
        },
        NamedGate {
            name: "production_cutover_gate",
            expected_schema_version: "ProductionCutoverGate.v1",
            path: config.gate_reports.production_cutover_gate_report_path.clone(),
        },
        NamedGate {
            name: "offline_verification_parity_gate",
            expected_schema_version: "OfflineVerificationParityGate.v1",
            path: config.gate_reports.offline_verification_parity_gate_report_path.clone(),
        },
        NamedGate {
            name: "onboarding_host_success_gate",
            expected_schema_version: "OnboardingHostSuccessGate.v1",
            path: config.gate_reports.onboarding_host_success_gate_report_path.clone(),
        },
        NamedGate {
            name: "go_live_gate",
            expected_schema_version: "GoLiveGate.v1",
            path: config.gate_reports.go_live_gate_report_path.clone(),
        },
    ]
}

fn read_json(path: &str) -> Result<serde_json::Value, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("{path} is not valid JSON: {e}"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GuardReport {
    schema_version: &'static str,
    promotion_ref: String,
    verdict: &'static str,
    composed_gates: Vec<String>,
    skipped_gates: Vec<String>,
    warnings: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn run() -> Result<u8, String> {
    let config = load_gate_verifier_config().map_err(describe_config_error)?;
    let warnings = collect_warnings(&config);

    let gates = named_gates(&config);
    let mut reports = Vec::new();
    let mut requirements = Vec::new();
    let mut composed_gates = Vec::new();
    let mut skipped_gates = Vec::new();

    for gate in &gates {
        match &gate.path {
            Some(path) => {
                let report = read_json(path)?;
                reports.push((gate.name.to_string(), report));
                requirements.push(ReportRequirement {
                    name: gate.name.to_string(),
                    expected_schema_version: gate.expected_schema_version.to_string(),
                    required_check_ids: vec![],
                });
                composed_gates.push(gate.name.to_string());
            }
            None => skipped_gates.push(gate.name.to_string()),
        }
    }

    let override_data = match &config.r#override.override_path {
        Some(path) => {
            let raw = read_json(path)?;
            let parsed: PromotionOverride =
                serde_json::from_value(raw).map_err(|e| format!("{path} is not a valid PromotionOverride: {e}"))?;
            Some(parsed)
        }
        None => None,
    };
    let external_key = match &config.r#override.override_public_key_file {
        Some(path) => Some(
            std::fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?,
        ),
        None => None,
    };
    let override_ref = override_data
        .as_ref()
        .map(|o| (o, external_key.as_deref()));

    let now = config.now.unwrap_or_else(Utc::now);
    let verdict = evaluate(&reports, &requirements, override_ref, now).map_err(|e| e.message)?;

    let report = GuardReport {
        schema_version: "GuardReport.v1",
        promotion_ref: config.promotion_ref.clone(),
        verdict: match verdict {
            PromotionVerdict::Pass => "pass",
            PromotionVerdict::OverridePass => "override_pass",
            PromotionVerdict::Fail => "fail",
        },
        composed_gates,
        skipped_gates,
        warnings: warnings.iter().map(ToString::to_string).collect(),
    };

    write_report(&config.guard_report_path, &report)?;

    Ok(if verdict == PromotionVerdict::Fail { EXIT_FAIL } else { EXIT_PASS })
}

fn write_report(path: &str, report: &GuardReport) -> Result<(), String> {
    let json = serde_json::to_string_pretty(report).map_err(|e| format!("failed to serialize guard report: {e}"))?;
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
    }
    std::fs::write(path, format!("{json}\n")).map_err(|e| format!("failed to write {path}: {e}"))
}

fn describe_config_error(e: ConfigError) -> String {
    e.to_string()
}
