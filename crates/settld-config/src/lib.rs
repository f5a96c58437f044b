// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment-driven configuration for the gate-verifier and
//! promotion-guard CLI paths (§6 "Environment variables (gate
//! verifier)").
//!
//! Grounded on `abp-config`'s `ConfigError`/`ConfigWarning` split and its
//! `load_config` / `validate_config` pair, adapted from TOML-file loading
//! to environment-variable loading since the gate verifier is invoked as
//! a short-lived process wired up entirely through its environment.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use std::env::VarError;

/// Errors that can occur while loading gate-verifier configuration from
/// the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {name}")]
    MissingRequiredVar {
        /// The variable's name.
        name: String,
    },

    /// An environment variable was set but not valid UTF-8.
    #[error("environment variable {name} is not valid UTF-8")]
    NotUnicode {
        /// The variable's name.
        name: String,
    },

    /// `RELEASE_PROMOTION_GUARD_NOW` was set but could not be parsed as
    /// an ISO-8601 timestamp.
    #[error("environment variable {name} is not a valid ISO-8601 timestamp: {value}")]
    InvalidTimestamp {
        /// The variable's name.
        name: String,
        /// The value that failed to parse.
        value: String,
    },
}

/// Advisory-level configuration issues that do not block a gate-verifier
/// run but deserve attention in its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// An optional gate-report path was not set; that gate will be
    /// skipped from the promotion composition.
    OptionalReportPathUnset {
        /// The variable's name.
        name: String,
    },
    /// `RELEASE_PROMOTION_GUARD_NOW` was not set; the guard will use the
    /// wall clock, which makes its run non-reproducible.
    GuardNowUnset,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::OptionalReportPathUnset { name } => {
                write!(f, "optional gate report path {name} is not set; that gate is skipped")
            }
            ConfigWarning::GuardNowUnset => {
                write!(f, "RELEASE_PROMOTION_GUARD_NOW is not set; using the wall clock")
            }
        }
    }
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(VarError::NotPresent) => Err(ConfigError::MissingRequiredVar { name: name.to_string() }),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { name: name.to_string() }),
    }
}

fn optional_var(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { name: name.to_string() }),
    }
}

/// Gate report paths the promotion guard composes over (§4.10, §6).
/// Every field is optional at the loading layer; `settld-promotion`
/// decides which are required for a given promotion ref.
#[derive(Debug, Clone, Default)]
pub struct GateReportPaths {
    /// `KERNEL_V0_SHIP_GATE_REPORT_PATH`.
    pub kernel_v0_ship_gate_report_path: Option<String>,
    /// `PRODUCTION_CUTOVER_GATE_REPORT_PATH`.
    pub production_cutover_gate_report_path: Option<String>,
    /// `OFFLINE_VERIFICATION_PARITY_GATE_REPORT_PATH`.
    pub offline_verification_parity_gate_report_path: Option<String>,
    /// `ONBOARDING_HOST_SUCCESS_GATE_REPORT_PATH`.
    pub onboarding_host_success_gate_report_path: Option<String>,
    /// `GO_LIVE_GATE_REPORT_PATH`.
    pub go_live_gate_report_path: Option<String>,
}

/// Evidence-bundle paths referenced by the release-promotion guard.
#[derive(Debug, Clone, Default)]
pub struct EvidencePaths {
    /// `LAUNCH_CUTOVER_PACKET_PATH`.
    pub launch_cutover_packet_path: Option<String>,
    /// `HOSTED_BASELINE_EVIDENCE_PATH`.
    pub hosted_baseline_evidence_path: Option<String>,
}

/// A signed override to the release-promotion guard's decision, wired
/// up through the environment rather than an HTTP request body.
#[derive(Debug, Clone, Default)]
pub struct OverrideConfig {
    /// `RELEASE_PROMOTION_OVERRIDE_PATH`.
    pub override_path: Option<String>,
    /// `RELEASE_PROMOTION_OVERRIDE_PUBLIC_KEY_FILE`.
    pub override_public_key_file: Option<String>,
}

/// Top-level configuration for a single release-promotion guard run.
#[derive(Debug, Clone)]
pub struct GateVerifierConfig {
    /// `RELEASE_PROMOTION_GUARD_REPORT_PATH`: where the guard writes its
    /// own composed report.
    pub guard_report_path: String,
    /// `RELEASE_PROMOTION_REF`: the ref (commit, tag, or release id)
    /// this promotion decision concerns.
    pub promotion_ref: String,
    /// Gate report paths to compose over.
    pub gate_reports: GateReportPaths,
    /// Evidence-bundle paths.
    pub evidence: EvidencePaths,
    /// Override wiring.
    pub r#override: OverrideConfig,
    /// `RELEASE_PROMOTION_GUARD_NOW`, parsed, or `None` to use the wall
    /// clock.
    pub now: Option<DateTime<Utc>>,
}

/// Load [`GateVerifierConfig`] from the process environment.
///
/// # Errors
///
/// Returns [`ConfigError::MissingRequiredVar`] if
/// `RELEASE_PROMOTION_GUARD_REPORT_PATH` or `RELEASE_PROMOTION_REF` is
/// unset, or [`ConfigError::InvalidTimestamp`] if
/// `RELEASE_PROMOTION_GUARD_NOW` is set but unparseable.
pub fn load_gate_verifier_config() -> Result<GateVerifierConfig, ConfigError> {
    let guard_report_path = required_var("RELEASE_PROMOTION_GUARD_REPORT_PATH")?;
    let promotion_ref = required_var("RELEASE_PROMOTION_REF")?;

    let gate_reports = GateReportPaths {
        kernel_v0_ship_gate_report_path: optional_var("KERNEL_V0_SHIP_GATE_REPORT_PATH")?,
        production_cutover_gate_report_path: optional_var("PRODUCTION_CUTOVER_GATE_REPORT_PATH")?,
        offline_verification_parity_gate_report_path: optional_var(
            "OFFLINE_VERIFICATION_PARITY_GATE_REPORT_PATH",
        )?,
        onboarding_host_success_gate_report_path: optional_var(
            "ONBOARDING_HOST_SUCCESS_GATE_REPORT_PATH",
        )?,
        go_live_gate_report_path: optional_var("GO_LIVE_GATE_REPORT_PATH")?,
    };

    let evidence = EvidencePaths {
        launch_cutover_packet_path: optional_var("LAUNCH_CUTOVER_PACKET_PATH")?,
        hosted_baseline_evidence_path: optional_var("HOSTED_BASELINE_EVIDENCE_PATH")?,
    };

    let r#override = OverrideConfig {
        override_path: optional_var("RELEASE_PROMOTION_OVERRIDE_PATH")?,
        override_public_key_file: optional_var("RELEASE_PROMOTION_OVERRIDE_PUBLIC_KEY_FILE")?,
    };

    let now = match optional_var("RELEASE_PROMOTION_GUARD_NOW")? {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|_| ConfigError::InvalidTimestamp {
                    name: "RELEASE_PROMOTION_GUARD_NOW".to_string(),
                    value: raw,
                })?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(GateVerifierConfig {
        guard_report_path,
        promotion_ref,
        gate_reports,
        evidence,
        r#override,
        now,
    })
}

/// Derive advisory warnings from a loaded configuration: which optional
/// gate reports are skipped, and whether the guard is running against
/// the wall clock.
#[must_use]
pub fn collect_warnings(config: &GateVerifierConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    let optional = [
        ("KERNEL_V0_SHIP_GATE_REPORT_PATH", &config.gate_reports.kernel_v0_ship_gate_report_path),
        ("PRODUCTION_CUTOVER_GATE_REPORT_PATH", &config.gate_reports.production_cutover_gate_report_path),
        (
            "OFFLINE_VERIFICATION_PARITY_GATE_REPORT_PATH",
            &config.gate_reports.offline_verification_parity_gate_report_path,
        ),
        (
            "ONBOARDING_HOST_SUCCESS_GATE_REPORT_PATH",
            &config.gate_reports.onboarding_host_success_gate_report_path,
        ),
        ("GO_LIVE_GATE_REPORT_PATH", &config.gate_reports.go_live_gate_report_path),
    ];
    for (name, value) in optional {
        if value.is_none() {
            warnings.push(ConfigWarning::OptionalReportPathUnset { name: name.to_string() });
        }
    }

    if config.now.is_none() {
        warnings.push(ConfigWarning::GuardNowUnset);
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for name in [
            "RELEASE_PROMOTION_GUARD_REPORT_PATH",
            "RELEASE_PROMOTION_REF",
            "KERNEL_V0_SHIP_GATE_REPORT_PATH",
            "PRODUCTION_CUTOVER_GATE_REPORT_PATH",
            "OFFLINE_VERIFICATION_PARITY_GATE_REPORT_PATH",
            "ONBOARDING_HOST_SUCCESS_GATE_REPORT_PATH",
            "GO_LIVE_GATE_REPORT_PATH",
            "LAUNCH_CUTOVER_PACKET_PATH",
            "HOSTED_BASELINE_EVIDENCE_PATH",
            "RELEASE_PROMOTION_OVERRIDE_PATH",
            "RELEASE_PROMOTION_OVERRIDE_PUBLIC_KEY_FILE",
            "RELEASE_PROMOTION_GUARD_NOW",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn missing_required_var_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let result = load_gate_verifier_config();
        match result {
            Err(ConfigError::MissingRequiredVar { name }) => {
                assert_eq!(name, "RELEASE_PROMOTION_GUARD_REPORT_PATH");
            }
            _ => panic!("expected MissingRequiredVar"),
        }
    }

    #[test]
    fn minimal_env_loads_with_all_optional_warnings() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("RELEASE_PROMOTION_GUARD_REPORT_PATH", "/tmp/guard.json");
        std::env::set_var("RELEASE_PROMOTION_REF", "v1.2.3");

        let config = load_gate_verifier_config().unwrap();
        assert_eq!(config.promotion_ref, "v1.2.3");
        assert!(config.now.is_none());

        let warnings = collect_warnings(&config);
        assert_eq!(warnings.len(), 6);
        assert!(warnings.contains(&ConfigWarning::GuardNowUnset));
        clear_all();
    }

    #[test]
    fn guard_now_parses_rfc3339() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("RELEASE_PROMOTION_GUARD_REPORT_PATH", "/tmp/guard.json");
        std::env::set_var("RELEASE_PROMOTION_REF", "v1.2.3");
        std::env::set_var("RELEASE_PROMOTION_GUARD_NOW", "2026-01-01T00:00:00Z");

        let config = load_gate_verifier_config().unwrap();
        assert_eq!(config.now.unwrap().to_rfc3339(), "2026-01-01T00:00:00+00:00");
        clear_all();
    }

    #[test]
    fn guard_now_invalid_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("RELEASE_PROMOTION_GUARD_REPORT_PATH", "/tmp/guard.json");
        std::env::set_var("RELEASE_PROMOTION_REF", "v1.2.3");
        std::env::set_var("RELEASE_PROMOTION_GUARD_NOW", "not-a-timestamp");

        let result = load_gate_verifier_config();
        assert!(matches!(result, Err(ConfigError::InvalidTimestamp { .. })));
        clear_all();
    }
}
