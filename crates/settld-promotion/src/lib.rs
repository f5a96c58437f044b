// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Promotion guard: composes required gate reports, computes a canonical
//! `promotionContext`, and verifies a signed override when composition
//! alone fails (§4.10).
//!
//! Grounded on `settld-governance`'s governed-signer check, reused
//! directly here for override-signature verification against a trusted
//! public key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_canon::sha256_hex_of_canonical;
use settld_error::{ErrorCode, SettldError};

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// One required report: its name (used as the promotion context's
/// artifact id), the `schemaVersion` it must carry, and check ids that
/// must all be `passed` if this report is designated as check-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequirement {
    /// Identifies this report in the promotion context, e.g.
    /// `"kernel_v0_ship_gate"`.
    pub name: String,
    /// Expected `schemaVersion` string.
    pub expected_schema_version: String,
    /// Check ids that must all report `"passed"`, if non-empty.
    pub required_check_ids: Vec<String>,
}

/// Verify one gate report against its requirement: schema match,
/// `verdict.ok == true`, and (if `required_check_ids` is non-empty)
/// every named check reports `"passed"`.
///
/// # Errors
///
/// Returns [`ErrorCode::SchemaInvalid`] on a schema mismatch, missing
/// `verdict.ok`, a failing verdict, or a missing/non-passed required
/// check.
pub fn verify_report(report: &serde_json::Value, requirement: &ReportRequirement) -> Result<(), SettldError> {
    let schema_version = report
        .get("schemaVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, format!("{}: missing schemaVersion", requirement.name)))?;
    if schema_version != requirement.expected_schema_version {
        return Err(err(
            ErrorCode::SchemaInvalid,
            format!(
                "{}: expected schemaVersion {}, found {}",
                requirement.name, requirement.expected_schema_version, schema_version
            ),
        ));
    }

    let ok = report
        .get("verdict")
        .and_then(|v| v.get("ok"))
        .and_then(|v| v.as_bool())
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, format!("{}: missing verdict.ok", requirement.name)))?;
    if !ok {
        return Err(err(ErrorCode::SchemaInvalid, format!("{}: verdict.ok is false", requirement.name)));
    }

    if !requirement.required_check_ids.is_empty() {
        let checks = report
            .get("checks")
            .and_then(|v| v.as_array())
            .ok_or_else(|| err(ErrorCode::SchemaInvalid, format!("{}: missing checks array", requirement.name)))?;
        for check_id in &requirement.required_check_ids {
            let status = checks
                .iter()
                .find(|c| c.get("id").and_then(|v| v.as_str()) == Some(check_id.as_str()))
                .and_then(|c| c.get("status"))
                .and_then(|v| v.as_str());
            if status != Some("passed") {
                return Err(err(
                    ErrorCode::SchemaInvalid,
                    format!("{}: required check {check_id} did not pass", requirement.name),
                ));
            }
        }
    }
    Ok(())
}

/// One entry in the canonical promotion context, keyed by artifact id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionContextEntry {
    /// The report's name (its artifact id within the context).
    pub artifact_id: String,
    /// The report's `schemaVersion`.
    pub schema_version: String,
}

/// Canonical, schema-tagged summary of every composed report, sorted by
/// artifact id (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionContext {
    /// Always `"PromotionContext.v1"`.
    pub schema_version: String,
    /// Entries sorted by `artifact_id` ascending.
    pub entries: Vec<PromotionContextEntry>,
}

/// Compute the canonical promotion context for a set of named reports.
#[must_use]
pub fn compute_promotion_context(reports: &[(String, serde_json::Value)]) -> PromotionContext {
    let mut entries: Vec<PromotionContextEntry> = reports
        .iter()
        .map(|(name, report)| PromotionContextEntry {
            artifact_id: name.clone(),
            schema_version: report
                .get("schemaVersion")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
        .collect();
    entries.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));
    PromotionContext {
        schema_version: "PromotionContext.v1".to_string(),
        entries,
    }
}

/// Hash a promotion context to the value an override must be signed over.
pub fn promotion_context_hash(context: &PromotionContext) -> Result<String, SettldError> {
    sha256_hex_of_canonical(
        &serde_json::to_value(context).map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?,
    )
}

/// A signed promotion override: an operator's attestation that
/// promotion should proceed despite a failed gate composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOverride {
    /// Whether promotion is allowed under this override.
    pub allow_promotion: bool,
    /// Signature algorithm, must be `"ED25519-SHA256"`.
    pub algorithm: String,
    /// Key id of the signer.
    pub key_id: String,
    /// SPKI PEM public key (or resolved externally and passed at
    /// verification time; this field is optional precisely so an
    /// external key file can supply it instead).
    pub public_key_pem: Option<String>,
    /// When the override was issued.
    pub issued_at: DateTime<Utc>,
    /// When the override expires.
    pub expires_at: DateTime<Utc>,
    /// The promotion context hash this override was signed over.
    pub override_context_sha256: String,
    /// Base64 Ed25519 signature over `override_context_sha256`.
    pub signature_base64: String,
}

/// Final promotion verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionVerdict {
    /// Every required report composed successfully.
    Pass,
    /// Composition failed but a valid override authorized promotion anyway.
    OverridePass,
    /// Composition failed and no valid override was supplied.
    Fail,
}

/// Verify a signed promotion override against the computed context hash
/// and the current time. Fails closed on any missing metadata, a future
/// `issued_at`, a past `expires_at`, a context-hash mismatch, or an
/// invalid signature.
///
/// # Errors
///
/// Returns [`ErrorCode::OverrideContextHashMismatch`] if
/// `override_context_sha256` does not equal `promotion_context_sha256`,
/// or [`ErrorCode::SchemaInvalid`] for every other fail-closed condition
/// (bad algorithm, missing public key, out-of-window timestamps, bad
/// signature).
pub fn verify_override(
    override_: &PromotionOverride,
    promotion_context_sha256: &str,
    now: DateTime<Utc>,
    external_public_key_pem: Option<&str>,
) -> Result<(), SettldError> {
    if override_.algorithm != "ED25519-SHA256" {
        return Err(err(ErrorCode::SchemaInvalid, "override algorithm must be ED25519-SHA256"));
    }
    if override_.issued_at > now {
        return Err(err(ErrorCode::SchemaInvalid, "override issuedAt is in the future"));
    }
    if override_.expires_at < now {
        return Err(err(ErrorCode::SchemaInvalid, "override expiresAt is in the past"));
    }
    if override_.override_context_sha256 != promotion_context_sha256 {
        return Err(err(
            ErrorCode::OverrideContextHashMismatch,
            "override context hash does not match the promotion guard's computed context",
        ));
    }
    let public_key_pem = override_
        .public_key_pem
        .as_deref()
        .or(external_public_key_pem)
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, "override has no resolvable public key"))?;
    if !settld_crypto::verify_hash_hex(
        &override_.override_context_sha256,
        &override_.signature_base64,
        public_key_pem,
    ) {
        return Err(err(ErrorCode::SchemaInvalid, "override signature is invalid"));
    }
    if !override_.allow_promotion {
        return Err(err(ErrorCode::SchemaInvalid, "override does not allow promotion"));
    }
    Ok(())
}

/// Evaluate the promotion guard: compose every required report; if
/// composition fails, fall back to a signed override.
pub fn evaluate(
    reports: &[(String, serde_json::Value)],
    requirements: &[ReportRequirement],
    override_: Option<(&PromotionOverride, Option<&str>)>,
    now: DateTime<Utc>,
) -> Result<PromotionVerdict, SettldError> {
    let composition_error = reports
        .iter()
        .zip(requirements.iter())
        .find_map(|((_, report), requirement)| verify_report(report, requirement).err());

    if composition_error.is_none() {
        return Ok(PromotionVerdict::Pass);
    }

    let context = compute_promotion_context(reports);
    let context_hash = promotion_context_hash(&context)?;

    match override_ {
        Some((over, external_key)) => {
            verify_override(over, &context_hash, now, external_key)?;
            Ok(PromotionVerdict::OverridePass)
        }
        None => Ok(PromotionVerdict::Fail),
    }
}
