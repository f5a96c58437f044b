// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic archive, ClosePack bundler, and timestamp proof.
//!
//! A ClosePack is assembled as an in-memory file map (`path -> bytes`),
//! hashed into a manifest, optionally head-attested, and finally
//! serialized into a store-only archive whose bytes depend only on that
//! file map — mirroring the teacher's deterministic staging-directory
//! conventions (`abp-workspace`) generalized from a filesystem tree to an
//! in-memory map so the same code builds and verifies a bundle without
//! touching disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_canon::{hash_excluding, sha256_hex};
use settld_crypto::Signer;
use settld_error::{ErrorCode, SettldError};
use settld_governance::{GovernancePolicyV2, RevocationListV1};
use std::collections::BTreeMap;

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// An in-memory file map: path (archive-relative, `/`-separated) to raw
/// bytes. This is the common currency for both the manifest builder and
/// the archive codec.
pub type FileMap = BTreeMap<String, Vec<u8>>;

/// Path prefix excluded from manifest hashing and archive traversal.
const VERIFY_PREFIX: &str = "verify/";

fn is_excluded(path: &str) -> bool {
    path.starts_with(VERIFY_PREFIX)
}

/// One hashed entry in a [`ClosePackManifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Archive-relative path.
    pub name: String,
    /// SHA-256 of the file's bytes.
    pub sha256: String,
    /// File size in bytes.
    pub bytes: u64,
}

/// The manifest's hashing policy: which paths are excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingPolicy {
    /// Glob-style exclusion patterns, e.g. `["verify/**"]`.
    pub excludes: Vec<String>,
}

/// Deterministic bundle manifest, schema-tagged `ClosePackManifest.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePackManifest {
    /// Always `"ClosePackManifest.v1"`.
    pub schema_version: String,
    /// The manifest's hashing policy.
    pub hashing_policy: HashingPolicy,
    /// Entries sorted by `name` ascending.
    pub files: Vec<ManifestEntry>,
    /// `SHA256(canonical(self minus manifestHash))`.
    pub manifest_hash: String,
}

const MANIFEST_HASHED_FIELDS: &[&str] = &["manifestHash"];

/// Build a manifest over `files`, excluding `verify/**`, with entries
/// sorted by path ascending (§4.7, §4.8).
pub fn build_manifest(files: &FileMap) -> Result<ClosePackManifest, SettldError> {
    let mut entries: Vec<ManifestEntry> = files
        .iter()
        .filter(|(path, _)| !is_excluded(path))
        .map(|(path, bytes)| ManifestEntry {
            name: path.clone(),
            sha256: sha256_hex(bytes),
            bytes: bytes.len() as u64,
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut manifest = ClosePackManifest {
        schema_version: "ClosePackManifest.v1".to_string(),
        hashing_policy: HashingPolicy {
            excludes: vec!["verify/**".to_string()],
        },
        files: entries,
        manifest_hash: String::new(),
    };
    let value = serde_json::to_value(&manifest)
        .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
    manifest.manifest_hash = hash_excluding(&value, MANIFEST_HASHED_FIELDS)?;
    Ok(manifest)
}

/// Fixed archive timestamp (2000-01-01T00:00:00Z, as epoch seconds) so
/// the archive's bytes are reproducible given only the file map — the
/// teacher's workspaces stage to disk with real mtimes, but a ClosePack
/// must hash identically across builds, so this is a constant instead.
pub const ARCHIVE_EPOCH_SECONDS: i64 = 946_684_800;

const ARCHIVE_MAGIC: &[u8; 8] = b"SETTLDP1";

/// Serialize a file map into a deterministic, store-only (uncompressed)
/// archive. Entry order is path-ascending; every entry carries the fixed
/// [`ARCHIVE_EPOCH_SECONDS`] timestamp rather than a real mtime.
#[must_use]
pub fn write_archive(files: &FileMap) -> Vec<u8> {
    let mut sorted: Vec<(&String, &Vec<u8>)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = Vec::new();
    out.extend_from_slice(ARCHIVE_MAGIC);
    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    for (name, content) in sorted {
        let name_bytes = name.as_bytes();
        out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(&ARCHIVE_EPOCH_SECONDS.to_le_bytes());
        out.extend_from_slice(&(content.len() as u64).to_le_bytes());
        out.extend_from_slice(content);
    }
    out
}

/// Parse an archive produced by [`write_archive`] back into a file map.
///
/// # Errors
///
/// Returns [`ErrorCode::SchemaInvalid`] if the magic header, a length
/// prefix, or the trailing byte count doesn't line up.
pub fn read_archive(bytes: &[u8]) -> Result<FileMap, SettldError> {
    let bad = || err(ErrorCode::SchemaInvalid, "malformed archive");

    if bytes.len() < 12 || &bytes[0..8] != ARCHIVE_MAGIC {
        return Err(bad());
    }
    let mut cursor = 8usize;
    let count = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().map_err(|_| bad())?);
    cursor += 4;

    let mut files = FileMap::new();
    for _ in 0..count {
        let name_len = u32::from_le_bytes(
            bytes
                .get(cursor..cursor + 4)
                .ok_or_else(bad)?
                .try_into()
                .map_err(|_| bad())?,
        ) as usize;
        cursor += 4;
        let name = String::from_utf8(bytes.get(cursor..cursor + name_len).ok_or_else(bad)?.to_vec())
            .map_err(|_| bad())?;
        cursor += name_len;

        let _epoch = i64::from_le_bytes(
            bytes
                .get(cursor..cursor + 8)
                .ok_or_else(bad)?
                .try_into()
                .map_err(|_| bad())?,
        );
        cursor += 8;

        let content_len = u64::from_le_bytes(
            bytes
                .get(cursor..cursor + 8)
                .ok_or_else(bad)?
                .try_into()
                .map_err(|_| bad())?,
        ) as usize;
        cursor += 8;

        let content = bytes.get(cursor..cursor + content_len).ok_or_else(bad)?.to_vec();
        cursor += content_len;

        files.insert(name, content);
    }

    if cursor != bytes.len() {
        return Err(bad());
    }
    Ok(files)
}

/// A time-authority co-signature over `(messageHash, timestamp)` (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampProof {
    /// The hash being timestamped.
    pub message_hash: String,
    /// The attested timestamp.
    pub timestamp: DateTime<Utc>,
    /// Key id of the time authority that signed this proof.
    pub signer_key_id: String,
    /// Base64 Ed25519 signature over the proof core.
    pub signature: String,
}

fn timestamp_proof_core(message_hash: &str, timestamp: DateTime<Utc>, signer_key_id: &str) -> serde_json::Value {
    serde_json::json!({
        "messageHash": message_hash,
        "timestamp": timestamp,
        "signerKeyId": signer_key_id,
    })
}

/// Build a timestamp proof by co-signing `(messageHash, timestamp)` with
/// a time-authority signer.
pub fn build_timestamp_proof(
    message_hash: &str,
    timestamp: DateTime<Utc>,
    signer: &Signer,
    signer_key_id: &str,
) -> Result<TimestampProof, SettldError> {
    let core = timestamp_proof_core(message_hash, timestamp, signer_key_id);
    let hash = settld_canon::sha256_hex_of_canonical(&core)?;
    let signature = settld_crypto::sign_hash_hex(&hash, signer, signer_key_id, "time", "")?;
    Ok(TimestampProof {
        message_hash: message_hash.to_string(),
        timestamp,
        signer_key_id: signer_key_id.to_string(),
        signature,
    })
}

/// Verify a timestamp proof under a time authority's public key.
#[must_use]
pub fn verify_timestamp_proof(proof: &TimestampProof, time_authority_public_key_pem: &str) -> bool {
    let core = timestamp_proof_core(&proof.message_hash, proof.timestamp, &proof.signer_key_id);
    let Ok(hash) = settld_canon::sha256_hex_of_canonical(&core) else {
        return false;
    };
    settld_crypto::verify_hash_hex(&hash, &proof.signature, time_authority_public_key_pem)
}

/// A reference to one sub-bundle embedded in a head attestation's
/// `heads` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadRef {
    /// Name of the referenced sub-bundle, e.g. `"invoice_bundle"`.
    pub name: String,
    /// The referenced bundle's manifest hash.
    pub manifest_hash: String,
    /// The referenced bundle's own head attestation hash, if it has one.
    pub attestation_hash: Option<String>,
}

/// A signed head attestation binding a bundle's manifest hash (and,
/// transitively, any embedded sub-bundles' heads) to one signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadAttestation {
    /// Always `"BundleHeadAttestation.v1"`.
    pub schema_version: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Invoice identifier this attestation covers.
    pub invoice_id: String,
    /// Protocol tag (e.g. `"ClosePack"`, `"InvoiceBundle"`).
    pub protocol: String,
    /// The attested bundle's own manifest hash.
    pub manifest_hash: String,
    /// References to embedded sub-bundles.
    pub heads: Vec<HeadRef>,
    /// Time-authority co-signature, if one was requested.
    pub timestamp_proof: Option<TimestampProof>,
    /// Key id of the signer.
    pub signer_key_id: String,
    /// `SHA256(canonical(self minus attestationHash/signature))`.
    pub attestation_hash: String,
    /// Base64 Ed25519 signature over `attestation_hash`.
    pub signature: String,
}

const ATTESTATION_HASHED_FIELDS: &[&str] = &["attestationHash", "signature"];

impl HeadAttestation {
    /// Recompute this attestation's hash over its hashed core.
    pub fn compute_hash(&self) -> Result<String, SettldError> {
        let value = serde_json::to_value(self)
            .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
        hash_excluding(&value, ATTESTATION_HASHED_FIELDS)
    }

    /// Verify this attestation's signature under the signer's public key.
    #[must_use]
    pub fn verify_signature(&self, public_key_pem: &str) -> bool {
        let Ok(hash) = self.compute_hash() else {
            return false;
        };
        hash == self.attestation_hash && settld_crypto::verify_hash_hex(&hash, &self.signature, public_key_pem)
    }
}

/// Build and sign a head attestation over `manifest_hash`.
#[allow(clippy::too_many_arguments)]
pub fn build_head_attestation(
    tenant_id: &str,
    invoice_id: &str,
    protocol: &str,
    manifest_hash: &str,
    heads: Vec<HeadRef>,
    timestamp_proof: Option<TimestampProof>,
    signer: &Signer,
    signer_key_id: &str,
) -> Result<HeadAttestation, SettldError> {
    let mut attestation = HeadAttestation {
        schema_version: "BundleHeadAttestation.v1".to_string(),
        tenant_id: tenant_id.to_string(),
        invoice_id: invoice_id.to_string(),
        protocol: protocol.to_string(),
        manifest_hash: manifest_hash.to_string(),
        heads,
        timestamp_proof,
        signer_key_id: signer_key_id.to_string(),
        attestation_hash: String::new(),
        signature: String::new(),
    };
    attestation.attestation_hash = attestation.compute_hash()?;
    attestation.signature =
        settld_crypto::sign_hash_hex(&attestation.attestation_hash, signer, signer_key_id, "server", "bundle_head")?;
    Ok(attestation)
}

/// A governed-v2 governance surface for a ClosePack: a signed policy
/// bound to a signed revocation list.
pub struct GovernedV2 {
    /// The signed governance policy.
    pub policy: GovernancePolicyV2,
    /// The signed revocation list the policy is bound to.
    pub revocation_list: RevocationListV1,
}

/// The metering report an invoice bundle must carry: an opaque value
/// plus its job-proof binding (§4.8).
pub struct MeteringReport {
    /// The full metering report value.
    pub value: serde_json::Value,
}

impl MeteringReport {
    fn job_proof_binding(&self) -> Result<(&str, &str, &str), SettldError> {
        let proof = self
            .value
            .get("jobProof")
            .ok_or_else(|| err(ErrorCode::MeteringJobProofBindingRequired, "metering report has no jobProof"))?;
        let embedded_path = proof
            .get("embeddedPath")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err(ErrorCode::MeteringJobProofBindingRequired, "jobProof missing embeddedPath"))?;
        let manifest_hash = proof
            .get("manifestHash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err(ErrorCode::MeteringJobProofBindingRequired, "jobProof missing manifestHash"))?;
        let head_attestation_hash = proof
            .get("headAttestationHash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                err(ErrorCode::MeteringJobProofBindingRequired, "jobProof missing headAttestationHash")
            })?;
        Ok((embedded_path, manifest_hash, head_attestation_hash))
    }
}

/// An embedded invoice bundle: its file map (paths relative to the
/// bundle's own root) plus, if it already carries one, its own manifest
/// hash and head attestation hash.
pub struct InvoiceBundle {
    /// Files making up the invoice bundle, paths relative to its own root.
    pub files: FileMap,
    /// The invoice bundle's own manifest hash, if known.
    pub manifest_hash: Option<String>,
    /// The invoice bundle's own head attestation hash, if it carries one.
    pub head_attestation_hash: Option<String>,
}

/// A signer capability plus the key id it signs as, used for the
/// ClosePack's own head attestation.
pub struct ManifestSigner<'a> {
    /// The signing capability.
    pub signer: &'a Signer,
    /// The key id this signer signs as.
    pub key_id: &'a str,
}

/// Inputs to [`build_close_pack`].
pub struct ClosePackInputs<'a> {
    /// Owning tenant.
    pub tenant_id: String,
    /// Invoice identifier.
    pub invoice_id: String,
    /// The embedded invoice bundle.
    pub invoice_bundle: InvoiceBundle,
    /// Governed-v2 governance surface, or `None` for v1 defaults.
    pub governed: Option<GovernedV2>,
    /// The metering report (must carry a job-proof binding).
    pub metering_report: MeteringReport,
    /// SLA definition + evaluation, if SLA evaluation is enabled.
    pub sla: Option<(serde_json::Value, serde_json::Value)>,
    /// Acceptance criteria + evaluation, if acceptance evaluation is enabled.
    pub acceptance: Option<(serde_json::Value, serde_json::Value)>,
    /// Whether the invoice bundle must already carry a signed head
    /// attestation.
    pub require_invoice_attestation: bool,
    /// Signer for the ClosePack's own head attestation, if one is produced.
    pub manifest_signer: Option<ManifestSigner<'a>>,
    /// Time-authority co-signature for the head attestation, if requested.
    pub timestamp_proof: Option<TimestampProof>,
}

/// The fully assembled result of [`build_close_pack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePack {
    /// Every file in the bundle, including `verify/verification_report.json`.
    pub files: FileMap,
    /// The bundle's manifest (excludes `verify/**`).
    pub manifest: ClosePackManifest,
    /// The bundle's head attestation, if a signer was supplied.
    pub head_attestation: Option<HeadAttestation>,
}

fn default_v1_governance_files() -> (serde_json::Value, serde_json::Value) {
    let policy = serde_json::json!({
        "schemaVersion": "GovernancePolicy.v1-default",
        "note": "no governance-root-signed policy was supplied; v1 defaults apply",
    });
    let revocations = serde_json::json!({
        "schemaVersion": "RevocationList.v1-default",
        "rotations": [],
        "revocations": [],
    });
    (policy, revocations)
}

fn insert_json(files: &mut FileMap, path: &str, value: &serde_json::Value) -> Result<(), SettldError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
    files.insert(path.to_string(), format!("{text}\n").into_bytes());
    Ok(())
}

/// Assemble a ClosePack's file map, manifest, and (optionally) head
/// attestation from invoice, governance, evidence, and SLA/acceptance
/// inputs (§4.8). Deterministic: equal inputs produce an equal file map
/// and therefore an equal `manifestHash` (Testable Property 5 / E7).
///
/// # Errors
///
/// Returns [`ErrorCode::MeteringJobProofBindingRequired`] if the metering
/// report lacks a complete job-proof binding, or
/// [`ErrorCode::InvoiceAttestationRequired`] if `require_invoice_attestation`
/// is set and the invoice bundle has no head attestation hash.
pub fn build_close_pack(inputs: ClosePackInputs<'_>) -> Result<ClosePack, SettldError> {
    let mut files = FileMap::new();

    if inputs.require_invoice_attestation && inputs.invoice_bundle.head_attestation_hash.is_none() {
        return Err(err(
            ErrorCode::InvoiceAttestationRequired,
            "invoice bundle must already carry a signed head attestation",
        ));
    }

    let (governance_policy_json, revocation_list_json) = match &inputs.governed {
        Some(governed) => {
            governed.policy.validate_shape()?;
            let computed = governed.policy.compute_hash()?;
            if computed != governed.policy.policy_hash {
                return Err(err(
                    ErrorCode::GovernancePolicySignatureRequired,
                    "governance policy hash does not match its signed core",
                ));
            }
            let list_computed = governed.revocation_list.compute_hash()?;
            if list_computed != governed.revocation_list.list_hash {
                return Err(err(
                    ErrorCode::RevocationListSignatureRequired,
                    "revocation list hash does not match its signed core",
                ));
            }
            if governed.policy.revocation_list_ref.sha256 != list_computed {
                return Err(err(
                    ErrorCode::GovernancePolicyRevocationRefMismatch,
                    "policy's revocation list reference does not match the bound list",
                ));
            }
            (
                serde_json::to_value(&governed.policy)
                    .map_err(|e| err(ErrorCode::SchemaInvalid, e.to_string()))?,
                serde_json::to_value(&governed.revocation_list)
                    .map_err(|e| err(ErrorCode::SchemaInvalid, e.to_string()))?,
            )
        }
        None => default_v1_governance_files(),
    };
    insert_json(&mut files, "governance/policy.json", &governance_policy_json)?;
    insert_json(&mut files, "governance/revocations.json", &revocation_list_json)?;

    for (path, bytes) in &inputs.invoice_bundle.files {
        files.insert(format!("payload/invoice_bundle/{path}"), bytes.clone());
    }

    let (embedded_path, job_proof_manifest_hash, job_proof_attestation_hash) =
        inputs.metering_report.job_proof_binding()?;
    let evidence_index = serde_json::json!({
        "schemaVersion": "EvidenceIndex.v1",
        "jobProof": {
            "embeddedPath": embedded_path,
            "manifestHash": job_proof_manifest_hash,
            "headAttestationHash": job_proof_attestation_hash,
        },
        "meteringReport": inputs.metering_report.value,
    });
    insert_json(&mut files, "evidence/evidence_index.json", &evidence_index)?;

    if let Some((definition, evaluation)) = &inputs.sla {
        insert_json(&mut files, "sla/sla_definition.json", definition)?;
        insert_json(&mut files, "sla/sla_evaluation.json", evaluation)?;
    }

    if let Some((criteria, evaluation)) = &inputs.acceptance {
        insert_json(&mut files, "acceptance/acceptance_criteria.json", criteria)?;
        insert_json(&mut files, "acceptance/acceptance_evaluation.json", evaluation)?;
    }

    let header = serde_json::json!({
        "schemaVersion": "ClosePackHeader.v1",
        "tenantId": inputs.tenant_id,
        "invoiceId": inputs.invoice_id,
        "invoiceBundle": {
            "manifestHash": inputs.invoice_bundle.manifest_hash,
            "headAttestationHash": inputs.invoice_bundle.head_attestation_hash,
        },
        "governed": inputs.governed.is_some(),
        "hasSla": inputs.sla.is_some(),
        "hasAcceptance": inputs.acceptance.is_some(),
    });
    insert_json(&mut files, "settld.json", &header)?;

    let manifest = build_manifest(&files)?;
    insert_json(&mut files, "manifest.json", &serde_json::to_value(&manifest).map_err(|e| {
        err(ErrorCode::SchemaInvalid, e.to_string())
    })?)?;

    let head_attestation = if let Some(signer) = &inputs.manifest_signer {
        let mut heads = vec![HeadRef {
            name: "invoice_bundle".to_string(),
            manifest_hash: inputs.invoice_bundle.manifest_hash.clone().unwrap_or_default(),
            attestation_hash: inputs.invoice_bundle.head_attestation_hash.clone(),
        }];
        heads.sort_by(|a, b| a.name.cmp(&b.name));
        let attestation = build_head_attestation(
            &inputs.tenant_id,
            &inputs.invoice_id,
            "ClosePack",
            &manifest.manifest_hash,
            heads,
            inputs.timestamp_proof.clone(),
            signer.signer,
            signer.key_id,
        )?;
        insert_json(
            &mut files,
            "attestation/bundle_head_attestation.json",
            &serde_json::to_value(&attestation).map_err(|e| err(ErrorCode::SchemaInvalid, e.to_string()))?,
        )?;
        Some(attestation)
    } else {
        None
    };

    let verification_report = serde_json::json!({
        "schemaVersion": "ClosePackVerificationReport.v1",
        "manifestHash": manifest.manifest_hash,
        "headAttestationHash": head_attestation.as_ref().map(|a| a.attestation_hash.clone()),
        "fileCount": manifest.files.len(),
    });
    insert_json(&mut files, "verify/verification_report.json", &verification_report)?;

    Ok(ClosePack {
        files,
        manifest,
        head_attestation,
    })
}
