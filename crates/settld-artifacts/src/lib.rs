// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Builders for the twelve settld artifact types.
//!
//! Every builder funnels through [`finalize`], the shared hashed-core
//! construction shape: assemble the envelope, hash everything but
//! `artifactHash`, then set it — generalized from the teacher's fluent
//! receipt builder (`ReceiptBuilder::new(...).build()` then
//! `compute_hash`) into one finishing step reused by every artifact type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_canon::{hash_excluding, sha256_hex};
use settld_error::{ErrorCode, SettldError};
use settld_events::Event;
use settld_reducer::JobSnapshot;
use std::collections::{BTreeMap, BTreeSet};

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// Summary of the event stream an artifact was built from (§4.6 rule 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventProof {
    /// Chain hash of the last folded event.
    pub last_chain_hash: String,
    /// Number of events folded.
    pub event_count: usize,
    /// Number of events that carried a signature.
    pub signed_event_count: usize,
    /// Signer key ids that appeared, sorted and deduplicated.
    pub signer_key_ids: Vec<String>,
}

/// Compute the deterministic `eventProof` summary for an event slice.
#[must_use]
pub fn compute_event_proof(events: &[Event]) -> EventProof {
    let mut signer_key_ids = BTreeSet::new();
    let mut signed_event_count = 0;
    for event in events {
        if let Some(key_id) = &event.signer_key_id {
            signer_key_ids.insert(key_id.clone());
            signed_event_count += 1;
        }
    }
    EventProof {
        last_chain_hash: events.last().map(|e| e.chain_hash.clone()).unwrap_or_default(),
        event_count: events.len(),
        signed_event_count,
        signer_key_ids: signer_key_ids.into_iter().collect(),
    }
}

/// One of the twelve artifact types this crate can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactType {
    /// Certificate attesting work performed and its effective proof.
    WorkCertificate,
    /// Receipt of a signed proof evaluation event.
    ProofReceipt,
    /// Packet summarizing one incident.
    IncidentPacket,
    /// Credit memo, optionally with an insurer-recoverable funding model.
    CreditMemo,
    /// Statement of a job's settlement lifecycle.
    SettlementStatement,
    /// Certificate attesting operator coverage for a job.
    CoverageCertificate,
    /// Rollup statement across a tenant's jobs for one calendar month.
    MonthlyStatement,
    /// Per-party ledger statement with sign-convention rollups.
    PartyStatement,
    /// Instruction to pay out funds to one party.
    PayoutInstruction,
    /// General-ledger batch of balanced double-entry postings.
    GlBatch,
    /// CSV rendering of a GL batch for accounting import.
    JournalCsv,
    /// Pointer to an assembled finance pack bundle.
    FinancePackBundle,
}

impl ArtifactType {
    /// The wire string for this artifact type, e.g. `"WORK_CERTIFICATE"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkCertificate => "WORK_CERTIFICATE",
            Self::ProofReceipt => "PROOF_RECEIPT",
            Self::IncidentPacket => "INCIDENT_PACKET",
            Self::CreditMemo => "CREDIT_MEMO",
            Self::SettlementStatement => "SETTLEMENT_STATEMENT",
            Self::CoverageCertificate => "COVERAGE_CERTIFICATE",
            Self::MonthlyStatement => "MONTHLY_STATEMENT",
            Self::PartyStatement => "PARTY_STATEMENT",
            Self::PayoutInstruction => "PAYOUT_INSTRUCTION",
            Self::GlBatch => "GL_BATCH",
            Self::JournalCsv => "JOURNAL_CSV",
            Self::FinancePackBundle => "FINANCE_PACK_BUNDLE",
        }
    }
}

/// A fully constructed, hashed artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Always `"Artifact.v1"`.
    pub schema_version: String,
    /// Which of the twelve artifact types this is.
    pub artifact_type: String,
    /// Artifact identifier, assigned on construction.
    pub artifact_id: String,
    /// When this artifact was generated.
    pub generated_at: DateTime<Utc>,
    /// Owning tenant.
    pub tenant_id: String,
    /// The job this artifact concerns, if job-scoped.
    pub job_id: Option<String>,
    /// The job's event count at the time this artifact was built.
    pub job_version: Option<u64>,
    /// `SHA256(canonical(policySnapshot))` bound to this artifact.
    pub policy_hash: String,
    /// Deterministic event-proof summary.
    pub event_proof: EventProof,
    /// Type-specific body.
    pub body: serde_json::Value,
    /// `SHA256(canonical(self minus artifactHash))`. Never part of its
    /// own hashed core.
    pub artifact_hash: String,
}

const ARTIFACT_HASHED_FIELDS: &[&str] = &["artifactHash"];

/// Everything [`finalize`] needs to assemble an artifact envelope before
/// computing `artifactHash`.
pub struct ArtifactInput {
    /// Artifact type.
    pub artifact_type: ArtifactType,
    /// Owning tenant.
    pub tenant_id: String,
    /// Job id, if job-scoped.
    pub job_id: Option<String>,
    /// Job version (event count) at build time.
    pub job_version: Option<u64>,
    /// Resolved policy hash.
    pub policy_hash: String,
    /// Event-proof summary.
    pub event_proof: EventProof,
    /// Type-specific body.
    pub body: serde_json::Value,
}

/// Assemble and hash an artifact from its envelope fields (§4.6 rule 2).
pub fn finalize(input: ArtifactInput) -> Result<Artifact, SettldError> {
    let mut artifact = Artifact {
        schema_version: "Artifact.v1".to_string(),
        artifact_type: input.artifact_type.as_str().to_string(),
        artifact_id: format!("artf_{}", uuid::Uuid::new_v4()),
        generated_at: Utc::now(),
        tenant_id: input.tenant_id,
        job_id: input.job_id,
        job_version: input.job_version,
        policy_hash: input.policy_hash,
        event_proof: input.event_proof,
        body: input.body,
        artifact_hash: String::new(),
    };
    let value = serde_json::to_value(&artifact)
        .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
    artifact.artifact_hash = hash_excluding(&value, ARTIFACT_HASHED_FIELDS)?;
    Ok(artifact)
}

/// Resolve a policy hash from a job's booking, recomputing from the
/// policy snapshot if `policyHash` wasn't recorded directly.
fn resolve_policy_hash(job: &JobSnapshot) -> Result<String, SettldError> {
    if let Some(hash) = &job.booking.policy_hash {
        return Ok(hash.clone());
    }
    if let Some(snapshot) = &job.booking.policy_snapshot {
        return hash_excluding(snapshot, &[]);
    }
    Ok(String::new())
}

/// Hash an evidence reference string so artifacts never leak raw
/// references (§4.6 rule 4).
fn hashed_evidence_ref(evidence_ref: &str) -> String {
    sha256_hex(evidence_ref.as_bytes())
}

/// Build a `WORK_CERTIFICATE` artifact: effective proof, risk summary,
/// hashed evidence list, and sub-collection counts.
pub fn build_work_certificate(job: &JobSnapshot, events: &[Event]) -> Result<Artifact, SettldError> {
    let evidence_refs: Vec<String> = job
        .evidence
        .values()
        .filter_map(|v| v.get("ref").and_then(|r| r.as_str()))
        .map(hashed_evidence_ref)
        .collect();

    let body = serde_json::json!({
        "effectiveProof": job.effective_proof,
        "riskSummary": job.risk_scores,
        "evidenceRefHashes": evidence_refs,
        "counts": {
            "incidents": job.incidents.len(),
            "claims": job.claims.len(),
            "evidence": job.evidence.len(),
        },
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::WorkCertificate,
        tenant_id: job.tenant_id.clone(),
        job_id: Some(job.id.clone()),
        job_version: Some(job.event_count as u64),
        policy_hash: resolve_policy_hash(job)?,
        event_proof: compute_event_proof(events),
        body,
    })
}

/// Build a `PROOF_RECEIPT` artifact from a job's latest proof observation.
pub fn build_proof_receipt(job: &JobSnapshot, events: &[Event]) -> Result<Artifact, SettldError> {
    let proof = job
        .latest_proof
        .clone()
        .ok_or_else(|| err(ErrorCode::JobProofEventsRequired, "job has no recorded proof"))?;

    let body = serde_json::json!({ "proof": proof });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::ProofReceipt,
        tenant_id: job.tenant_id.clone(),
        job_id: Some(job.id.clone()),
        job_version: Some(job.event_count as u64),
        policy_hash: resolve_policy_hash(job)?,
        event_proof: compute_event_proof(events),
        body,
    })
}

/// Build an `INCIDENT_PACKET` artifact for one incident on a job.
pub fn build_incident_packet(
    job: &JobSnapshot,
    events: &[Event],
    incident_id: &str,
) -> Result<Artifact, SettldError> {
    let incident = job
        .incidents
        .get(incident_id)
        .cloned()
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, format!("unknown incident {incident_id}")))?;

    let body = serde_json::json!({ "incidentId": incident_id, "incident": incident });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::IncidentPacket,
        tenant_id: job.tenant_id.clone(),
        job_id: Some(job.id.clone()),
        job_version: Some(job.event_count as u64),
        policy_hash: resolve_policy_hash(job)?,
        event_proof: compute_event_proof(events),
        body,
    })
}

/// How a credit memo's face amount is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingModel {
    /// The platform absorbs the full credit.
    PlatformAbsorbed,
    /// A portion is recoverable from an insurer.
    InsurerRecoverable {
        /// Percentage (0-100) recoverable from the insurer.
        recoverable_pct: u32,
    },
}

/// Build a `CREDIT_MEMO` artifact. For `InsurerRecoverable`, computes
/// `recoverableCents = floor(amountCents * pct / 100)` and emits a
/// `receivableRefId`.
pub fn build_credit_memo(
    job: &JobSnapshot,
    events: &[Event],
    amount_cents: i64,
    funding_model: FundingModel,
) -> Result<Artifact, SettldError> {
    if amount_cents < 0 {
        return Err(err(ErrorCode::SchemaInvalid, "credit memo amount must be non-negative"));
    }

    let body = match funding_model {
        FundingModel::PlatformAbsorbed => serde_json::json!({
            "amountCents": amount_cents,
            "fundingModel": "platform_absorbed",
        }),
        FundingModel::InsurerRecoverable { recoverable_pct } => {
            let recoverable_cents = (amount_cents * i64::from(recoverable_pct)) / 100;
            serde_json::json!({
                "amountCents": amount_cents,
                "fundingModel": "insurer_recoverable",
                "recoverablePct": recoverable_pct,
                "recoverableCents": recoverable_cents,
                "receivableRefId": format!("recv_{}", uuid::Uuid::new_v4()),
            })
        }
    };

    finalize(ArtifactInput {
        artifact_type: ArtifactType::CreditMemo,
        tenant_id: job.tenant_id.clone(),
        job_id: Some(job.id.clone()),
        job_version: Some(job.event_count as u64),
        policy_hash: resolve_policy_hash(job)?,
        event_proof: compute_event_proof(events),
        body,
    })
}

/// Build a `SETTLEMENT_STATEMENT` artifact from a job's settlement state.
pub fn build_settlement_statement(job: &JobSnapshot, events: &[Event]) -> Result<Artifact, SettldError> {
    let body = serde_json::json!({
        "settlementState": job.settlement_state,
        "settlementHold": job.settlement_hold,
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::SettlementStatement,
        tenant_id: job.tenant_id.clone(),
        job_id: Some(job.id.clone()),
        job_version: Some(job.event_count as u64),
        policy_hash: resolve_policy_hash(job)?,
        event_proof: compute_event_proof(events),
        body,
    })
}

/// Build a `COVERAGE_CERTIFICATE` artifact from a job's operator-coverage
/// state.
pub fn build_coverage_certificate(job: &JobSnapshot, events: &[Event]) -> Result<Artifact, SettldError> {
    let body = serde_json::json!({ "coverageState": job.coverage_state });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::CoverageCertificate,
        tenant_id: job.tenant_id.clone(),
        job_id: Some(job.id.clone()),
        job_version: Some(job.event_count as u64),
        policy_hash: resolve_policy_hash(job)?,
        event_proof: compute_event_proof(events),
        body,
    })
}

/// One job's contribution to a monthly rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyJobLine {
    /// Job id.
    pub job_id: String,
    /// Revenue cents attributed to this job this month.
    pub revenue_cents: i64,
    /// Fee cents attributed to this job this month.
    pub fee_cents: i64,
}

/// Build a `MONTHLY_STATEMENT` artifact rolling up a tenant's jobs for
/// one calendar month.
pub fn build_monthly_statement(
    tenant_id: &str,
    month: &str,
    lines: Vec<MonthlyJobLine>,
) -> Result<Artifact, SettldError> {
    let total_revenue_cents: i64 = lines.iter().map(|l| l.revenue_cents).sum();
    let total_fee_cents: i64 = lines.iter().map(|l| l.fee_cents).sum();

    let body = serde_json::json!({
        "month": month,
        "lines": lines,
        "totalRevenueCents": total_revenue_cents,
        "totalFeeCents": total_fee_cents,
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::MonthlyStatement,
        tenant_id: tenant_id.to_string(),
        job_id: None,
        job_version: None,
        policy_hash: String::new(),
        event_proof: EventProof {
            last_chain_hash: String::new(),
            event_count: 0,
            signed_event_count: 0,
            signer_key_ids: vec![],
        },
        body,
    })
}

/// One ledger entry contributing to a party statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Entry id, used in the allocation digest's sort key.
    pub entry_id: String,
    /// Posting id, used in the allocation digest's sort key.
    pub posting_id: String,
    /// Party id, used in the allocation digest's sort key.
    pub party_id: String,
    /// Ledger account this entry posts to.
    pub account: String,
    /// Signed amount in cents. Negative amounts roll into platform
    /// revenue, operator payable, or customer credits payable buckets
    /// per the sign convention; positive amounts are receivables.
    pub amount_cents: i64,
}

/// Build a `PARTY_STATEMENT` artifact: totals by account, sign-convention
/// rollups, and an allocation digest sorted by entryId/postingId/partyId.
pub fn build_party_statement(
    tenant_id: &str,
    party_id: &str,
    entries: Vec<LedgerEntry>,
) -> Result<Artifact, SettldError> {
    let mut totals_by_account: BTreeMap<String, i64> = BTreeMap::new();
    let mut platform_revenue_cents: i64 = 0;
    let mut operator_payable_cents: i64 = 0;
    let mut customer_credits_payable_cents: i64 = 0;

    for entry in &entries {
        *totals_by_account.entry(entry.account.clone()).or_insert(0) += entry.amount_cents;
        if entry.amount_cents < 0 {
            match entry.account.as_str() {
                "platform_revenue" => platform_revenue_cents += -entry.amount_cents,
                "operator_payable" => operator_payable_cents += -entry.amount_cents,
                "customer_credits_payable" => customer_credits_payable_cents += -entry.amount_cents,
                _ => {}
            }
        }
    }

    let mut digest = entries.clone();
    digest.sort_by(|a, b| {
        (&a.entry_id, &a.posting_id, &a.party_id).cmp(&(&b.entry_id, &b.posting_id, &b.party_id))
    });

    let body = serde_json::json!({
        "partyId": party_id,
        "totalsByAccount": totals_by_account,
        "rollups": {
            "platformRevenueCents": platform_revenue_cents,
            "operatorPayableCents": operator_payable_cents,
            "customerCreditsPayableCents": customer_credits_payable_cents,
        },
        "allocationDigest": digest,
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::PartyStatement,
        tenant_id: tenant_id.to_string(),
        job_id: None,
        job_version: None,
        policy_hash: String::new(),
        event_proof: EventProof {
            last_chain_hash: String::new(),
            event_count: 0,
            signed_event_count: 0,
            signer_key_ids: vec![],
        },
        body,
    })
}

/// Build a `PAYOUT_INSTRUCTION` artifact. USD-only; `amount_cents` must
/// be a positive safe integer.
pub fn build_payout_instruction(
    tenant_id: &str,
    party_id: &str,
    amount_cents: i64,
    currency: &str,
) -> Result<Artifact, SettldError> {
    if currency != "USD" {
        return Err(err(ErrorCode::SchemaInvalid, "payout instructions are USD-only"));
    }
    if amount_cents <= 0 {
        return Err(err(ErrorCode::SchemaInvalid, "payout amount must be a positive integer"));
    }
    if amount_cents > (1i64 << 53) - 1 {
        return Err(err(ErrorCode::CanonicalNumberInvalid, "payout amount exceeds the safe-integer range"));
    }

    let body = serde_json::json!({
        "partyId": party_id,
        "amountCents": amount_cents,
        "currency": currency,
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::PayoutInstruction,
        tenant_id: tenant_id.to_string(),
        job_id: None,
        job_version: None,
        policy_hash: String::new(),
        event_proof: EventProof {
            last_chain_hash: String::new(),
            event_count: 0,
            signed_event_count: 0,
            signer_key_ids: vec![],
        },
        body,
    })
}

/// One double-entry posting line within a GL batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlEntry {
    /// Entry id.
    pub entry_id: String,
    /// Posting id.
    pub posting_id: String,
    /// Party id.
    pub party_id: String,
    /// Ledger account.
    pub account: String,
    /// Signed amount in cents.
    pub amount_cents: i64,
}

/// Build a `GL_BATCH` artifact. Line id is `entryId:postingId:partyId`,
/// sorted; totals are computed per account and per party. Rejected with
/// [`ErrorCode::GlBatchImbalanced`] if the batch does not net to zero.
pub fn build_gl_batch(tenant_id: &str, entries: Vec<GlEntry>) -> Result<Artifact, SettldError> {
    let total_cents: i64 = entries.iter().map(|e| e.amount_cents).sum();
    if total_cents != 0 {
        return Err(err(
            ErrorCode::GlBatchImbalanced,
            format!("GL batch does not net to zero: totalCents={total_cents}"),
        ));
    }

    let mut sorted = entries.clone();
    sorted.sort_by(|a, b| line_id(a).cmp(&line_id(b)));

    let mut totals_by_account: BTreeMap<String, i64> = BTreeMap::new();
    let mut totals_by_party: BTreeMap<String, i64> = BTreeMap::new();
    for entry in &entries {
        *totals_by_account.entry(entry.account.clone()).or_insert(0) += entry.amount_cents;
        *totals_by_party.entry(entry.party_id.clone()).or_insert(0) += entry.amount_cents;
    }

    let lines: Vec<serde_json::Value> = sorted
        .iter()
        .map(|e| serde_json::json!({ "lineId": line_id(e), "entry": e }))
        .collect();

    let body = serde_json::json!({
        "lines": lines,
        "totalsByAccount": totals_by_account,
        "totalsByParty": totals_by_party,
        "totalCents": total_cents,
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::GlBatch,
        tenant_id: tenant_id.to_string(),
        job_id: None,
        job_version: None,
        policy_hash: String::new(),
        event_proof: EventProof {
            last_chain_hash: String::new(),
            event_count: 0,
            signed_event_count: 0,
            signer_key_ids: vec![],
        },
        body,
    })
}

fn line_id(entry: &GlEntry) -> String {
    format!("{}:{}:{}", entry.entry_id, entry.posting_id, entry.party_id)
}

/// Render a finalized `GL_BATCH` artifact's lines as CSV and wrap the
/// result in a `JOURNAL_CSV` artifact.
pub fn build_journal_csv(gl_batch: &Artifact) -> Result<Artifact, SettldError> {
    if gl_batch.artifact_type != ArtifactType::GlBatch.as_str() {
        return Err(err(ErrorCode::SchemaInvalid, "journal csv requires a GL_BATCH artifact"));
    }
    let lines = gl_batch
        .body
        .get("lines")
        .and_then(|v| v.as_array())
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, "GL batch has no lines"))?;

    let mut csv = String::from("lineId,entryId,postingId,partyId,account,amountCents\n");
    for line in lines {
        let line_id = line.get("lineId").and_then(|v| v.as_str()).unwrap_or("");
        let entry = line.get("entry").cloned().unwrap_or(serde_json::Value::Null);
        let entry_id = entry.get("entryId").and_then(|v| v.as_str()).unwrap_or("");
        let posting_id = entry.get("postingId").and_then(|v| v.as_str()).unwrap_or("");
        let party_id = entry.get("partyId").and_then(|v| v.as_str()).unwrap_or("");
        let account = entry.get("account").and_then(|v| v.as_str()).unwrap_or("");
        let amount = entry.get("amountCents").and_then(|v| v.as_i64()).unwrap_or(0);
        csv.push_str(&format!("{line_id},{entry_id},{posting_id},{party_id},{account},{amount}\n"));
    }

    let body = serde_json::json!({ "csv": csv, "sourceGlBatchHash": gl_batch.artifact_hash });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::JournalCsv,
        tenant_id: gl_batch.tenant_id.clone(),
        job_id: None,
        job_version: None,
        policy_hash: String::new(),
        event_proof: EventProof {
            last_chain_hash: String::new(),
            event_count: 0,
            signed_event_count: 0,
            signer_key_ids: vec![],
        },
        body,
    })
}

/// Build a `FINANCE_PACK_BUNDLE` pointer artifact referencing an
/// assembled bundle's manifest hash.
pub fn build_finance_pack_bundle(
    tenant_id: &str,
    bundle_manifest_hash: &str,
    bundle_path: &str,
) -> Result<Artifact, SettldError> {
    let body = serde_json::json!({
        "manifestHash": bundle_manifest_hash,
        "path": bundle_path,
    });

    finalize(ArtifactInput {
        artifact_type: ArtifactType::FinancePackBundle,
        tenant_id: tenant_id.to_string(),
        job_id: None,
        job_version: None,
        policy_hash: String::new(),
        event_proof: EventProof {
            last_chain_hash: String::new(),
            event_count: 0,
            signed_event_count: 0,
            signer_key_ids: vec![],
        },
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_events::{next_event, Actor, EventChain};

    fn actor() -> Actor {
        Actor {
            role: "system".into(),
            id: "sys".into(),
        }
    }

    fn sample_job() -> (JobSnapshot, Vec<Event>) {
        let mut chain = EventChain::new();
        let created = next_event(
            &chain,
            "job-1",
            "JOB_CREATED",
            Utc::now(),
            serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"}),
            actor(),
        )
        .unwrap();
        chain.push_unsigned(created).unwrap();
        let events = chain.events().to_vec();
        (settld_reducer::reduce(&events).unwrap(), events)
    }

    #[test]
    fn work_certificate_has_hashed_core_excluding_artifact_hash() {
        let (job, events) = sample_job();
        let artifact = build_work_certificate(&job, &events).unwrap();
        assert_eq!(artifact.artifact_type, "WORK_CERTIFICATE");
        assert!(!artifact.artifact_hash.is_empty());

        let recomputed = hash_excluding(&serde_json::to_value(&artifact).unwrap(), ARTIFACT_HASHED_FIELDS).unwrap();
        assert_eq!(recomputed, artifact.artifact_hash);
    }

    #[test]
    fn credit_memo_insurer_recoverable_computes_floor_division() {
        let (job, events) = sample_job();
        let artifact = build_credit_memo(
            &job,
            &events,
            1001,
            FundingModel::InsurerRecoverable { recoverable_pct: 50 },
        )
        .unwrap();
        assert_eq!(artifact.body["recoverableCents"], serde_json::json!(500));
        assert!(artifact.body["receivableRefId"].as_str().unwrap().starts_with("recv_"));
    }

    #[test]
    fn gl_batch_rejects_imbalanced_entries() {
        let entries = vec![
            GlEntry {
                entry_id: "e1".into(),
                posting_id: "p1".into(),
                party_id: "party-a".into(),
                account: "platform_revenue".into(),
                amount_cents: 500,
            },
            GlEntry {
                entry_id: "e1".into(),
                posting_id: "p2".into(),
                party_id: "party-b".into(),
                account: "operator_payable".into(),
                amount_cents: -400,
            },
        ];
        let result = build_gl_batch("tenant-1", entries);
        assert_eq!(result.unwrap_err().code, ErrorCode::GlBatchImbalanced);
    }

    #[test]
    fn gl_batch_accepts_balanced_entries_and_sorts_lines() {
        let entries = vec![
            GlEntry {
                entry_id: "e2".into(),
                posting_id: "p1".into(),
                party_id: "party-a".into(),
                account: "platform_revenue".into(),
                amount_cents: 500,
            },
            GlEntry {
                entry_id: "e1".into(),
                posting_id: "p1".into(),
                party_id: "party-b".into(),
                account: "operator_payable".into(),
                amount_cents: -500,
            },
        ];
        let artifact = build_gl_batch("tenant-1", entries).unwrap();
        let lines = artifact.body["lines"].as_array().unwrap();
        assert_eq!(lines[0]["lineId"], serde_json::json!("e1:p1:party-b"));
        assert_eq!(lines[1]["lineId"], serde_json::json!("e2:p1:party-a"));
    }

    #[test]
    fn payout_instruction_rejects_non_usd() {
        let result = build_payout_instruction("tenant-1", "party-a", 1000, "EUR");
        assert_eq!(result.unwrap_err().code, ErrorCode::SchemaInvalid);
    }

    #[test]
    fn payout_instruction_rejects_non_positive_amount() {
        let result = build_payout_instruction("tenant-1", "party-a", 0, "USD");
        assert_eq!(result.unwrap_err().code, ErrorCode::SchemaInvalid);
    }

    #[test]
    fn party_statement_buckets_negative_amounts_by_account() {
        let entries = vec![
            LedgerEntry {
                entry_id: "e1".into(),
                posting_id: "p1".into(),
                party_id: "party-a".into(),
                account: "platform_revenue".into(),
                amount_cents: -300,
            },
            LedgerEntry {
                entry_id: "e2".into(),
                posting_id: "p1".into(),
                party_id: "party-a".into(),
                account: "operator_payable".into(),
                amount_cents: -200,
            },
        ];
        let artifact = build_party_statement("tenant-1", "party-a", entries).unwrap();
        assert_eq!(artifact.body["rollups"]["platformRevenueCents"], serde_json::json!(300));
        assert_eq!(artifact.body["rollups"]["operatorPayableCents"], serde_json::json!(200));
    }

    #[test]
    fn journal_csv_requires_gl_batch_source() {
        let (job, events) = sample_job();
        let artifact = build_work_certificate(&job, &events).unwrap();
        let result = build_journal_csv(&artifact);
        assert_eq!(result.unwrap_err().code, ErrorCode::SchemaInvalid);
    }
}
