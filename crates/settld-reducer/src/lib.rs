// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic fold from an event stream into a [`JobSnapshot`].
//!
//! `reduce` is a pure function of its input slice: running it twice over
//! the same events yields byte-equal snapshots, mirroring the teacher's
//! event-aggregator shape generalized from flat counters to a stateful,
//! sub-collection-bearing aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_error::{ErrorCode, SettldError};
use settld_events::Event;
use std::collections::BTreeMap;

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// Access-grant state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    /// No access plan exists yet.
    #[default]
    None,
    /// An access plan has been scheduled.
    Planned,
    /// Access has been granted.
    Granted,
    /// Access was explicitly denied.
    Denied,
    /// Previously granted access was revoked.
    Revoked,
    /// A granted access window has expired.
    Expired,
}

/// Assist-request state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssistState {
    /// No assist request is outstanding.
    #[default]
    None,
    /// An assist has been requested.
    Requested,
    /// The request is queued for an operator.
    Queued,
    /// An operator has been assigned.
    Assigned,
    /// The assigned operator accepted.
    Accepted,
    /// The assigned operator declined.
    Declined,
    /// The request timed out unanswered.
    Timeout,
}

/// Operator-coverage state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageState {
    /// No operator coverage reserved.
    #[default]
    None,
    /// Coverage capacity is reserved.
    Reserved,
    /// Reserved coverage was released.
    Released,
}

/// Settlement-hold sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettlementHoldState {
    /// No hold in effect.
    #[default]
    None,
    /// Settlement is held.
    Held,
    /// A held settlement was released.
    Released,
    /// A held settlement was forfeited.
    Forfeited,
}

/// Booking details bound by a `BOOKED` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Service window start.
    pub window_start: Option<DateTime<Utc>>,
    /// Service window end.
    pub window_end: Option<DateTime<Utc>>,
    /// Zone identifier.
    pub zone: Option<String>,
    /// Service tier.
    pub tier: Option<String>,
    /// The policy snapshot bound at booking time.
    pub policy_snapshot: Option<serde_json::Value>,
    /// `SHA256(canonical(policySnapshot))`, resolved from the booking
    /// payload or recomputed if absent.
    pub policy_hash: Option<String>,
}

/// Execution timestamps, set as the job progresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Assigned robot id.
    pub robot_id: Option<String>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Chain hash of the event that marked completion.
    pub completed_at_chain_hash: Option<String>,
    /// Zone-coverage facts hash recomputed at completion time, from the
    /// booking's zone/window and the assigned robot (§4.5c).
    pub completed_facts_hash: Option<String>,
}

/// A recorded `PROOF_EVALUATED` observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    /// Chain hash the proof was evaluated against.
    pub evaluated_at_chain_hash: String,
    /// Hash of the facts bundle used in evaluation.
    pub facts_hash: String,
    /// Hash of the customer policy used in evaluation.
    pub customer_policy_hash: String,
    /// When this observation was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Reference to a settlement proof, if this is the settlement proof.
    pub settlement_proof_ref: Option<String>,
}

/// The effective-proof resolver's verdict (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EffectiveProofStatus {
    /// Settlement already occurred; the settlement proof is authoritative.
    Settled,
    /// A completion-time recomputation matched the nearest evaluation.
    Fresh,
    /// A completion-time recomputation did not match; facts changed.
    Stale {
        /// The facts hash expected at the completion chain hash.
        expected_facts_hash: String,
    },
    /// No completion yet; report the last-seen proof unresolved.
    LastSeen,
}

/// Sub-state tracking held/released/forfeited settlement holds, retaining
/// prior exposure metadata across transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementHold {
    /// Current hold state.
    pub state: SettlementHoldState,
    /// Exposure metadata, retained across hold/release/forfeit updates.
    pub exposure: Option<serde_json::Value>,
    /// When the hold last transitioned.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A job's derived state, folded from its event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// Job id (the stream id).
    pub id: String,
    /// Tenant owning this job.
    pub tenant_id: String,
    /// Template this job was created from, if any.
    pub template_id: Option<String>,
    /// Booking details.
    pub booking: Booking,
    /// Execution details.
    pub execution: Execution,
    /// Access-grant state.
    pub access_state: AccessState,
    /// Assist-request state.
    pub assist_state: AssistState,
    /// Operator-coverage state.
    pub coverage_state: CoverageState,
    /// Reservation payload, if any (opaque to the reducer).
    pub reservation: Option<serde_json::Value>,
    /// Evidence records keyed by id.
    pub evidence: BTreeMap<String, serde_json::Value>,
    /// Incident records keyed by id.
    pub incidents: BTreeMap<String, serde_json::Value>,
    /// Claim records keyed by id.
    pub claims: BTreeMap<String, serde_json::Value>,
    /// `JOB_ADJUSTED` records keyed by id.
    pub adjustments: BTreeMap<String, serde_json::Value>,
    /// Risk-score records keyed by id.
    pub risk_scores: BTreeMap<String, serde_json::Value>,
    /// The most recently observed proof.
    pub latest_proof: Option<ProofRecord>,
    /// Every `PROOF_EVALUATED` observation seen so far, in event order,
    /// so the effective-proof resolver can search for the nearest match
    /// rather than trusting only the last one (§4.5c).
    pub proof_history: Vec<ProofRecord>,
    /// The effective-proof resolver's verdict, if computable.
    pub effective_proof: Option<EffectiveProofStatus>,
    /// Settlement-hold sub-state.
    pub settlement_hold: SettlementHold,
    /// Settlement lifecycle state, e.g. `"SETTLED"`.
    pub settlement_state: Option<String>,
    /// Dispute payload, if a dispute was raised.
    pub dispute: Option<serde_json::Value>,
    /// Chain hash of the last folded event.
    pub last_chain_hash: String,
    /// Number of events folded.
    pub event_count: usize,
}

impl JobSnapshot {
    fn new(id: String, tenant_id: String, template_id: Option<String>) -> Self {
        Self {
            id,
            tenant_id,
            template_id,
            booking: Booking::default(),
            execution: Execution::default(),
            access_state: AccessState::default(),
            assist_state: AssistState::default(),
            coverage_state: CoverageState::default(),
            reservation: None,
            evidence: BTreeMap::new(),
            incidents: BTreeMap::new(),
            claims: BTreeMap::new(),
            adjustments: BTreeMap::new(),
            risk_scores: BTreeMap::new(),
            latest_proof: None,
            proof_history: Vec::new(),
            effective_proof: None,
            settlement_hold: SettlementHold::default(),
            settlement_state: None,
            dispute: None,
            last_chain_hash: String::new(),
            event_count: 0,
        }
    }

    fn invalidate_for_reschedule(&mut self) {
        self.reservation = None;
        self.coverage_state = CoverageState::None;
        self.assist_state = AssistState::None;
        self.access_state = AccessState::None;
    }
}

fn parse_timestamp(payload: &serde_json::Map<String, serde_json::Value>, field: &str) -> Option<DateTime<Utc>> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn str_field(payload: &serde_json::Map<String, serde_json::Value>, field: &str) -> Option<String> {
    payload.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

fn sub_collection_id(payload: &serde_json::Map<String, serde_json::Value>, event_type: &str) -> Result<String, SettldError> {
    payload
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, format!("{event_type} payload missing id")))
}

/// Fold an event stream into a [`JobSnapshot`].
///
/// # Errors
///
/// Returns [`ErrorCode::StreamMissingJobCreated`] if the first event is
/// not `JOB_CREATED`, or [`ErrorCode::SchemaInvalid`] if a payload is
/// malformed in a way the reducer cannot tolerate (e.g. a sub-collection
/// upsert without an `id`).
pub fn reduce(events: &[Event]) -> Result<JobSnapshot, SettldError> {
    let first = events
        .first()
        .ok_or_else(|| err(ErrorCode::StreamMissingJobCreated, "event stream is empty"))?;
    if first.event_type != "JOB_CREATED" {
        return Err(err(
            ErrorCode::StreamMissingJobCreated,
            "first event is not JOB_CREATED",
        ));
    }
    let payload = first
        .payload
        .as_object()
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, "JOB_CREATED payload must be an object"))?;
    let job_id = str_field(payload, "jobId").unwrap_or_else(|| first.stream_id.clone());
    let tenant_id = str_field(payload, "tenantId")
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, "JOB_CREATED payload missing tenantId"))?;
    let template_id = str_field(payload, "templateId");

    let mut snapshot = JobSnapshot::new(job_id, tenant_id, template_id);

    for event in events {
        apply_event(&mut snapshot, event)?;
        snapshot.last_chain_hash = event.chain_hash.clone();
        snapshot.event_count += 1;
    }

    resolve_effective_proof(&mut snapshot);
    Ok(snapshot)
}

fn apply_event(snapshot: &mut JobSnapshot, event: &Event) -> Result<(), SettldError> {
    let payload = event
        .payload
        .as_object()
        .cloned()
        .unwrap_or_default();

    match event.event_type.as_str() {
        "JOB_CREATED" => {}
        "BOOKED" => {
            snapshot.booking.window_start = parse_timestamp(&payload, "windowStart").or(snapshot.booking.window_start);
            snapshot.booking.window_end = parse_timestamp(&payload, "windowEnd").or(snapshot.booking.window_end);
            snapshot.booking.zone = str_field(&payload, "zone").or_else(|| snapshot.booking.zone.clone());
            snapshot.booking.tier = str_field(&payload, "tier").or_else(|| snapshot.booking.tier.clone());
            if let Some(policy) = payload.get("policySnapshot") {
                snapshot.booking.policy_snapshot = Some(policy.clone());
                snapshot.booking.policy_hash = str_field(&payload, "policyHash").or_else(|| {
                    settld_canon::hash_excluding(policy, &[]).ok()
                });
            }
        }
        "JOB_RESCHEDULED" => {
            snapshot.invalidate_for_reschedule();
        }
        "ASSIST_REQUESTED" => snapshot.assist_state = AssistState::Requested,
        "ASSIST_QUEUED" => snapshot.assist_state = AssistState::Queued,
        "ASSIST_ASSIGNED" => snapshot.assist_state = AssistState::Assigned,
        "ASSIST_ACCEPTED" => snapshot.assist_state = AssistState::Accepted,
        "ASSIST_DECLINED" => snapshot.assist_state = AssistState::Declined,
        "ASSIST_TIMEOUT" => snapshot.assist_state = AssistState::Timeout,
        "ACCESS_PLANNED" => snapshot.access_state = AccessState::Planned,
        "ACCESS_GRANTED" => snapshot.access_state = AccessState::Granted,
        "ACCESS_DENIED" => snapshot.access_state = AccessState::Denied,
        "ACCESS_REVOKED" => snapshot.access_state = AccessState::Revoked,
        "ACCESS_EXPIRED" => snapshot.access_state = AccessState::Expired,
        "OPERATOR_COVERAGE_RESERVED" => {
            snapshot.coverage_state = CoverageState::Reserved;
            snapshot.reservation = Some(event.payload.clone());
        }
        "OPERATOR_COVERAGE_RELEASED" => snapshot.coverage_state = CoverageState::Released,
        "EXECUTION_STARTED" => {
            snapshot.execution.robot_id = str_field(&payload, "robotId").or_else(|| snapshot.execution.robot_id.clone());
            snapshot.execution.started_at = Some(parse_timestamp(&payload, "at").unwrap_or(event.at));
        }
        "EXECUTION_COMPLETED" => {
            snapshot.execution.completed_at = Some(parse_timestamp(&payload, "at").unwrap_or(event.at));
            snapshot.execution.completed_at_chain_hash = Some(event.chain_hash.clone());
            let facts = serde_json::json!({
                "zone": snapshot.booking.zone,
                "windowStart": snapshot.booking.window_start,
                "windowEnd": snapshot.booking.window_end,
                "robotId": snapshot.execution.robot_id,
            });
            snapshot.execution.completed_facts_hash = settld_canon::hash_excluding(&facts, &[]).ok();
        }
        "PROOF_EVALUATED" => {
            let record = ProofRecord {
                evaluated_at_chain_hash: str_field(&payload, "evaluatedAtChainHash").unwrap_or_default(),
                facts_hash: str_field(&payload, "factsHash").unwrap_or_default(),
                customer_policy_hash: str_field(&payload, "customerPolicyHash").unwrap_or_default(),
                recorded_at: event.at,
                settlement_proof_ref: str_field(&payload, "settlementProofRef"),
            };
            snapshot.proof_history.push(record.clone());
            snapshot.latest_proof = Some(record);
        }
        "SETTLEMENT_HELD" => {
            snapshot.settlement_hold.state = SettlementHoldState::Held;
            snapshot.settlement_hold.updated_at = Some(event.at);
            if let Some(exposure) = payload.get("exposure") {
                snapshot.settlement_hold.exposure = Some(exposure.clone());
            }
        }
        "SETTLEMENT_RELEASED" => {
            snapshot.settlement_hold.state = SettlementHoldState::Released;
            snapshot.settlement_hold.updated_at = Some(event.at);
        }
        "SETTLEMENT_FORFEITED" => {
            snapshot.settlement_hold.state = SettlementHoldState::Forfeited;
            snapshot.settlement_hold.updated_at = Some(event.at);
        }
        "SETTLED" => {
            snapshot.settlement_state = Some("SETTLED".to_string());
        }
        "DISPUTE_RAISED" => {
            snapshot.dispute = Some(event.payload.clone());
        }
        "EVIDENCE_CAPTURED" | "EVIDENCE_EXPIRED" => {
            let id = sub_collection_id(&payload, &event.event_type);
            match id {
                Ok(id) => {
                    if event.event_type == "EVIDENCE_EXPIRED" {
                        snapshot
                            .evidence
                            .entry(id)
                            .and_modify(|v| {
                                if let Some(obj) = v.as_object_mut() {
                                    obj.insert("status".into(), serde_json::json!("EXPIRED"));
                                }
                            })
                            .or_insert_with(|| serde_json::json!({"status": "EXPIRED"}));
                    } else {
                        snapshot.evidence.insert(id, event.payload.clone());
                    }
                }
                Err(e) if event.event_type == "EVIDENCE_EXPIRED" => {
                    let _ = e; // idempotent even if the original capture is missing
                }
                Err(e) => return Err(e),
            }
        }
        "INCIDENT_OPENED" | "INCIDENT_UPDATED" | "INCIDENT_CLOSED" => {
            let id = sub_collection_id(&payload, &event.event_type)?;
            snapshot.incidents.insert(id, event.payload.clone());
        }
        "CLAIM_FILED" | "CLAIM_UPDATED" | "CLAIM_APPROVED" | "CLAIM_DENIED" => {
            let id = sub_collection_id(&payload, &event.event_type)?;
            snapshot.claims.insert(id, event.payload.clone());
        }
        "JOB_ADJUSTED" => {
            let id = sub_collection_id(&payload, &event.event_type)?;
            snapshot.adjustments.insert(id, event.payload.clone());
        }
        "RISK_SCORE_RECORDED" => {
            let id = sub_collection_id(&payload, &event.event_type)?;
            snapshot.risk_scores.insert(id, event.payload.clone());
        }
        _ => {}
    }
    Ok(())
}

/// Resolve the effective-proof verdict from the job's accumulated state,
/// per §4.5(c): settled beats completion-recomputation beats last-seen.
///
/// The completion branch recomputes the zone-coverage facts hash and the
/// customer-policy hash from the job's own booking/execution state, then
/// searches `proof_history` for the nearest (most recent) observation
/// whose `evaluatedAtChainHash`, `factsHash`, and `customerPolicyHash` all
/// match — not just the chain hash. Any mismatch across the three fields
/// is STALE, carrying the recomputed `expectedFactsHash`.
fn resolve_effective_proof(snapshot: &mut JobSnapshot) {
    if snapshot.settlement_state.as_deref() == Some("SETTLED") {
        snapshot.effective_proof = Some(EffectiveProofStatus::Settled);
        return;
    }

    let Some(completed_hash) = snapshot.execution.completed_at_chain_hash.clone() else {
        snapshot.effective_proof = snapshot.proof_history.last().map(|_| EffectiveProofStatus::LastSeen);
        return;
    };

    let expected_customer_policy_hash = snapshot.booking.policy_hash.clone().unwrap_or_default();
    let expected_facts_hash = snapshot.execution.completed_facts_hash.clone().unwrap_or_default();

    let nearest_match = snapshot
        .proof_history
        .iter()
        .rev()
        .find(|p| p.evaluated_at_chain_hash == completed_hash)
        .is_some_and(|p| p.facts_hash == expected_facts_hash && p.customer_policy_hash == expected_customer_policy_hash);

    snapshot.effective_proof = Some(if nearest_match {
        EffectiveProofStatus::Fresh
    } else {
        EffectiveProofStatus::Stale { expected_facts_hash }
    });
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

    fn build_chain(steps: Vec<(&str, serde_json::Value)>) -> Vec<Event> {
        let mut chain = EventChain::new();
        for (event_type, payload) in steps {
            let event = next_event(&chain, "job-1", event_type, Utc::now(), payload, actor()).unwrap();
            chain.push_unsigned(event).unwrap();
        }
        chain.events().to_vec()
    }

    #[test]
    fn reduce_requires_job_created_first() {
        let events = build_chain(vec![(
            "ASSIST_REQUESTED",
            serde_json::json!({"jobId": "job-1", "robotId": "r1", "requestedAt": "2026-01-01T00:00:00Z", "priority": "HIGH"}),
        )]);
        // the first event in the stream won't even be JOB_CREATED here, so
        // EventChain::push_unsigned already rejects it — reduce is exercised
        // directly against a hand-built non-conforming slice instead.
        let mut manual = events;
        manual[0].event_type = "SOMETHING_ELSE".into();
        let result = reduce(&manual);
        assert_eq!(result.unwrap_err().code, ErrorCode::StreamMissingJobCreated);
    }

    #[test]
    fn booking_binds_zone_and_tier() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            ("BOOKED", serde_json::json!({"zone": "zone-a", "tier": "gold"})),
        ]);
        let snapshot = reduce(&events).unwrap();
        assert_eq!(snapshot.booking.zone.as_deref(), Some("zone-a"));
        assert_eq!(snapshot.booking.tier.as_deref(), Some("gold"));
    }

    #[test]
    fn reschedule_invalidates_assist_and_coverage() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            (
                "ASSIST_REQUESTED",
                serde_json::json!({"jobId": "job-1", "robotId": "r1", "requestedAt": "2026-01-01T00:00:00Z", "priority": "HIGH"}),
            ),
            ("OPERATOR_COVERAGE_RESERVED", serde_json::json!({"operatorId": "op-1"})),
            ("JOB_RESCHEDULED", serde_json::json!({})),
        ]);
        let snapshot = reduce(&events).unwrap();
        assert_eq!(snapshot.assist_state, AssistState::None);
        assert_eq!(snapshot.coverage_state, CoverageState::None);
        assert!(snapshot.reservation.is_none());
    }

    #[test]
    fn evidence_expired_is_idempotent_without_prior_capture() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            ("EVIDENCE_EXPIRED", serde_json::json!({"id": "ev-1"})),
        ]);
        let snapshot = reduce(&events).unwrap();
        assert!(snapshot.evidence.is_empty());
    }

    #[test]
    fn evidence_expired_updates_existing_capture() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            ("EVIDENCE_CAPTURED", serde_json::json!({"id": "ev-1", "ref": "s3://..."})),
            ("EVIDENCE_EXPIRED", serde_json::json!({"id": "ev-1"})),
        ]);
        let snapshot = reduce(&events).unwrap();
        assert_eq!(snapshot.evidence["ev-1"]["status"], serde_json::json!("EXPIRED"));
    }

    #[test]
    fn effective_proof_is_settled_once_settled() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            (
                "PROOF_EVALUATED",
                serde_json::json!({"evaluatedAtChainHash": "abc", "factsHash": "f1", "customerPolicyHash": "p1"}),
            ),
            ("SETTLED", serde_json::json!({})),
        ]);
        let snapshot = reduce(&events).unwrap();
        assert_eq!(snapshot.effective_proof, Some(EffectiveProofStatus::Settled));
    }

    #[test]
    fn effective_proof_is_stale_when_facts_changed_after_completion() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            (
                "PROOF_EVALUATED",
                serde_json::json!({"evaluatedAtChainHash": "stale-hash", "factsHash": "f1", "customerPolicyHash": "p1"}),
            ),
            ("EXECUTION_COMPLETED", serde_json::json!({})),
        ]);
        let snapshot = reduce(&events).unwrap();
        assert!(matches!(
            snapshot.effective_proof,
            Some(EffectiveProofStatus::Stale { .. })
        ));
    }

    #[test]
    fn effective_proof_is_fresh_when_nearest_history_entry_matches_all_three_fields() {
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
        let booked = next_event(&chain, "job-1", "BOOKED", Utc::now(), serde_json::json!({"zone": "zone-a"}), actor()).unwrap();
        chain.push_unsigned(booked).unwrap();
        let completed = next_event(&chain, "job-1", "EXECUTION_COMPLETED", Utc::now(), serde_json::json!({}), actor()).unwrap();
        let completed_hash = completed.chain_hash.clone();
        chain.push_unsigned(completed).unwrap();

        let expected_facts = serde_json::json!({
            "zone": "zone-a",
            "windowStart": null,
            "windowEnd": null,
            "robotId": null,
        });
        let expected_facts_hash = settld_canon::hash_excluding(&expected_facts, &[]).unwrap();

        // An earlier, unrelated re-evaluation at a different chain hash
        // must not satisfy the "nearest" search.
        let unrelated = next_event(
            &chain,
            "job-1",
            "PROOF_EVALUATED",
            Utc::now(),
            serde_json::json!({"evaluatedAtChainHash": "irrelevant", "factsHash": "x", "customerPolicyHash": "y"}),
            actor(),
        )
        .unwrap();
        chain.push_unsigned(unrelated).unwrap();

        let matching = next_event(
            &chain,
            "job-1",
            "PROOF_EVALUATED",
            Utc::now(),
            serde_json::json!({
                "evaluatedAtChainHash": completed_hash,
                "factsHash": expected_facts_hash,
                "customerPolicyHash": "",
            }),
            actor(),
        )
        .unwrap();
        chain.push_unsigned(matching).unwrap();

        let snapshot = reduce(chain.events()).unwrap();
        assert_eq!(snapshot.effective_proof, Some(EffectiveProofStatus::Fresh));
        assert_eq!(snapshot.proof_history.len(), 2);
    }

    #[test]
    fn effective_proof_is_stale_when_chain_hash_matches_but_policy_hash_does_not() {
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
        let completed = next_event(&chain, "job-1", "EXECUTION_COMPLETED", Utc::now(), serde_json::json!({}), actor()).unwrap();
        let completed_hash = completed.chain_hash.clone();
        chain.push_unsigned(completed).unwrap();

        let expected_facts = serde_json::json!({
            "zone": null,
            "windowStart": null,
            "windowEnd": null,
            "robotId": null,
        });
        let expected_facts_hash = settld_canon::hash_excluding(&expected_facts, &[]).unwrap();

        let proof = next_event(
            &chain,
            "job-1",
            "PROOF_EVALUATED",
            Utc::now(),
            serde_json::json!({
                "evaluatedAtChainHash": completed_hash,
                "factsHash": expected_facts_hash,
                "customerPolicyHash": "stale-customer-policy",
            }),
            actor(),
        )
        .unwrap();
        chain.push_unsigned(proof).unwrap();

        let snapshot = reduce(chain.events()).unwrap();
        assert!(matches!(
            snapshot.effective_proof,
            Some(EffectiveProofStatus::Stale { .. })
        ));
    }

    #[test]
    fn reduce_is_deterministic() {
        let events = build_chain(vec![
            ("JOB_CREATED", serde_json::json!({"jobId": "job-1", "tenantId": "tenant-1"})),
            ("BOOKED", serde_json::json!({"zone": "zone-a"})),
        ]);
        let first = reduce(&events).unwrap();
        let second = reduce(&events).unwrap();
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
        assert_eq!(first.last_chain_hash, events.last().unwrap().chain_hash);
        assert_eq!(first.event_count, events.len());
    }
}
