// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HTTP wire surface for gates, artifacts, ClosePacks, promotions,
//! and agent-card publishing (§6.1).
//!
//! Grounded on `abp-daemon`'s `AppState` / `ApiError: IntoResponse` /
//! `build_app` shape: a single `Router` built over an `Arc<AppState>`,
//! handlers returning `Result<Json<_>, ApiError>`, and domain errors
//! mapped to HTTP status through one shared error type.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::{
    Json, Router,
    extract::{Path as AxPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use settld_artifacts::{
    build_coverage_certificate, build_credit_memo, build_gl_batch, build_incident_packet,
    build_journal_csv, build_monthly_statement, build_party_statement, build_payout_instruction,
    build_proof_receipt, build_settlement_statement, build_work_certificate, Artifact, FundingModel,
    GlEntry, LedgerEntry, MonthlyJobLine,
};
use settld_error::{ErrorCode, SettldError};
use settld_events::{Event, InMemoryStreamLease, StreamLease};
use settld_governance::OperatorAction;
use settld_reducer::JobSnapshot;
use settld_x402::{
    attach_quote, authorize_payment, create_gate, settle, verify, AgentPassport, AuthorizeInputs,
    DecisionBindings, Gate, GateContext, IdempotencyRecord, Quote, RequestBindingMode,
    VerificationSignal, VerifyPolicy, WalletPolicy,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

mod concurrency;
pub use concurrency::{with_deadline, ObjectStore, Store};

const SCHEMA_VERSION_HEALTH: &str = "DaemonHealth.v1";

/// Shared daemon state: the in-memory gate ledger, idempotency index,
/// and the ambient policy/signer configuration gate operations are
/// evaluated against.
pub struct AppState {
    /// Gates by id.
    pub gates: RwLock<HashMap<String, Gate>>,
    /// Idempotency records keyed by `X-Idempotency-Key`.
    pub idempotency_index: RwLock<BTreeMap<String, IdempotencyRecord>>,
    /// Authorization totals already spent today, by tenant.
    pub daily_exposure_cents: RwLock<HashMap<String, i64>>,
    /// The wallet policy every gate is evaluated against.
    pub wallet_policy: WalletPolicy,
    /// Whether the pilot-wide kill switch is active.
    pub kill_switch_active: std::sync::atomic::AtomicBool,
    /// The server signer used to mint Settld-Pay tokens and sign
    /// attestations.
    pub server_signer: settld_crypto::Signer,
    /// The server signer's key id.
    pub server_signer_key_id: String,
    /// Per-gate-id serialization point (§5: "operations on a single
    /// stream must be totally ordered, enforced by a per-stream lease
    /// or transaction"). A gate id is this daemon's streamId.
    pub stream_lease: Arc<InMemoryStreamLease>,
    /// PEM public keys for operator signer key ids recognized for dual
    /// control (§4.12), keyed by `signerKeyId`.
    pub operator_signer_keys: BTreeMap<String, String>,
    /// Operator signer key ids whose dual-control signing privileges
    /// have been revoked.
    pub operator_revoked_signer_keys: std::collections::BTreeSet<String>,
}

/// A uniform API error: an HTTP status, a stable error code, and
/// optional structured details, mirroring the originating workspace's
/// `ApiError::into_response`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    details: Option<serde_json::Value>,
}

impl From<SettldError> for ApiError {
    fn from(e: SettldError) -> Self {
        Self {
            status: StatusCode::from_u16(e.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: e.code.code().to_string(),
            details: e.details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "code": self.code, "details": self.details }));
        (self.status, body).into_response()
    }
}

fn not_found(code: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        code: code.to_string(),
        details: None,
    }
}

/// Build the Axum router with all daemon routes (§6.1).
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/gates", post(cmd_create_gate))
        .route("/gates/{id}", get(cmd_get_gate))
        .route("/gates/{id}/quote", post(cmd_quote_gate))
        .route("/gates/{id}/authorize", post(cmd_authorize_gate))
        .route("/gates/{id}/verify", post(cmd_verify_gate))
        .route("/gates/{id}/settle", post(cmd_settle_gate))
        .route("/admin/kill-switch", post(cmd_set_kill_switch))
        .route("/artifacts/{artifact_type}", post(cmd_build_artifact))
        .route("/closepacks", post(cmd_build_close_pack))
        .route("/promotions/evaluate", post(cmd_evaluate_promotion))
        .route("/agent-cards/{subject_id}/publish", post(cmd_publish_agent_card))
        .with_state(state)
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({
        "schemaVersion": SCHEMA_VERSION_HEALTH,
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGateRequest {
    id: String,
    tenant_id: String,
    payer: String,
    payee: String,
    provider_id: String,
    amount_cents: i64,
    currency: String,
}

async fn cmd_create_gate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGateRequest>,
) -> Result<Json<Gate>, ApiError> {
    let _lease = state.stream_lease.try_acquire(&req.id)?;
    let mut daily = state.daily_exposure_cents.write().await;
    let exposure = *daily.get(&req.tenant_id).unwrap_or(&0);

    let ctx = GateContext {
        kill_switch_active: state.kill_switch_active.load(std::sync::atomic::Ordering::SeqCst),
        wallet_policy: state.wallet_policy.clone(),
        daily_exposure_cents: exposure,
    };

    let gate = create_gate(
        req.id.clone(),
        req.tenant_id.clone(),
        req.payer,
        req.payee,
        req.provider_id,
        req.amount_cents,
        req.currency,
        &ctx,
    )?;

    daily.insert(req.tenant_id, exposure + req.amount_cents);
    state.gates.write().await.insert(req.id, gate.clone());
    Ok(Json(gate))
}

async fn cmd_get_gate(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Json<Gate>, ApiError> {
    state
        .gates
        .read()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("GATE_NOT_FOUND"))
}

async fn cmd_quote_gate(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Json(quote): Json<Quote>,
) -> Result<Json<Gate>, ApiError> {
    let _lease = state.stream_lease.try_acquire(&id)?;
    let mut gates = state.gates.write().await;
    let gate = gates.get_mut(&id).ok_or_else(|| not_found("GATE_NOT_FOUND"))?;
    attach_quote(gate, quote)?;
    Ok(Json(gate.clone()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeGateRequest {
    delegation_chain: Vec<settld_x402::DelegationRecord>,
    agent: AgentPassport,
    audience: String,
    request_sha256: String,
    #[serde(default)]
    policy_version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeGateResponse {
    gate: Gate,
    token: settld_x402::SettldPayToken,
}

async fn cmd_authorize_gate(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
    Json(req): Json<AuthorizeGateRequest>,
) -> Result<Json<AuthorizeGateResponse>, ApiError> {
    let idempotency_key = headers
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let _lease = state.stream_lease.try_acquire(&id)?;
    let mut gates = state.gates.write().await;
    let gate = gates.get_mut(&id).ok_or_else(|| not_found("GATE_NOT_FOUND"))?;
    let mut idx = state.idempotency_index.write().await;

    let inputs = AuthorizeInputs {
        wallet_policy: &state.wallet_policy,
        delegation_chain: &req.delegation_chain,
        agent: &req.agent,
        real_money: None,
        reserve_adapter: None,
        production_mode: false,
        idempotency_key,
        request_sha256: req.request_sha256,
        request_binding_mode: RequestBindingMode::None,
        request_binding_sha256: None,
        audience: req.audience,
        token_ttl: chrono::Duration::minutes(5),
        server_signer: &state.server_signer,
        server_signer_key_id: &state.server_signer_key_id,
        sponsor_ref: None,
        policy_version: req.policy_version.unwrap_or_else(|| state.wallet_policy.version.clone()),
        now: Utc::now(),
    };

    let token = authorize_payment(gate, &mut idx, inputs)?;
    Ok(Json(AuthorizeGateResponse { gate: gate.clone(), token }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyGateRequest {
    signal: VerificationSignal,
    policy: VerifyPolicy,
    bindings: DecisionBindings,
}

async fn cmd_verify_gate(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Json(req): Json<VerifyGateRequest>,
) -> Result<Json<Gate>, ApiError> {
    let _lease = state.stream_lease.try_acquire(&id)?;
    let mut gates = state.gates.write().await;
    let gate = gates.get_mut(&id).ok_or_else(|| not_found("GATE_NOT_FOUND"))?;
    verify(gate, req.signal, &req.policy, req.bindings)?;
    Ok(Json(gate.clone()))
}

async fn cmd_settle_gate(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Json<Gate>, ApiError> {
    let _lease = state.stream_lease.try_acquire(&id)?;
    let mut gates = state.gates.write().await;
    let gate = gates.get_mut(&id).ok_or_else(|| not_found("GATE_NOT_FOUND"))?;
    settle(gate)?;
    Ok(Json(gate.clone()))
}

/// Toggle the pilot-wide kill switch (§4.12: emergency controls require
/// dual control). The request must carry two distinct signed operator
/// actions satisfying [`settld_x402::authorize_kill_switch_toggle`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetKillSwitchRequest {
    active: bool,
    #[serde(default)]
    first: Option<OperatorAction>,
    #[serde(default)]
    second: Option<OperatorAction>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetKillSwitchResponse {
    kill_switch_active: bool,
}

async fn cmd_set_kill_switch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetKillSwitchRequest>,
) -> Result<Json<SetKillSwitchResponse>, ApiError> {
    let (first, second) = match (req.first, req.second) {
        (Some(first), Some(second)) => (first, second),
        (None, None) => {
            return Err(SettldError::new(ErrorCode::OperatorActionRequired, "two operator actions are required").into());
        }
        _ => {
            return Err(SettldError::new(
                ErrorCode::DualControlRequired,
                "dual control requires a second operator action",
            )
            .into());
        }
    };

    if req.active && state.kill_switch_active.load(std::sync::atomic::Ordering::SeqCst) {
        return Err(SettldError::new(ErrorCode::EmergencyKillSwitchActive, "kill switch is already active").into());
    }

    for action in [&first, &second] {
        if state.operator_revoked_signer_keys.contains(&action.signer_key_id) {
            return Err(SettldError::new(
                ErrorCode::OperatorActionSignerRevoked,
                "operator action signer key has been revoked",
            )
            .into());
        }
    }

    let first_key = state
        .operator_signer_keys
        .get(&first.signer_key_id)
        .ok_or_else(|| SettldError::new(ErrorCode::OperatorActionSignerUnknown, "first operator action's signer key is not recognized"))?;
    let second_key = state
        .operator_signer_keys
        .get(&second.signer_key_id)
        .ok_or_else(|| SettldError::new(ErrorCode::OperatorActionSignerUnknown, "second operator action's signer key is not recognized"))?;

    settld_x402::authorize_kill_switch_toggle(&first, first_key, &second, second_key)?;

    state
        .kill_switch_active
        .store(req.active, std::sync::atomic::Ordering::SeqCst);
    Ok(Json(SetKillSwitchResponse { kill_switch_active: req.active }))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtifactRequest {
    #[serde(rename_all = "camelCase")]
    JobDerived {
        job: JobSnapshot,
        events: Vec<Event>,
        #[serde(default)]
        incident_id: Option<String>,
        #[serde(default)]
        credit_amount_cents: Option<i64>,
        #[serde(default)]
        funding_model: Option<FundingModel>,
    },
    #[serde(rename_all = "camelCase")]
    MonthlyStatement {
        tenant_id: String,
        month: String,
        lines: Vec<MonthlyJobLine>,
    },
    #[serde(rename_all = "camelCase")]
    PartyStatement {
        tenant_id: String,
        party_id: String,
        entries: Vec<LedgerEntry>,
    },
    #[serde(rename_all = "camelCase")]
    PayoutInstruction {
        tenant_id: String,
        party_id: String,
        amount_cents: i64,
        currency: String,
    },
    #[serde(rename_all = "camelCase")]
    GlBatch {
        tenant_id: String,
        entries: Vec<GlEntry>,
    },
}

async fn cmd_build_artifact(
    AxPath(artifact_type): AxPath<String>,
    Json(req): Json<ArtifactRequest>,
) -> Result<Json<Artifact>, ApiError> {
    let artifact = match (artifact_type.as_str(), req) {
        ("work-certificate", ArtifactRequest::JobDerived { job, events, .. }) => {
            build_work_certificate(&job, &events)?
        }
        ("proof-receipt", ArtifactRequest::JobDerived { job, events, .. }) => {
            build_proof_receipt(&job, &events)?
        }
        ("incident-packet", ArtifactRequest::JobDerived { job, events, incident_id, .. }) => {
            let incident_id = incident_id.ok_or_else(|| {
                ApiError { status: StatusCode::BAD_REQUEST, code: "SCHEMA_INVALID".into(), details: None }
            })?;
            build_incident_packet(&job, &events, &incident_id)?
        }
        ("credit-memo", ArtifactRequest::JobDerived { job, events, credit_amount_cents, funding_model, .. }) => {
            let amount = credit_amount_cents.ok_or_else(|| {
                ApiError { status: StatusCode::BAD_REQUEST, code: "SCHEMA_INVALID".into(), details: None }
            })?;
            let funding = funding_model.unwrap_or(FundingModel::PlatformAbsorbed);
            build_credit_memo(&job, &events, amount, funding)?
        }
        ("settlement-statement", ArtifactRequest::JobDerived { job, events, .. }) => {
            build_settlement_statement(&job, &events)?
        }
        ("coverage-certificate", ArtifactRequest::JobDerived { job, events, .. }) => {
            build_coverage_certificate(&job, &events)?
        }
        ("monthly-statement", ArtifactRequest::MonthlyStatement { tenant_id, month, lines }) => {
            build_monthly_statement(&tenant_id, &month, lines)?
        }
        ("party-statement", ArtifactRequest::PartyStatement { tenant_id, party_id, entries }) => {
            build_party_statement(&tenant_id, &party_id, entries)?
        }
        ("payout-instruction", ArtifactRequest::PayoutInstruction { tenant_id, party_id, amount_cents, currency }) => {
            build_payout_instruction(&tenant_id, &party_id, amount_cents, &currency)?
        }
        ("gl-batch", ArtifactRequest::GlBatch { tenant_id, entries }) => build_gl_batch(&tenant_id, entries)?,
        ("journal-csv", ArtifactRequest::GlBatch { entries, .. }) => {
            let gl_batch = build_gl_batch("n/a", entries)?;
            build_journal_csv(&gl_batch)?
        }
        _ => {
            return Err(ApiError {
                status: StatusCode::BAD_REQUEST,
                code: "SCHEMA_INVALID".into(),
                details: Some(json!({ "artifactType": artifact_type })),
            });
        }
    };
    Ok(Json(artifact))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClosePackRequest {
    tenant_id: String,
    invoice_id: String,
    files: BTreeMap<String, String>,
}

async fn cmd_build_close_pack(
    Json(req): Json<ClosePackRequest>,
) -> Result<Json<settld_bundle::ClosePack>, ApiError> {
    let files: settld_bundle::FileMap = req
        .files
        .into_iter()
        .map(|(path, contents_base64)| {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD
                .decode(contents_base64)
                .map(|bytes| (path, bytes))
                .map_err(|_| ApiError {
                    status: StatusCode::BAD_REQUEST,
                    code: "SCHEMA_INVALID".into(),
                    details: None,
                })
        })
        .collect::<Result<_, _>>()?;

    let manifest = settld_bundle::build_manifest(&files)?;
    Ok(Json(settld_bundle::ClosePack { files, manifest, head_attestation: None }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluatePromotionRequest {
    reports: Vec<(String, serde_json::Value)>,
    requirements: Vec<settld_promotion::ReportRequirement>,
    #[serde(default)]
    r#override: Option<settld_promotion::PromotionOverride>,
    #[serde(default)]
    override_external_public_key_pem: Option<String>,
}

async fn cmd_evaluate_promotion(
    Json(req): Json<EvaluatePromotionRequest>,
) -> Result<Json<settld_promotion::PromotionVerdict>, ApiError> {
    let override_pair = req
        .r#override
        .as_ref()
        .map(|o| (o, req.override_external_public_key_pem.as_deref()));
    let verdict = settld_promotion::evaluate(&req.reports, &req.requirements, override_pair, Utc::now())?;
    Ok(Json(verdict))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishAgentCardRequest {
    capabilities: Vec<String>,
    attestations: Vec<settld_x402::CapabilityAttestation>,
    required_issuer: String,
}

async fn cmd_publish_agent_card(
    AxPath(subject_id): AxPath<String>,
    Json(req): Json<PublishAgentCardRequest>,
) -> Result<(StatusCode, Json<settld_x402::AgentCard>), ApiError> {
    let card = settld_x402::AgentCard {
        subject_id,
        capabilities: req.capabilities,
        public: true,
    };
    settld_x402::validate_agent_card_publish(&card, &req.attestations, &req.required_issuer)?;
    Ok((StatusCode::CREATED, Json(card)))
}
