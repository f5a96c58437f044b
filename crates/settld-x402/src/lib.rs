// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The x402 authorization gate: a reserve/authorize/verify/settle state
//! machine enforcing wallet-issuer decisions, delegation lineage, spend
//! caps, and kill switches, fail-closed in every degraded case (§4.11).
//!
//! Grounded on the teacher's `AppState`/handler shape (`abp-daemon`) for
//! the gate-as-aggregate-of-operations structure, and its tagged-enum
//! state pattern (`AgentEventKind`) for the authorization/settlement
//! state enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_canon::sha256_hex_of_canonical;
use settld_error::{ErrorCode, SettldError};
use std::collections::BTreeMap;
use std::sync::Arc;

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

const SAFE_INTEGER_MAX: i64 = (1i64 << 53) - 1;

fn check_safe_integer(amount_cents: i64) -> Result<(), SettldError> {
    if !(0..=SAFE_INTEGER_MAX).contains(&amount_cents) {
        return Err(err(ErrorCode::CanonicalNumberInvalid, "amount is outside the safe-integer range"));
    }
    Ok(())
}

// ── Wallet policy ────────────────────────────────────────────────────

/// Per-tenant wallet spend policy (§3, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPolicy {
    /// Policy version, mixed into the policy fingerprint.
    pub version: String,
    /// Per-call amount cap.
    pub max_amount_cents: i64,
    /// Rolling daily authorization cap.
    pub max_daily_authorization_cents: i64,
    /// Payment providers this wallet may use.
    pub allowed_provider_ids: Vec<String>,
    /// Tools this wallet may pay for.
    pub allowed_tool_ids: Vec<String>,
    /// Agent signer keys this wallet may authorize under.
    pub allowed_agent_key_ids: Vec<String>,
    /// Currencies this wallet may pay in.
    pub allowed_currencies: Vec<String>,
    /// Whether a quote is required before authorization.
    pub require_quote: bool,
    /// Whether strict request binding is required.
    pub require_strict_request_binding: bool,
    /// Whether the agent signer key must match an allowlisted key.
    pub require_agent_key_match: bool,
    /// Maximum delegation chain depth this wallet will accept.
    pub max_delegation_depth: u32,
}

impl WalletPolicy {
    /// `SHA256(canonical(policy))`, used by the Settld-Pay token's
    /// `policyFingerprint` claim.
    pub fn fingerprint(&self) -> Result<String, SettldError> {
        sha256_hex_of_canonical(
            &serde_json::to_value(self).map_err(|e| err(ErrorCode::SchemaInvalid, e.to_string()))?,
        )
    }
}

// ── Delegation lineage ───────────────────────────────────────────────

/// One link in a delegation chain: a delegator authorizing a delegatee
/// to spend up to a budget cap, to a bounded depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRecord {
    /// This delegation's id.
    pub delegation_id: String,
    /// Hash of the parent delegation, or empty for a root delegation.
    pub parent_hash: String,
    /// Hash of this delegation (delegatee's reference to it).
    pub child_hash: String,
    /// The delegating party.
    pub delegator: String,
    /// The delegated party.
    pub delegatee: String,
    /// Spend cap granted by this delegation.
    pub budget_cap_cents: i64,
    /// This delegation's depth in the chain (root = 0).
    pub depth: u32,
    /// Maximum depth this delegation's chain may reach.
    pub max_depth: u32,
    /// Expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation timestamp, if revoked.
    pub revoked_at: Option<DateTime<Utc>>,
}

/// The resolved root and effective delegation in a lineage, used to
/// populate `decisionRecord.bindings.spendAuthorization`.
#[derive(Debug, Clone)]
pub struct ResolvedLineage<'a> {
    /// The root delegation (depth 0) of the chain.
    pub root: &'a DelegationRecord,
    /// The effective (leaf) delegation actually being spent against.
    pub effective: &'a DelegationRecord,
}

/// Validate a delegation lineage against a wallet policy and the current
/// time: the effective delegation's depth must not exceed either the
/// wallet policy's or the delegation's own `max_depth`, and the root must
/// be neither revoked nor expired.
///
/// # Errors
///
/// Returns [`ErrorCode::X402WalletPolicyDelegationDepthExceeded`],
/// [`ErrorCode::X402DelegationDepthExceeded`],
/// [`ErrorCode::X402DelegationRevoked`], or
/// [`ErrorCode::X402DelegationExpired`] per §4.11.
pub fn resolve_lineage<'a>(
    chain: &'a [DelegationRecord],
    policy: &WalletPolicy,
    now: DateTime<Utc>,
) -> Result<ResolvedLineage<'a>, SettldError> {
    let root = chain
        .iter()
        .min_by_key(|d| d.depth)
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, "delegation chain is empty"))?;
    let effective = chain
        .iter()
        .max_by_key(|d| d.depth)
        .ok_or_else(|| err(ErrorCode::SchemaInvalid, "delegation chain is empty"))?;

    if effective.depth > policy.max_delegation_depth {
        return Err(err(
            ErrorCode::X402WalletPolicyDelegationDepthExceeded,
            "delegation depth exceeds the wallet policy maximum",
        ));
    }
    if effective.depth > effective.max_depth {
        return Err(err(
            ErrorCode::X402DelegationDepthExceeded,
            "delegation depth exceeds the delegation record's own maximum",
        ));
    }
    if root.revoked_at.is_some() {
        return Err(err(ErrorCode::X402DelegationRevoked, "root delegation has been revoked"));
    }
    if root.expires_at.is_some_and(|exp| exp < now) {
        return Err(err(ErrorCode::X402DelegationExpired, "root delegation has expired"));
    }

    Ok(ResolvedLineage { root, effective })
}

// ── Agent lifecycle and capability attestations ─────────────────────

/// An agent's signer-key lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerKeyStatus {
    /// The key is active and may sign.
    Active,
    /// The key is not active (rotated out, never activated, etc.).
    NotActive,
}

/// An agent's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleStatus {
    /// The agent may transact normally.
    Active,
    /// The agent has been suspended.
    Suspended,
    /// The agent is rate-limited.
    Throttled,
}

/// An agent passport: identity, signer key, and lifecycle status bound
/// to one gate request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPassport {
    /// Agent identifier.
    pub agent_id: String,
    /// Signing key id.
    pub signer_key_id: String,
    /// The signer key's current status.
    pub signer_key_status: SignerKeyStatus,
    /// The agent's current lifecycle status.
    pub lifecycle_status: AgentLifecycleStatus,
}

/// One capability attestation: an issuer vouching an agent card subject
/// holds a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityAttestation {
    /// The attested capability, e.g. `"travel.booking"`.
    pub capability: String,
    /// The issuer that attested it.
    pub issuer: String,
    /// Attestation status; only `"attested"` counts as satisfying §E5.
    pub status: String,
}

/// A subject's agent card: declared capabilities and whether it is
/// published publicly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Subject identifier.
    pub subject_id: String,
    /// Declared capabilities.
    pub capabilities: Vec<String>,
    /// Whether this card is being published publicly.
    pub public: bool,
}

/// Validate that publishing `card` publicly is allowed: every declared
/// capability must carry an `"attested"` attestation from
/// `required_issuer` (Testable Property E5).
///
/// # Errors
///
/// Returns [`ErrorCode::AgentCardPublicAttestationRequired`] if any
/// capability lacks a matching attestation and `card.public` is set.
pub fn validate_agent_card_publish(
    card: &AgentCard,
    attestations: &[CapabilityAttestation],
    required_issuer: &str,
) -> Result<(), SettldError> {
    if !card.public {
        return Ok(());
    }
    for capability in &card.capabilities {
        let attested = attestations
            .iter()
            .any(|a| a.capability == *capability && a.issuer == required_issuer && a.status == "attested");
        if !attested {
            return Err(err(
                ErrorCode::AgentCardPublicAttestationRequired,
                format!("capability {capability} has no attested attestation from {required_issuer}"),
            ));
        }
    }
    Ok(())
}

// ── Reserve adapter ──────────────────────────────────────────────────

/// Outcome of a reserve request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveStatus {
    /// The reserve succeeded.
    Reserved,
    /// The reserve failed.
    Failed,
}

/// A reserve adapter's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResult {
    /// Whether the reserve succeeded.
    pub status: ReserveStatus,
    /// The provider's reserve id, if reserved.
    pub reserve_id: Option<String>,
}

/// Abstract escrow reserve capability (§4.11 "Reserve adapter"). The
/// concrete money-rail provider is out of scope; this is the narrow
/// trait boundary the spec calls for.
pub trait ReserveAdapter: Send + Sync {
    /// Reserve funds for `gate`.
    fn reserve(&self, gate: &Gate) -> Result<ReserveResult, SettldError>;
    /// Release a previously held reserve.
    fn release(&self, reserve_id: &str) -> Result<(), SettldError>;
    /// Forfeit a previously held reserve.
    fn forfeit(&self, reserve_id: &str) -> Result<(), SettldError>;
}

// ── Gate state machine ───────────────────────────────────────────────

/// Authorization lifecycle state (§4.11 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// Gate was created.
    Created,
    /// A price quote was attached.
    Quoted,
    /// The issuer's authorization decision was recorded.
    AuthorizedDecision,
    /// Payment was authorized and a reserve is held.
    Authorized,
    /// Authorization failed; any reserve was rolled back.
    Failed,
}

/// Settlement lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// No settlement decision yet.
    Pending,
    /// Verified green; funds released to the payee.
    Released,
    /// Verified amber; funds held pending review.
    Held,
    /// Verified red; funds refunded to the payer.
    Refunded,
    /// A released settlement was finalized.
    Settled,
}

/// Verification signal from the downstream proof/evidence pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSignal {
    /// Clean — eligible for auto-release.
    Green,
    /// Partial — eligible for a hold or a partial release ratio.
    Amber,
    /// Failed — eligible for refund.
    Red,
}

/// Policy governing how a verification signal maps to a settlement
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPolicy {
    /// Auto-release on green.
    pub auto_release_on_green: bool,
    /// Auto-hold on amber.
    pub auto_hold_on_amber: bool,
    /// Auto-refund on red.
    pub auto_refund_on_red: bool,
    /// Release ratio (0-100) applied when amber does not auto-hold.
    pub amber_release_rate_pct: u8,
}

/// A price quote bound to a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Quote identifier.
    pub quote_id: String,
    /// `SHA256(canonical(quote))`.
    pub quote_sha256: String,
}

/// A reserve held against a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRecord {
    /// Reserve status.
    pub status: ReserveStatus,
    /// The provider's reserve id, if reserved.
    pub reserve_id: Option<String>,
}

/// The policy-decision fingerprint bound into a verification decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecisionFingerprint {
    /// Fingerprint format version.
    pub fingerprint_version: u32,
    /// The wallet policy's fingerprint at decision time.
    pub policy_hash: String,
    /// Hash of the evaluation inputs.
    pub evaluation_hash: String,
}

/// The spend-authorization lineage bound into a verification decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendAuthorizationBinding {
    /// The delegation used for this spend.
    pub delegation_ref: String,
    /// The root delegation of the lineage.
    pub root_delegation_ref: String,
    /// Hash of the root delegation.
    pub root_delegation_hash: String,
    /// The effective (leaf) delegation actually spent against.
    pub effective_delegation_ref: String,
    /// Hash of the effective delegation.
    pub effective_delegation_hash: String,
}

/// Bindings recorded on a verify decision (§4.11 "Verify").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBindings {
    /// Reference to the authorization this decision concerns.
    pub authorization_ref: String,
    /// SHA-256 of the verify request body.
    pub request_sha256: String,
    /// SHA-256 of the verify response body.
    pub response_sha256: String,
    /// Summary of the reserve at decision time.
    pub reserve_summary: ReserveRecord,
    /// The policy-decision fingerprint.
    pub policy_decision_fingerprint: PolicyDecisionFingerprint,
    /// The spend-authorization lineage.
    pub spend_authorization: SpendAuthorizationBinding,
}

/// A recorded verification decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    /// The verification signal received.
    pub signal: VerificationSignal,
    /// Bindings recorded for this decision.
    pub bindings: DecisionBindings,
}

/// One entry in a gate's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// What happened, e.g. `"authorize_payment"`.
    pub action: String,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Outcome code, e.g. `"ok"` or a stable error code.
    pub outcome: String,
}

/// A cached idempotent response: the request body's hash plus the
/// response that was returned for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// SHA-256 of the original request body.
    pub request_sha256: String,
    /// The Settld-Pay token returned for that request.
    pub token: SettldPayToken,
}

/// An x402 gate record (§3, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    /// Gate identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Payer reference.
    pub payer: String,
    /// Payee reference.
    pub payee: String,
    /// Payment provider id.
    pub provider_id: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Price quote, if bound.
    pub quote: Option<Quote>,
    /// Current authorization status.
    pub authorization_status: AuthorizationStatus,
    /// Whether the issuer's authorization decision has been recorded.
    pub issuer_decision_recorded: bool,
    /// The held reserve, if any.
    pub reserve: Option<ReserveRecord>,
    /// Current settlement status.
    pub settlement_status: SettlementStatus,
    /// The most recent verification decision, if any.
    pub verification: Option<VerificationRecord>,
    /// The amount actually released when `settlement_status` is
    /// `Released`: the full `amount_cents` on a green auto-release, or
    /// `amount_cents * amber_release_rate_pct / 100` on an amber
    /// partial release (§4.11 "intermediate ratios apply as defined in
    /// policy").
    pub released_amount_cents: Option<i64>,
    /// Append-only audit trail.
    pub audit_trail: Vec<AuditEntry>,
}

impl Gate {
    fn audit(&mut self, action: &str, outcome: &str) {
        self.audit_trail.push(AuditEntry {
            action: action.to_string(),
            at: Utc::now(),
            outcome: outcome.to_string(),
        });
    }
}

/// Ambient context needed to evaluate gate guards: kill switches,
/// allowlists, and the tenant's running daily exposure.
#[derive(Debug, Clone)]
pub struct GateContext {
    /// Whether the pilot-wide kill switch is active.
    pub kill_switch_active: bool,
    /// The wallet policy governing this tenant.
    pub wallet_policy: WalletPolicy,
    /// Exposure already authorized today for this tenant, in cents.
    pub daily_exposure_cents: i64,
}

/// Create a new gate, evaluating the kill-switch, provider-allowlist,
/// per-call, and daily-cap guards (§4.11 "Guards").
///
/// # Errors
///
/// Returns the documented fail-closed error code for the first guard
/// violated.
pub fn create_gate(
    id: String,
    tenant_id: String,
    payer: String,
    payee: String,
    provider_id: String,
    amount_cents: i64,
    currency: String,
    ctx: &GateContext,
) -> Result<Gate, SettldError> {
    check_safe_integer(amount_cents)?;

    if ctx.kill_switch_active {
        return Err(err(ErrorCode::X402PilotKillSwitchActive, "pilot kill switch is active"));
    }
    if !ctx.wallet_policy.allowed_provider_ids.iter().any(|p| p == &provider_id) {
        return Err(err(ErrorCode::X402PilotProviderNotAllowed, "provider is not on the wallet policy allowlist"));
    }
    if !ctx.wallet_policy.allowed_currencies.iter().any(|c| c == &currency) {
        return Err(err(ErrorCode::SchemaInvalid, "currency is not on the wallet policy allowlist"));
    }
    if amount_cents > ctx.wallet_policy.max_amount_cents {
        return Err(err(ErrorCode::X402PilotAmountLimitExceeded, "amount exceeds the per-call cap"));
    }
    let projected = ctx.daily_exposure_cents + amount_cents;
    if projected > ctx.wallet_policy.max_daily_authorization_cents {
        return Err(err(ErrorCode::X402PilotDailyLimitExceeded, "tenant daily authorization cap would be exceeded")
            .with_details(serde_json::json!({
                "currentCents": ctx.daily_exposure_cents,
                "projectedCents": projected,
                "capCents": ctx.wallet_policy.max_daily_authorization_cents,
            })));
    }

    let mut gate = Gate {
        id,
        tenant_id,
        payer,
        payee,
        provider_id,
        amount_cents,
        currency,
        quote: None,
        authorization_status: AuthorizationStatus::Created,
        issuer_decision_recorded: false,
        reserve: None,
        settlement_status: SettlementStatus::Pending,
        verification: None,
        released_amount_cents: None,
        audit_trail: vec![],
    };
    gate.audit("create", "ok");
    Ok(gate)
}

/// Attach a price quote to a gate, transitioning `CREATED -> QUOTED`.
pub fn attach_quote(gate: &mut Gate, quote: Quote) -> Result<(), SettldError> {
    if gate.authorization_status != AuthorizationStatus::Created {
        return Err(err(ErrorCode::SchemaInvalid, "quote can only be attached to a created gate"));
    }
    gate.quote = Some(quote);
    gate.authorization_status = AuthorizationStatus::Quoted;
    gate.audit("quote", "ok");
    Ok(())
}

/// Record the issuer's authorization decision, transitioning
/// `QUOTED -> AUTHORIZED_DECISION`.
///
/// # Errors
///
/// Returns [`ErrorCode::X402WalletIssuerDecisionRequired`] if the wallet
/// policy requires a quote but none is bound.
pub fn record_issuer_decision(gate: &mut Gate, wallet_policy: &WalletPolicy) -> Result<(), SettldError> {
    if wallet_policy.require_quote && gate.quote.is_none() {
        return Err(err(ErrorCode::X402WalletIssuerDecisionRequired, "wallet policy requires a quote before an issuer decision"));
    }
    gate.issuer_decision_recorded = true;
    gate.authorization_status = AuthorizationStatus::AuthorizedDecision;
    gate.audit("issuer_decision", "ok");
    Ok(())
}

/// Real-money execution flags consulted at authorize-payment time.
#[derive(Debug, Clone)]
pub struct RealMoneyContext {
    /// Whether real-money execution is enabled at all.
    pub enabled: bool,
    /// Whether the payee has a connected Stripe Connect account.
    pub payee_has_stripe_connect_account: bool,
    /// The counterparty reference Stripe Connect reports, if any.
    pub stripe_connect_counterparty_ref: Option<String>,
    /// The expected counterparty reference for this payee.
    pub expected_counterparty_ref: String,
    /// Whether the payout kill switch is active.
    pub payout_kill_switch_active: bool,
}

fn check_real_money(ctx: &RealMoneyContext) -> Result<(), SettldError> {
    if !ctx.enabled {
        return Err(err(ErrorCode::RealMoneyDisabled, "real-money execution is disabled by policy"));
    }
    if !ctx.payee_has_stripe_connect_account {
        return Err(err(ErrorCode::StripeConnectAccountRequired, "payee has no Stripe Connect account"));
    }
    if ctx
        .stripe_connect_counterparty_ref
        .as_deref()
        .is_some_and(|r| r != ctx.expected_counterparty_ref)
    {
        return Err(err(ErrorCode::StripeConnectCounterpartyMismatch, "Stripe Connect counterparty reference mismatch"));
    }
    if ctx.payout_kill_switch_active {
        return Err(err(ErrorCode::PayoutKillSwitchActive, "payout kill switch is active"));
    }
    Ok(())
}

/// Everything `authorize_payment` needs beyond the gate itself.
pub struct AuthorizeInputs<'a> {
    /// The wallet policy governing this tenant.
    pub wallet_policy: &'a WalletPolicy,
    /// The delegation chain authorizing this spend.
    pub delegation_chain: &'a [DelegationRecord],
    /// The acting agent's passport.
    pub agent: &'a AgentPassport,
    /// Real-money execution context, if this gate settles real money.
    pub real_money: Option<&'a RealMoneyContext>,
    /// The reserve adapter; `None` means no external reserve is wired
    /// up (only acceptable outside production mode).
    pub reserve_adapter: Option<&'a dyn ReserveAdapter>,
    /// Whether this deployment is running in production mode.
    pub production_mode: bool,
    /// The caller's idempotency key.
    pub idempotency_key: String,
    /// SHA-256 of the authorize request body, for idempotency replay
    /// detection.
    pub request_sha256: String,
    /// Whether request binding is strict for this request.
    pub request_binding_mode: RequestBindingMode,
    /// SHA-256 of the bound request, if strict.
    pub request_binding_sha256: Option<String>,
    /// Audience (payee provider id) the token is scoped to.
    pub audience: String,
    /// Token validity window.
    pub token_ttl: chrono::Duration,
    /// Server signer used to mint the Settld-Pay token.
    pub server_signer: &'a settld_crypto::Signer,
    /// Key id the server signer signs as.
    pub server_signer_key_id: &'a str,
    /// Sponsor reference, if any.
    pub sponsor_ref: Option<String>,
    /// The wallet policy's version tag, carried into the token.
    pub policy_version: String,
    /// Now, injected for determinism in tests.
    pub now: DateTime<Utc>,
}

/// `requestBindingMode` on a Settld-Pay token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBindingMode {
    /// No request binding.
    None,
    /// Strict: the token is bound to exactly one request body hash.
    Strict,
}

/// Spend-authorization claims carried by a Settld-Pay token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendAuthorizationClaims {
    /// Sponsor reference, if any.
    pub sponsor_ref: Option<String>,
    /// The acting agent's signer key id.
    pub agent_key_id: String,
    /// The effective delegation reference.
    pub delegation_ref: String,
    /// The root delegation reference.
    pub root_delegation_ref: String,
    /// Wallet policy version.
    pub policy_version: String,
    /// Wallet policy fingerprint.
    pub policy_fingerprint: String,
}

/// A signed Settld-Pay bearer token proving a payer-authorized payment
/// is in force for one gate (§3, glossary "Settld-Pay Token").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettldPayToken {
    /// The gate this token authorizes payment for.
    pub gate_id: String,
    /// The intended audience (payee provider id).
    pub audience: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Currency.
    pub currency: String,
    /// Request binding mode.
    pub request_binding_mode: RequestBindingMode,
    /// SHA-256 of the bound request, if strict.
    pub request_binding_sha256: Option<String>,
    /// Bound quote id, if quote-bound.
    pub quote_id: Option<String>,
    /// Bound quote hash, if quote-bound.
    pub quote_sha256: Option<String>,
    /// Spend-authorization claims.
    pub spend_authorization: SpendAuthorizationClaims,
    /// A fresh nonce.
    pub nonce: String,
    /// The idempotency key this token was minted under.
    pub idempotency_key: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Key id of the server signer.
    pub signer_key_id: String,
    /// Base64 Ed25519 signature over the token's hashed core.
    pub signature: String,
}

const TOKEN_HASHED_FIELDS: &[&str] = &["signature"];

impl SettldPayToken {
    fn compute_hash(&self) -> Result<String, SettldError> {
        let value = serde_json::to_value(self).map_err(|e| err(ErrorCode::SchemaInvalid, e.to_string()))?;
        settld_canon::hash_excluding(&value, TOKEN_HASHED_FIELDS)
    }

    /// Verify this token's signature under the server signer's public key.
    #[must_use]
    pub fn verify_signature(&self, public_key_pem: &str) -> bool {
        let Ok(hash) = self.compute_hash() else {
            return false;
        };
        settld_crypto::verify_hash_hex(&hash, &self.signature, public_key_pem)
    }
}

fn mint_token(gate: &Gate, inputs: &AuthorizeInputs<'_>, lineage: &ResolvedLineage<'_>) -> Result<SettldPayToken, SettldError> {
    let spend_authorization = SpendAuthorizationClaims {
        sponsor_ref: inputs.sponsor_ref.clone(),
        agent_key_id: inputs.agent.signer_key_id.clone(),
        delegation_ref: lineage.effective.delegation_id.clone(),
        root_delegation_ref: lineage.root.delegation_id.clone(),
        policy_version: inputs.policy_version.clone(),
        policy_fingerprint: inputs.wallet_policy.fingerprint()?,
    };
    let mut token = SettldPayToken {
        gate_id: gate.id.clone(),
        audience: inputs.audience.clone(),
        amount_cents: gate.amount_cents,
        currency: gate.currency.clone(),
        request_binding_mode: inputs.request_binding_mode,
        request_binding_sha256: inputs.request_binding_sha256.clone(),
        quote_id: gate.quote.as_ref().map(|q| q.quote_id.clone()),
        quote_sha256: gate.quote.as_ref().map(|q| q.quote_sha256.clone()),
        spend_authorization,
        nonce: uuid::Uuid::new_v4().to_string(),
        idempotency_key: inputs.idempotency_key.clone(),
        expires_at: inputs.now + inputs.token_ttl,
        signer_key_id: inputs.server_signer_key_id.to_string(),
        signature: String::new(),
    };
    let hash = token.compute_hash()?;
    token.signature = settld_crypto::sign_hash_hex(&hash, inputs.server_signer, inputs.server_signer_key_id, "server", "x402_token")?;
    Ok(token)
}

/// Authorize payment on a gate: evaluates delegation, signer, agent
/// lifecycle, and (if applicable) real-money guards, then reserves funds
/// through `inputs.reserve_adapter` and mints a Settld-Pay token.
/// Replays of the same idempotency key with an identical request body
/// return the same token; a differing body collides with
/// `IDEMPOTENCY_KEY_CONFLICT` (§4.11 "Token minting").
///
/// # Errors
///
/// Returns the documented fail-closed code for the first guard violated,
/// or [`ErrorCode::X402ReserveUnavailable`] / [`ErrorCode::X402ReserveFailed`]
/// at the reserve step. On reserve failure the gate transitions to
/// `Failed` and no wallet lock is retained (there is nothing to roll
/// back at this layer — the escrow lock lives in the caller's wallet
/// ledger, which must release it on a `Failed` transition).
pub fn authorize_payment(
    gate: &mut Gate,
    idempotency_index: &mut BTreeMap<String, IdempotencyRecord>,
    inputs: AuthorizeInputs<'_>,
) -> Result<SettldPayToken, SettldError> {
    if let Some(existing) = idempotency_index.get(&inputs.idempotency_key) {
        if existing.request_sha256 == inputs.request_sha256 {
            return Ok(existing.token.clone());
        }
        return Err(err(ErrorCode::IdempotencyKeyConflict, "idempotency key replayed with a different request body"));
    }

    let lineage = resolve_lineage(inputs.delegation_chain, inputs.wallet_policy, inputs.now)?;

    if inputs.agent.signer_key_status != SignerKeyStatus::Active {
        return Err(err(ErrorCode::X402AgentSignerKeyInvalid, "agent signer key is not active")
            .with_details(serde_json::json!({ "reasonCode": "SIGNER_KEY_NOT_ACTIVE" })));
    }
    match inputs.agent.lifecycle_status {
        AgentLifecycleStatus::Suspended => return Err(err(ErrorCode::X402AgentSuspended, "agent is suspended")),
        AgentLifecycleStatus::Throttled => return Err(err(ErrorCode::X402AgentThrottled, "agent is throttled")),
        AgentLifecycleStatus::Active => {}
    }
    if inputs.wallet_policy.require_agent_key_match
        && !inputs.wallet_policy.allowed_agent_key_ids.iter().any(|k| k == &inputs.agent.signer_key_id)
    {
        return Err(err(ErrorCode::X402AgentSignerKeyInvalid, "agent signer key is not on the wallet policy allowlist")
            .with_details(serde_json::json!({ "reasonCode": "SIGNER_KEY_NOT_ACTIVE" })));
    }
    if let Some(real_money) = inputs.real_money {
        check_real_money(real_money)?;
    }

    let adapter = match (inputs.production_mode, inputs.reserve_adapter) {
        (true, None) => {
            return Err(err(ErrorCode::X402ReserveUnavailable, "no external reserve adapter is configured in production mode"));
        }
        (_, Some(adapter)) => Some(adapter),
        (false, None) => None,
    };

    let reserve_result = match adapter {
        Some(adapter) => adapter.reserve(gate)?,
        None => ReserveResult {
            status: ReserveStatus::Reserved,
            reserve_id: Some(format!("dev-reserve-{}", gate.id)),
        },
    };

    if reserve_result.status == ReserveStatus::Failed {
        gate.reserve = Some(ReserveRecord {
            status: ReserveStatus::Failed,
            reserve_id: reserve_result.reserve_id,
        });
        gate.authorization_status = AuthorizationStatus::Failed;
        gate.audit("authorize_payment", "X402_RESERVE_FAILED");
        return Err(err(ErrorCode::X402ReserveFailed, "reserve adapter rejected the reserve request"));
    }

    gate.reserve = Some(ReserveRecord {
        status: reserve_result.status,
        reserve_id: reserve_result.reserve_id,
    });
    gate.authorization_status = AuthorizationStatus::Authorized;
    gate.audit("authorize_payment", "ok");

    let token = mint_token(gate, &inputs, &lineage)?;
    idempotency_index.insert(
        inputs.idempotency_key.clone(),
        IdempotencyRecord {
            request_sha256: inputs.request_sha256.clone(),
            token: token.clone(),
        },
    );
    Ok(token)
}

/// Verify a gate's outcome and transition settlement accordingly
/// (§4.11 "Verify"): green releases (if `auto_release_on_green`), amber
/// holds (if `auto_hold_on_amber`, else applies `amber_release_rate_pct`
/// as a partial release), red refunds (if `auto_refund_on_red`).
pub fn verify(
    gate: &mut Gate,
    signal: VerificationSignal,
    policy: &VerifyPolicy,
    bindings: DecisionBindings,
) -> Result<(), SettldError> {
    if gate.authorization_status != AuthorizationStatus::Authorized {
        return Err(err(ErrorCode::SchemaInvalid, "verify requires an authorized gate"));
    }

    let (status, released_amount_cents) = match signal {
        VerificationSignal::Green if policy.auto_release_on_green => {
            (SettlementStatus::Released, Some(gate.amount_cents))
        }
        VerificationSignal::Amber if policy.auto_hold_on_amber => (SettlementStatus::Held, None),
        VerificationSignal::Amber => {
            let rate_pct = i64::from(policy.amber_release_rate_pct.min(100));
            (SettlementStatus::Released, Some(gate.amount_cents * rate_pct / 100))
        }
        VerificationSignal::Red if policy.auto_refund_on_red => (SettlementStatus::Refunded, None),
        VerificationSignal::Green | VerificationSignal::Red => (SettlementStatus::Held, None),
    };
    gate.settlement_status = status;
    gate.released_amount_cents = released_amount_cents;

    gate.verification = Some(VerificationRecord { signal, bindings });
    gate.audit("verify", &format!("{signal:?}"));
    Ok(())
}

/// Finalize settlement, transitioning `RELEASED -> SETTLED`.
pub fn settle(gate: &mut Gate) -> Result<(), SettldError> {
    if gate.settlement_status != SettlementStatus::Released {
        return Err(err(ErrorCode::SchemaInvalid, "settle requires a released gate"));
    }
    gate.settlement_status = SettlementStatus::Settled;
    gate.audit("settle", "ok");
    Ok(())
}

// ── Emergency controls ───────────────────────────────────────────────

/// Roles permitted to toggle the pilot-wide kill switch (§4.12).
pub const KILL_SWITCH_ALLOWED_ROLES: &[&str] = &["security_lead", "compliance_officer"];

/// Authorize a kill-switch toggle via dual control: two distinct,
/// validly signed operator actions from distinct operators and signer
/// keys, both naming the `"kill_switch"` action and drawn from
/// [`KILL_SWITCH_ALLOWED_ROLES`] (§4.12).
///
/// # Errors
///
/// Returns the documented `OPERATOR_ACTION_*` / `DUAL_CONTROL_*` error
/// for the first check violated.
pub fn authorize_kill_switch_toggle(
    first: &settld_governance::OperatorAction,
    first_public_key_pem: &str,
    second: &settld_governance::OperatorAction,
    second_public_key_pem: &str,
) -> Result<(), SettldError> {
    settld_governance::verify_dual_control(
        "kill_switch",
        first,
        first_public_key_pem,
        second,
        second_public_key_pem,
        KILL_SWITCH_ALLOWED_ROLES,
    )
}

// ── Chargeback / negative-balance policy ────────────────────────────

/// How a party's negative balance is handled against future payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeBalanceMode {
    /// Block payouts entirely while exposure is outstanding.
    Hold,
    /// Net the outstanding exposure off the next payout.
    Net,
}

/// A party's accrued chargeback exposure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyExposure {
    /// Outstanding exposure in cents.
    pub outstanding_cents: i64,
}

/// Result of applying the chargeback policy to a prospective payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutOutcome {
    /// The amount actually payable after recovery, in cents.
    pub effective_cents: i64,
    /// Amount recovered from outstanding exposure, in cents.
    pub recovered_cents: i64,
    /// The party's exposure after this payout.
    pub remaining_exposure: PartyExposure,
}

/// Apply the chargeback/negative-balance policy to a prospective payout.
///
/// # Errors
///
/// Returns [`ErrorCode::NegativeBalancePayoutHold`] if
/// `mode == NegativeBalanceMode::Hold` and the party carries outstanding
/// exposure.
pub fn apply_payout(
    mode: NegativeBalanceMode,
    exposure: PartyExposure,
    requested_cents: i64,
) -> Result<PayoutOutcome, SettldError> {
    check_safe_integer(requested_cents)?;

    if exposure.outstanding_cents > 0 && mode == NegativeBalanceMode::Hold {
        return Err(err(ErrorCode::NegativeBalancePayoutHold, "negative balance is held against future payouts"));
    }

    let recovered = exposure.outstanding_cents.min(requested_cents);
    let effective = requested_cents - recovered;
    let remaining = PartyExposure {
        outstanding_cents: exposure.outstanding_cents - recovered,
    };

    Ok(PayoutOutcome {
        effective_cents: effective,
        recovered_cents: recovered,
        remaining_exposure: remaining,
    })
}

/// Payout guards independent of the chargeback policy: per-call and
/// daily caps, and the payout kill switch (§4.11).
pub fn check_payout_limits(
    amount_cents: i64,
    max_amount_cents: i64,
    daily_exposure_cents: i64,
    max_daily_cents: i64,
    kill_switch_active: bool,
) -> Result<(), SettldError> {
    check_safe_integer(amount_cents)?;
    if kill_switch_active {
        return Err(err(ErrorCode::PayoutKillSwitchActive, "payout kill switch is active"));
    }
    if amount_cents > max_amount_cents {
        return Err(err(ErrorCode::PayoutAmountLimitExceeded, "payout exceeds the per-call cap"));
    }
    if daily_exposure_cents + amount_cents > max_daily_cents {
        return Err(err(ErrorCode::PayoutDailyLimitExceeded, "payout would exceed the daily cap"));
    }
    Ok(())
}

/// A trivial in-memory reserve adapter used by dev/test callers who want
/// `production_mode: true` behavior without a real money-rail provider.
/// Never used when `production_mode` is actually set in a shipped build.
pub struct StubReserveAdapter {
    /// Whether `reserve` should report success.
    pub succeed: bool,
}

impl ReserveAdapter for StubReserveAdapter {
    fn reserve(&self, gate: &Gate) -> Result<ReserveResult, SettldError> {
        Ok(if self.succeed {
            ReserveResult {
                status: ReserveStatus::Reserved,
                reserve_id: Some(format!("stub-{}", gate.id)),
            }
        } else {
            ReserveResult {
                status: ReserveStatus::Failed,
                reserve_id: None,
            }
        })
    }

    fn release(&self, _reserve_id: &str) -> Result<(), SettldError> {
        Ok(())
    }

    fn forfeit(&self, _reserve_id: &str) -> Result<(), SettldError> {
        Ok(())
    }
}

fn _assert_send_sync<T: Send + Sync>() {}
fn _assert_reserve_adapter_object_safe(_: Arc<dyn ReserveAdapter>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn wallet_policy() -> WalletPolicy {
        WalletPolicy {
            version: "v1".into(),
            max_amount_cents: 100_000,
            max_daily_authorization_cents: 500_000,
            allowed_provider_ids: vec!["provider-a".into()],
            allowed_tool_ids: vec!["tool-a".into()],
            allowed_agent_key_ids: vec!["key_agent".into()],
            allowed_currencies: vec!["USD".into()],
            require_quote: false,
            require_strict_request_binding: false,
            require_agent_key_match: true,
            max_delegation_depth: 3,
        }
    }

    fn gate_ctx() -> GateContext {
        GateContext {
            kill_switch_active: false,
            wallet_policy: wallet_policy(),
            daily_exposure_cents: 0,
        }
    }

    fn root_delegation() -> DelegationRecord {
        DelegationRecord {
            delegation_id: "deleg-root".into(),
            parent_hash: String::new(),
            child_hash: "hash-root".into(),
            delegator: "sponsor".into(),
            delegatee: "agent".into(),
            budget_cap_cents: 1_000_000,
            depth: 0,
            max_depth: 3,
            expires_at: None,
            revoked_at: None,
        }
    }

    fn agent_passport() -> AgentPassport {
        AgentPassport {
            agent_id: "agent-1".into(),
            signer_key_id: "key_agent".into(),
            signer_key_status: SignerKeyStatus::Active,
            lifecycle_status: AgentLifecycleStatus::Active,
        }
    }

    #[test]
    fn create_gate_rejects_kill_switch() {
        let mut ctx = gate_ctx();
        ctx.kill_switch_active = true;
        let result = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 500, "USD".into(), &ctx,
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::X402PilotKillSwitchActive);
    }

    #[test]
    fn create_gate_rejects_unlisted_provider() {
        let ctx = gate_ctx();
        let result = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-z".into(), 500, "USD".into(), &ctx,
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::X402PilotProviderNotAllowed);
    }

    #[test]
    fn create_gate_rejects_amount_over_cap() {
        let ctx = gate_ctx();
        let result = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 200_000, "USD".into(), &ctx,
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::X402PilotAmountLimitExceeded);
    }

    #[test]
    fn create_gate_rejects_daily_cap_breach() {
        let mut ctx = gate_ctx();
        ctx.daily_exposure_cents = 499_900;
        let result = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 500, "USD".into(), &ctx,
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::X402PilotDailyLimitExceeded);
    }

    fn happy_authorize_inputs<'a>(
        policy: &'a WalletPolicy,
        chain: &'a [DelegationRecord],
        agent: &'a AgentPassport,
        signer: &'a settld_crypto::Signer,
        key_id: &'a str,
        idempotency_key: &str,
        request_sha256: &str,
    ) -> AuthorizeInputs<'a> {
        AuthorizeInputs {
            wallet_policy: policy,
            delegation_chain: chain,
            agent,
            real_money: None,
            reserve_adapter: None,
            production_mode: false,
            idempotency_key: idempotency_key.to_string(),
            request_sha256: request_sha256.to_string(),
            request_binding_mode: RequestBindingMode::None,
            request_binding_sha256: None,
            audience: "provider-a".into(),
            token_ttl: Duration::minutes(5),
            server_signer: signer,
            server_signer_key_id: key_id,
            sponsor_ref: None,
            policy_version: "v1".into(),
            now: Utc::now(),
        }
    }

    #[test]
    fn e2_happy_path_idempotent_replay_returns_same_token() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 50_000, "USD".into(), &ctx,
        )
        .unwrap();

        let policy = wallet_policy();
        let chain = vec![root_delegation()];
        let agent = agent_passport();
        let keypair = settld_crypto::generate_keypair().unwrap();
        let signer = settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem.clone() };
        let mut idx = BTreeMap::new();

        let inputs1 = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-1", "req-hash-1");
        let token1 = authorize_payment(&mut gate, &mut idx, inputs1).unwrap();
        assert_eq!(gate.authorization_status, AuthorizationStatus::Authorized);
        assert_eq!(gate.reserve.as_ref().unwrap().status, ReserveStatus::Reserved);

        let inputs2 = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-1", "req-hash-1");
        let token2 = authorize_payment(&mut gate, &mut idx, inputs2).unwrap();
        assert_eq!(token1.nonce, token2.nonce);
        assert!(token1.verify_signature(&keypair.public_key_pem));
    }

    #[test]
    fn idempotency_replay_with_different_body_conflicts() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 50_000, "USD".into(), &ctx,
        )
        .unwrap();

        let policy = wallet_policy();
        let chain = vec![root_delegation()];
        let agent = agent_passport();
        let keypair = settld_crypto::generate_keypair().unwrap();
        let signer = settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem.clone() };
        let mut idx = BTreeMap::new();

        let inputs1 = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-1", "req-hash-1");
        authorize_payment(&mut gate, &mut idx, inputs1).unwrap();

        let inputs2 = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-1", "req-hash-DIFFERENT");
        let result = authorize_payment(&mut gate, &mut idx, inputs2);
        assert_eq!(result.unwrap_err().code, ErrorCode::IdempotencyKeyConflict);
    }

    #[test]
    fn e3_reserve_failure_transitions_gate_to_failed() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 70_000, "USD".into(), &ctx,
        )
        .unwrap();

        let policy = wallet_policy();
        let chain = vec![root_delegation()];
        let agent = agent_passport();
        let keypair = settld_crypto::generate_keypair().unwrap();
        let signer = settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem.clone() };
        let mut idx = BTreeMap::new();
        let adapter = StubReserveAdapter { succeed: false };

        let mut inputs = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-2", "req-hash-2");
        inputs.reserve_adapter = Some(&adapter);
        inputs.production_mode = true;

        let result = authorize_payment(&mut gate, &mut idx, inputs);
        assert_eq!(result.unwrap_err().code, ErrorCode::X402ReserveFailed);
        assert_eq!(gate.authorization_status, AuthorizationStatus::Failed);
    }

    #[test]
    fn production_mode_without_adapter_is_reserve_unavailable() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 1_000, "USD".into(), &ctx,
        )
        .unwrap();
        let policy = wallet_policy();
        let chain = vec![root_delegation()];
        let agent = agent_passport();
        let keypair = settld_crypto::generate_keypair().unwrap();
        let signer = settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem.clone() };
        let mut idx = BTreeMap::new();

        let mut inputs = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-3", "req-hash-3");
        inputs.production_mode = true;
        let result = authorize_payment(&mut gate, &mut idx, inputs);
        assert_eq!(result.unwrap_err().code, ErrorCode::X402ReserveUnavailable);
    }

    #[test]
    fn suspended_agent_is_rejected() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 1_000, "USD".into(), &ctx,
        )
        .unwrap();
        let policy = wallet_policy();
        let chain = vec![root_delegation()];
        let mut agent = agent_passport();
        agent.lifecycle_status = AgentLifecycleStatus::Suspended;
        let keypair = settld_crypto::generate_keypair().unwrap();
        let signer = settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem.clone() };
        let mut idx = BTreeMap::new();

        let inputs = happy_authorize_inputs(&policy, &chain, &agent, &signer, &keypair.key_id, "idem-4", "req-hash-4");
        let result = authorize_payment(&mut gate, &mut idx, inputs);
        assert_eq!(result.unwrap_err().code, ErrorCode::X402AgentSuspended);
    }

    #[test]
    fn revoked_root_delegation_rejected() {
        let policy = wallet_policy();
        let mut root = root_delegation();
        root.revoked_at = Some(Utc::now());
        let result = resolve_lineage(&[root], &policy, Utc::now());
        assert_eq!(result.unwrap_err().code, ErrorCode::X402DelegationRevoked);
    }

    #[test]
    fn expired_root_delegation_rejected() {
        let policy = wallet_policy();
        let mut root = root_delegation();
        root.expires_at = Some(Utc::now() - Duration::hours(1));
        let result = resolve_lineage(&[root], &policy, Utc::now());
        assert_eq!(result.unwrap_err().code, ErrorCode::X402DelegationExpired);
    }

    #[test]
    fn delegation_depth_over_wallet_policy_rejected() {
        let mut policy = wallet_policy();
        policy.max_delegation_depth = 0;
        let deep = DelegationRecord { depth: 1, ..root_delegation() };
        let result = resolve_lineage(&[root_delegation(), deep], &policy, Utc::now());
        assert_eq!(result.unwrap_err().code, ErrorCode::X402WalletPolicyDelegationDepthExceeded);
    }

    #[test]
    fn verify_green_auto_release_settles_to_released() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 50_000, "USD".into(), &ctx,
        )
        .unwrap();
        gate.authorization_status = AuthorizationStatus::Authorized;

        let policy = VerifyPolicy {
            auto_release_on_green: true,
            auto_hold_on_amber: true,
            auto_refund_on_red: true,
            amber_release_rate_pct: 50,
        };
        let bindings = DecisionBindings {
            authorization_ref: "auth-1".into(),
            request_sha256: "a".repeat(64),
            response_sha256: "b".repeat(64),
            reserve_summary: ReserveRecord { status: ReserveStatus::Reserved, reserve_id: Some("r-1".into()) },
            policy_decision_fingerprint: PolicyDecisionFingerprint {
                fingerprint_version: 1,
                policy_hash: policy_fingerprint_stub(),
                evaluation_hash: "c".repeat(64),
            },
            spend_authorization: SpendAuthorizationBinding {
                delegation_ref: "deleg-root".into(),
                root_delegation_ref: "deleg-root".into(),
                root_delegation_hash: "hash-root".into(),
                effective_delegation_ref: "deleg-root".into(),
                effective_delegation_hash: "hash-root".into(),
            },
        };
        verify(&mut gate, VerificationSignal::Green, &policy, bindings).unwrap();
        assert_eq!(gate.settlement_status, SettlementStatus::Released);
        assert_eq!(gate.verification.as_ref().unwrap().bindings.reserve_summary.status, ReserveStatus::Reserved);

        settle(&mut gate).unwrap();
        assert_eq!(gate.settlement_status, SettlementStatus::Settled);
    }

    #[test]
    fn verify_amber_without_auto_hold_applies_partial_release_ratio() {
        let ctx = gate_ctx();
        let mut gate = create_gate(
            "gate-1".into(), "tenant-1".into(), "payer".into(), "payee".into(),
            "provider-a".into(), 50_000, "USD".into(), &ctx,
        )
        .unwrap();
        gate.authorization_status = AuthorizationStatus::Authorized;

        let policy = VerifyPolicy {
            auto_release_on_green: true,
            auto_hold_on_amber: false,
            auto_refund_on_red: true,
            amber_release_rate_pct: 40,
        };
        let bindings = DecisionBindings {
            authorization_ref: "auth-1".into(),
            request_sha256: "a".repeat(64),
            response_sha256: "b".repeat(64),
            reserve_summary: ReserveRecord { status: ReserveStatus::Reserved, reserve_id: Some("r-1".into()) },
            policy_decision_fingerprint: PolicyDecisionFingerprint {
                fingerprint_version: 1,
                policy_hash: policy_fingerprint_stub(),
                evaluation_hash: "c".repeat(64),
            },
            spend_authorization: SpendAuthorizationBinding {
                delegation_ref: "deleg-root".into(),
                root_delegation_ref: "deleg-root".into(),
                root_delegation_hash: "hash-root".into(),
                effective_delegation_ref: "deleg-root".into(),
                effective_delegation_hash: "hash-root".into(),
            },
        };
        verify(&mut gate, VerificationSignal::Amber, &policy, bindings).unwrap();
        assert_eq!(gate.settlement_status, SettlementStatus::Released);
        assert_eq!(gate.released_amount_cents, Some(20_000));
    }

    fn policy_fingerprint_stub() -> String {
        wallet_policy().fingerprint().unwrap()
    }

    fn hex_decode(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn signed_kill_switch_action(
        operator_id: &str,
        role: &str,
        private_key_pem: &str,
        key_id: &str,
    ) -> settld_governance::OperatorAction {
        let mut action = settld_governance::OperatorAction {
            operator_id: operator_id.into(),
            role: role.into(),
            action: "kill_switch".into(),
            tenant_id: None,
            signer_key_id: key_id.into(),
            signed_at: Utc::now(),
            signature: String::new(),
        };
        let hash = action.compute_hash().unwrap();
        action.signature = settld_crypto::sign_bytes(private_key_pem, &hex_decode(&hash)).unwrap();
        action
    }

    #[test]
    fn authorize_kill_switch_toggle_accepts_dual_control_pair() {
        let kp1 = settld_crypto::generate_keypair().unwrap();
        let kp2 = settld_crypto::generate_keypair().unwrap();
        let first = signed_kill_switch_action("op-1", "security_lead", &kp1.private_key_pem, &kp1.key_id);
        let second = signed_kill_switch_action("op-2", "compliance_officer", &kp2.private_key_pem, &kp2.key_id);

        authorize_kill_switch_toggle(&first, &kp1.public_key_pem, &second, &kp2.public_key_pem).unwrap();
    }

    #[test]
    fn authorize_kill_switch_toggle_rejects_role_outside_matrix() {
        let kp1 = settld_crypto::generate_keypair().unwrap();
        let kp2 = settld_crypto::generate_keypair().unwrap();
        let first = signed_kill_switch_action("op-1", "intern", &kp1.private_key_pem, &kp1.key_id);
        let second = signed_kill_switch_action("op-2", "security_lead", &kp2.private_key_pem, &kp2.key_id);

        let result = authorize_kill_switch_toggle(&first, &kp1.public_key_pem, &second, &kp2.public_key_pem);
        assert_eq!(result.unwrap_err().code, ErrorCode::OperatorActionRoleForbidden);
    }

    #[test]
    fn agent_card_public_requires_attestation() {
        let card = AgentCard {
            subject_id: "subj-1".into(),
            capabilities: vec!["travel.booking".into(), "travel.search".into()],
            public: true,
        };
        let result = validate_agent_card_publish(&card, &[], "issuer-a");
        assert_eq!(result.unwrap_err().code, ErrorCode::AgentCardPublicAttestationRequired);

        let attestations = vec![
            CapabilityAttestation { capability: "travel.booking".into(), issuer: "issuer-a".into(), status: "attested".into() },
            CapabilityAttestation { capability: "travel.search".into(), issuer: "issuer-a".into(), status: "attested".into() },
        ];
        validate_agent_card_publish(&card, &attestations, "issuer-a").unwrap();
    }

    #[test]
    fn negative_balance_hold_blocks_payout() {
        let exposure = PartyExposure { outstanding_cents: 500 };
        let result = apply_payout(NegativeBalanceMode::Hold, exposure, 1_000);
        assert_eq!(result.unwrap_err().code, ErrorCode::NegativeBalancePayoutHold);
    }

    #[test]
    fn negative_balance_net_deducts_and_zeroes_when_absorbed() {
        let exposure = PartyExposure { outstanding_cents: 300 };
        let outcome = apply_payout(NegativeBalanceMode::Net, exposure, 1_000).unwrap();
        assert_eq!(outcome.recovered_cents, 300);
        assert_eq!(outcome.effective_cents, 700);
        assert_eq!(outcome.remaining_exposure.outstanding_cents, 0);
    }

    #[test]
    fn payout_limits_reject_over_daily_cap() {
        let result = check_payout_limits(1_000, 10_000, 9_500, 10_000, false);
        assert_eq!(result.unwrap_err().code, ErrorCode::PayoutDailyLimitExceeded);
    }
}
