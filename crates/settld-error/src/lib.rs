// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Stable error code taxonomy shared across the settld control plane.
//!
//! Every fallible operation in the workspace resolves to one of these
//! codes. The code string is the wire contract: clients match on
//! `ErrorCode::code()`, never on `Display`/description text, which may
//! change across releases.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single stable error code.
///
/// Grouped by category to mirror the §7 taxonomy: canonical/crypto,
/// governance, bundling, operator actions, dual control, x402, payout,
/// emergency controls, and boundary concerns (idempotency, concurrency,
/// timeouts).
///
/// Serialized and deserialized through [`ErrorCode::code`] /
/// [`ErrorCode::lookup`] rather than a derived `rename_all`, so the wire
/// form is guaranteed to match `.code()` exactly — including
/// `OverrideContextHashMismatch`, whose wire spelling is lowercase per
/// §4.10/E4 and would otherwise disagree with a blanket
/// `SCREAMING_SNAKE_CASE` derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // ── Canonical / crypto ──────────────────────────────────────────
    /// A JSON value failed schema validation at a boundary.
    SchemaInvalid,
    /// A number is non-finite or outside the safe-integer range.
    CanonicalNumberInvalid,
    /// No signing capability (local key or remote callback) is available.
    SignerCannotSign,
    /// A remote signer capability returned a malformed response.
    SignerProviderInvalidResponse,

    // ── Event log ────────────────────────────────────────────────────
    /// An event stream's first event was not `JOB_CREATED`.
    StreamMissingJobCreated,
    /// An event's stored `chainHash` does not match the recomputed value.
    ChainHashMismatch,

    // ── Governance ───────────────────────────────────────────────────
    /// A governance policy is required but was not signed.
    GovernancePolicySignatureRequired,
    /// The revocation list reference in a governance policy doesn't match.
    GovernancePolicyRevocationRefMismatch,
    /// A revocation list is required but was not signed.
    RevocationListSignatureRequired,

    // ── Bundling ─────────────────────────────────────────────────────
    /// The invoice bundle must already carry a signed head attestation.
    InvoiceAttestationRequired,
    /// A metering report is required but absent.
    MeteringReportRequired,
    /// The metering report's job proof binding is missing or incomplete.
    MeteringJobProofBindingRequired,
    /// Building a job proof requires at least one event.
    JobProofEventsRequired,
    /// A GL batch's allocation rows do not net to zero.
    GlBatchImbalanced,

    // ── Operator actions / dual control ─────────────────────────────
    /// An operator action is required but was not supplied.
    OperatorActionRequired,
    /// The operator action's signer key is not recognized.
    OperatorActionSignerUnknown,
    /// The operator action's signer key has been revoked.
    OperatorActionSignerRevoked,
    /// The operator action's decision does not match the expected one.
    OperatorActionDecisionMismatch,
    /// The operator action's tenant does not match the target tenant.
    OperatorActionTenantMismatch,
    /// The operator action's signature does not match its declared schema.
    OperatorActionSignatureSchemaMismatch,
    /// The operator's role is not permitted to perform this action.
    OperatorActionRoleForbidden,
    /// The action requires two distinct signed operator actions.
    DualControlRequired,
    /// The two operator actions must come from distinct operators.
    DualControlDistinctOperatorRequired,
    /// The two operator actions must be signed by distinct keys.
    DualControlDistinctSignerKeyRequired,

    // ── x402 gate ────────────────────────────────────────────────────
    /// The pilot kill switch is active; all gates are blocked.
    X402PilotKillSwitchActive,
    /// The payment provider is not on the wallet policy allowlist.
    X402PilotProviderNotAllowed,
    /// The requested amount exceeds the per-call cap.
    X402PilotAmountLimitExceeded,
    /// The tenant's daily authorization cap would be exceeded.
    X402PilotDailyLimitExceeded,
    /// Wallet policy requires an issuer decision before authorization.
    X402WalletIssuerDecisionRequired,
    /// The delegation depth exceeds the wallet policy's maximum.
    X402WalletPolicyDelegationDepthExceeded,
    /// The delegation depth exceeds the delegation record's own maximum.
    X402DelegationDepthExceeded,
    /// The root delegation in the lineage has been revoked.
    X402DelegationRevoked,
    /// The root delegation in the lineage has expired.
    X402DelegationExpired,
    /// The agent's signer key is not active.
    X402AgentSignerKeyInvalid,
    /// The agent's lifecycle status is suspended.
    X402AgentSuspended,
    /// The agent's lifecycle status is throttled.
    X402AgentThrottled,
    /// No external reserve adapter is configured in production mode.
    X402ReserveUnavailable,
    /// The reserve adapter rejected the reserve request.
    X402ReserveFailed,
    /// An idempotency key was replayed with a different request body.
    IdempotencyKeyConflict,
    /// A publicly published agent card requires capability attestations.
    AgentCardPublicAttestationRequired,

    // ── Real-money / payout ──────────────────────────────────────────
    /// Real-money execution is disabled by policy.
    RealMoneyDisabled,
    /// A Stripe Connect account is required for this payout.
    StripeConnectAccountRequired,
    /// The Stripe Connect counterparty reference does not match.
    StripeConnectCounterpartyMismatch,
    /// The payout kill switch is active.
    PayoutKillSwitchActive,
    /// The payout exceeds the per-call cap.
    PayoutAmountLimitExceeded,
    /// The payout would exceed the daily cap.
    PayoutDailyLimitExceeded,
    /// A negative balance is held against future payouts.
    NegativeBalancePayoutHold,

    // ── Emergency controls ───────────────────────────────────────────
    /// The emergency pause control is active.
    EmergencyPauseActive,
    /// The emergency quarantine control is active.
    EmergencyQuarantineActive,
    /// The emergency revoke control is active.
    EmergencyRevokeActive,
    /// The emergency kill switch is active.
    EmergencyKillSwitchActive,

    // ── Concurrency / boundary ───────────────────────────────────────
    /// Concurrent writers conflicted on the same event stream.
    StreamConcurrencyConflict,
    /// An outbound operation exceeded its deadline.
    Timeout,
    /// A promotion override's context hash does not match the guard's.
    OverrideContextHashMismatch,
}

impl ErrorCode {
    /// Stable wire code string, e.g. `"X402_PILOT_KILL_SWITCH_ACTIVE"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::CanonicalNumberInvalid => "CANONICAL_NUMBER_INVALID",
            Self::SignerCannotSign => "SIGNER_CANNOT_SIGN",
            Self::SignerProviderInvalidResponse => "SIGNER_PROVIDER_INVALID_RESPONSE",
            Self::StreamMissingJobCreated => "STREAM_MISSING_JOB_CREATED",
            Self::ChainHashMismatch => "CHAIN_HASH_MISMATCH",
            Self::GovernancePolicySignatureRequired => "GOVERNANCE_POLICY_SIGNATURE_REQUIRED",
            Self::GovernancePolicyRevocationRefMismatch => {
                "GOVERNANCE_POLICY_REVOCATION_REF_MISMATCH"
            }
            Self::RevocationListSignatureRequired => "REVOCATION_LIST_SIGNATURE_REQUIRED",
            Self::InvoiceAttestationRequired => "INVOICE_ATTESTATION_REQUIRED",
            Self::MeteringReportRequired => "METERING_REPORT_REQUIRED",
            Self::MeteringJobProofBindingRequired => "METERING_JOB_PROOF_BINDING_REQUIRED",
            Self::JobProofEventsRequired => "JOB_PROOF_EVENTS_REQUIRED",
            Self::GlBatchImbalanced => "GL_BATCH_IMBALANCED",
            Self::OperatorActionRequired => "OPERATOR_ACTION_REQUIRED",
            Self::OperatorActionSignerUnknown => "OPERATOR_ACTION_SIGNER_UNKNOWN",
            Self::OperatorActionSignerRevoked => "OPERATOR_ACTION_SIGNER_REVOKED",
            Self::OperatorActionDecisionMismatch => "OPERATOR_ACTION_DECISION_MISMATCH",
            Self::OperatorActionTenantMismatch => "OPERATOR_ACTION_TENANT_MISMATCH",
            Self::OperatorActionSignatureSchemaMismatch => {
                "OPERATOR_ACTION_SIGNATURE_SCHEMA_MISMATCH"
            }
            Self::OperatorActionRoleForbidden => "OPERATOR_ACTION_ROLE_FORBIDDEN",
            Self::DualControlRequired => "DUAL_CONTROL_REQUIRED",
            Self::DualControlDistinctOperatorRequired => {
                "DUAL_CONTROL_DISTINCT_OPERATOR_REQUIRED"
            }
            Self::DualControlDistinctSignerKeyRequired => {
                "DUAL_CONTROL_DISTINCT_SIGNER_KEY_REQUIRED"
            }
            Self::X402PilotKillSwitchActive => "X402_PILOT_KILL_SWITCH_ACTIVE",
            Self::X402PilotProviderNotAllowed => "X402_PILOT_PROVIDER_NOT_ALLOWED",
            Self::X402PilotAmountLimitExceeded => "X402_PILOT_AMOUNT_LIMIT_EXCEEDED",
            Self::X402PilotDailyLimitExceeded => "X402_PILOT_DAILY_LIMIT_EXCEEDED",
            Self::X402WalletIssuerDecisionRequired => "X402_WALLET_ISSUER_DECISION_REQUIRED",
            Self::X402WalletPolicyDelegationDepthExceeded => {
                "X402_WALLET_POLICY_DELEGATION_DEPTH_EXCEEDED"
            }
            Self::X402DelegationDepthExceeded => "X402_DELEGATION_DEPTH_EXCEEDED",
            Self::X402DelegationRevoked => "X402_DELEGATION_REVOKED",
            Self::X402DelegationExpired => "X402_DELEGATION_EXPIRED",
            Self::X402AgentSignerKeyInvalid => "X402_AGENT_SIGNER_KEY_INVALID",
            Self::X402AgentSuspended => "X402_AGENT_SUSPENDED",
            Self::X402AgentThrottled => "X402_AGENT_THROTTLED",
            Self::X402ReserveUnavailable => "X402_RESERVE_UNAVAILABLE",
            Self::X402ReserveFailed => "X402_RESERVE_FAILED",
            Self::IdempotencyKeyConflict => "IDEMPOTENCY_KEY_CONFLICT",
            Self::AgentCardPublicAttestationRequired => "AGENT_CARD_PUBLIC_ATTESTATION_REQUIRED",
            Self::RealMoneyDisabled => "REAL_MONEY_DISABLED",
            Self::StripeConnectAccountRequired => "STRIPE_CONNECT_ACCOUNT_REQUIRED",
            Self::StripeConnectCounterpartyMismatch => "STRIPE_CONNECT_COUNTERPARTY_MISMATCH",
            Self::PayoutKillSwitchActive => "PAYOUT_KILL_SWITCH_ACTIVE",
            Self::PayoutAmountLimitExceeded => "PAYOUT_AMOUNT_LIMIT_EXCEEDED",
            Self::PayoutDailyLimitExceeded => "PAYOUT_DAILY_LIMIT_EXCEEDED",
            Self::NegativeBalancePayoutHold => "NEGATIVE_BALANCE_PAYOUT_HOLD",
            Self::EmergencyPauseActive => "EMERGENCY_PAUSE_ACTIVE",
            Self::EmergencyQuarantineActive => "EMERGENCY_QUARANTINE_ACTIVE",
            Self::EmergencyRevokeActive => "EMERGENCY_REVOKE_ACTIVE",
            Self::EmergencyKillSwitchActive => "EMERGENCY_KILL_SWITCH_ACTIVE",
            Self::StreamConcurrencyConflict => "STREAM_CONCURRENCY_CONFLICT",
            Self::Timeout => "TIMEOUT",
            Self::OverrideContextHashMismatch => "override_context_hash_mismatch",
        }
    }

    /// Category this code belongs to, for grouped listing and dashboards.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::SchemaInvalid
            | Self::CanonicalNumberInvalid
            | Self::SignerCannotSign
            | Self::SignerProviderInvalidResponse => "canonical_crypto",

            Self::StreamMissingJobCreated | Self::ChainHashMismatch => "event_log",

            Self::GovernancePolicySignatureRequired
            | Self::GovernancePolicyRevocationRefMismatch
            | Self::RevocationListSignatureRequired => "governance",

            Self::InvoiceAttestationRequired
            | Self::MeteringReportRequired
            | Self::MeteringJobProofBindingRequired
            | Self::JobProofEventsRequired
            | Self::GlBatchImbalanced => "bundling",

            Self::OperatorActionRequired
            | Self::OperatorActionSignerUnknown
            | Self::OperatorActionSignerRevoked
            | Self::OperatorActionDecisionMismatch
            | Self::OperatorActionTenantMismatch
            | Self::OperatorActionSignatureSchemaMismatch
            | Self::OperatorActionRoleForbidden
            | Self::DualControlRequired
            | Self::DualControlDistinctOperatorRequired
            | Self::DualControlDistinctSignerKeyRequired => "operator_action",

            Self::X402PilotKillSwitchActive
            | Self::X402PilotProviderNotAllowed
            | Self::X402PilotAmountLimitExceeded
            | Self::X402PilotDailyLimitExceeded
            | Self::X402WalletIssuerDecisionRequired
            | Self::X402WalletPolicyDelegationDepthExceeded
            | Self::X402DelegationDepthExceeded
            | Self::X402DelegationRevoked
            | Self::X402DelegationExpired
            | Self::X402AgentSignerKeyInvalid
            | Self::X402AgentSuspended
            | Self::X402AgentThrottled
            | Self::X402ReserveUnavailable
            | Self::X402ReserveFailed
            | Self::IdempotencyKeyConflict
            | Self::AgentCardPublicAttestationRequired => "x402",

            Self::RealMoneyDisabled
            | Self::StripeConnectAccountRequired
            | Self::StripeConnectCounterpartyMismatch
            | Self::PayoutKillSwitchActive
            | Self::PayoutAmountLimitExceeded
            | Self::PayoutDailyLimitExceeded
            | Self::NegativeBalancePayoutHold => "payout",

            Self::EmergencyPauseActive
            | Self::EmergencyQuarantineActive
            | Self::EmergencyRevokeActive
            | Self::EmergencyKillSwitchActive => "emergency",

            Self::StreamConcurrencyConflict | Self::Timeout | Self::OverrideContextHashMismatch => {
                "boundary"
            }
        }
    }

    /// Default HTTP status for this code at a wire boundary (§6/§7).
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SchemaInvalid
            | Self::CanonicalNumberInvalid
            | Self::StreamMissingJobCreated
            | Self::ChainHashMismatch => 400,

            Self::X402AgentSuspended => 410,
            Self::X402AgentThrottled => 429,
            Self::X402ReserveUnavailable => 503,

            Self::IdempotencyKeyConflict
            | Self::StreamConcurrencyConflict
            | Self::GlBatchImbalanced
            | Self::OverrideContextHashMismatch
            | Self::AgentCardPublicAttestationRequired => 409,

            Self::Timeout => 504,

            Self::GovernancePolicySignatureRequired
            | Self::GovernancePolicyRevocationRefMismatch
            | Self::RevocationListSignatureRequired
            | Self::InvoiceAttestationRequired
            | Self::MeteringReportRequired
            | Self::MeteringJobProofBindingRequired
            | Self::JobProofEventsRequired
            | Self::SignerCannotSign
            | Self::SignerProviderInvalidResponse
            | Self::OperatorActionRequired
            | Self::OperatorActionSignerUnknown
            | Self::OperatorActionSignerRevoked
            | Self::OperatorActionDecisionMismatch
            | Self::OperatorActionTenantMismatch
            | Self::OperatorActionSignatureSchemaMismatch
            | Self::OperatorActionRoleForbidden
            | Self::DualControlRequired
            | Self::DualControlDistinctOperatorRequired
            | Self::DualControlDistinctSignerKeyRequired
            | Self::X402PilotKillSwitchActive
            | Self::X402PilotProviderNotAllowed
            | Self::X402PilotAmountLimitExceeded
            | Self::X402PilotDailyLimitExceeded
            | Self::X402WalletIssuerDecisionRequired
            | Self::X402WalletPolicyDelegationDepthExceeded
            | Self::X402DelegationDepthExceeded
            | Self::X402DelegationRevoked
            | Self::X402DelegationExpired
            | Self::X402AgentSignerKeyInvalid
            | Self::X402ReserveFailed
            | Self::RealMoneyDisabled
            | Self::StripeConnectAccountRequired
            | Self::StripeConnectCounterpartyMismatch
            | Self::PayoutKillSwitchActive
            | Self::PayoutAmountLimitExceeded
            | Self::PayoutDailyLimitExceeded
            | Self::NegativeBalancePayoutHold
            | Self::EmergencyPauseActive
            | Self::EmergencyQuarantineActive
            | Self::EmergencyRevokeActive
            | Self::EmergencyKillSwitchActive => 403,
        }
    }

    /// Short human-readable description, for diagnostics only.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::SchemaInvalid => "a value failed schema validation",
            Self::CanonicalNumberInvalid => "a number is non-finite or outside the safe-integer range",
            Self::SignerCannotSign => "no signing capability is available for this key",
            Self::SignerProviderInvalidResponse => "the remote signer returned a malformed response",
            Self::StreamMissingJobCreated => "the event stream's first event is not JOB_CREATED",
            Self::ChainHashMismatch => "an event's chainHash does not match the recomputed value",
            Self::GovernancePolicySignatureRequired => "a governance policy must be signed by a governance root",
            Self::GovernancePolicyRevocationRefMismatch => "the policy's revocation list reference does not match",
            Self::RevocationListSignatureRequired => "the revocation list must be signed",
            Self::InvoiceAttestationRequired => "the invoice bundle must already carry a signed head attestation",
            Self::MeteringReportRequired => "a metering report is required",
            Self::MeteringJobProofBindingRequired => "the metering report's job proof binding is missing",
            Self::JobProofEventsRequired => "building a job proof requires at least one event",
            Self::GlBatchImbalanced => "the GL batch's allocation rows do not net to zero",
            Self::OperatorActionRequired => "an operator action is required",
            Self::OperatorActionSignerUnknown => "the operator action's signer key is not recognized",
            Self::OperatorActionSignerRevoked => "the operator action's signer key has been revoked",
            Self::OperatorActionDecisionMismatch => "the operator action's decision does not match",
            Self::OperatorActionTenantMismatch => "the operator action's tenant does not match",
            Self::OperatorActionSignatureSchemaMismatch => "the operator action's signature schema does not match",
            Self::OperatorActionRoleForbidden => "the operator's role cannot perform this action",
            Self::DualControlRequired => "this action requires two distinct signed operator actions",
            Self::DualControlDistinctOperatorRequired => "the two operator actions must come from distinct operators",
            Self::DualControlDistinctSignerKeyRequired => "the two operator actions must be signed by distinct keys",
            Self::X402PilotKillSwitchActive => "the pilot kill switch is active",
            Self::X402PilotProviderNotAllowed => "the payment provider is not on the wallet policy allowlist",
            Self::X402PilotAmountLimitExceeded => "the amount exceeds the per-call cap",
            Self::X402PilotDailyLimitExceeded => "the tenant's daily authorization cap would be exceeded",
            Self::X402WalletIssuerDecisionRequired => "wallet policy requires an issuer decision before authorization",
            Self::X402WalletPolicyDelegationDepthExceeded => "delegation depth exceeds the wallet policy maximum",
            Self::X402DelegationDepthExceeded => "delegation depth exceeds the delegation record's own maximum",
            Self::X402DelegationRevoked => "the root delegation in the lineage has been revoked",
            Self::X402DelegationExpired => "the root delegation in the lineage has expired",
            Self::X402AgentSignerKeyInvalid => "the agent's signer key is not active",
            Self::X402AgentSuspended => "the agent's lifecycle status is suspended",
            Self::X402AgentThrottled => "the agent's lifecycle status is throttled",
            Self::X402ReserveUnavailable => "no external reserve adapter is configured in production mode",
            Self::X402ReserveFailed => "the reserve adapter rejected the reserve request",
            Self::IdempotencyKeyConflict => "an idempotency key was replayed with a different request body",
            Self::AgentCardPublicAttestationRequired => "a publicly published agent card requires capability attestations",
            Self::RealMoneyDisabled => "real-money execution is disabled by policy",
            Self::StripeConnectAccountRequired => "a Stripe Connect account is required for this payout",
            Self::StripeConnectCounterpartyMismatch => "the Stripe Connect counterparty reference does not match",
            Self::PayoutKillSwitchActive => "the payout kill switch is active",
            Self::PayoutAmountLimitExceeded => "the payout exceeds the per-call cap",
            Self::PayoutDailyLimitExceeded => "the payout would exceed the daily cap",
            Self::NegativeBalancePayoutHold => "a negative balance is held against future payouts",
            Self::EmergencyPauseActive => "the emergency pause control is active",
            Self::EmergencyQuarantineActive => "the emergency quarantine control is active",
            Self::EmergencyRevokeActive => "the emergency revoke control is active",
            Self::EmergencyKillSwitchActive => "the emergency kill switch is active",
            Self::StreamConcurrencyConflict => "concurrent writers conflicted on the same event stream",
            Self::Timeout => "an outbound operation exceeded its deadline",
            Self::OverrideContextHashMismatch => "the promotion override's context hash does not match",
        }
    }

    /// All codes, in declaration order.
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        ALL_CODES
    }

    /// All codes in the given category, preserving declaration order.
    #[must_use]
    pub fn by_category(category: &str) -> Vec<ErrorCode> {
        ALL_CODES
            .iter()
            .copied()
            .filter(|c| c.category() == category)
            .collect()
    }

    /// Look up a code by its wire string, if recognized.
    #[must_use]
    pub fn lookup(code: &str) -> Option<ErrorCode> {
        ALL_CODES.iter().copied().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

struct ErrorCodeVisitor;

impl Visitor<'_> for ErrorCodeVisitor {
    type Value = ErrorCode;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a stable settld error code string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ErrorCode, E> {
        ErrorCode::lookup(v).ok_or_else(|| de::Error::custom(format!("unrecognized error code: {v}")))
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ErrorCodeVisitor)
    }
}

/// Structured error carrying a stable code, optional context, and an
/// optional wrapped cause — the shape returned at every crate boundary.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct SettldError {
    /// The stable error code.
    pub code: ErrorCode,
    /// Human-readable diagnostic message (not part of the wire contract).
    pub message: String,
    /// Arbitrary structured context (e.g. `{"index": 3}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SettldError {
    /// Construct an error from a code and a message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details to this error.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::SchemaInvalid,
    ErrorCode::CanonicalNumberInvalid,
    ErrorCode::SignerCannotSign,
    ErrorCode::SignerProviderInvalidResponse,
    ErrorCode::StreamMissingJobCreated,
    ErrorCode::ChainHashMismatch,
    ErrorCode::GovernancePolicySignatureRequired,
    ErrorCode::GovernancePolicyRevocationRefMismatch,
    ErrorCode::RevocationListSignatureRequired,
    ErrorCode::InvoiceAttestationRequired,
    ErrorCode::MeteringReportRequired,
    ErrorCode::MeteringJobProofBindingRequired,
    ErrorCode::JobProofEventsRequired,
    ErrorCode::GlBatchImbalanced,
    ErrorCode::OperatorActionRequired,
    ErrorCode::OperatorActionSignerUnknown,
    ErrorCode::OperatorActionSignerRevoked,
    ErrorCode::OperatorActionDecisionMismatch,
    ErrorCode::OperatorActionTenantMismatch,
    ErrorCode::OperatorActionSignatureSchemaMismatch,
    ErrorCode::OperatorActionRoleForbidden,
    ErrorCode::DualControlRequired,
    ErrorCode::DualControlDistinctOperatorRequired,
    ErrorCode::DualControlDistinctSignerKeyRequired,
    ErrorCode::X402PilotKillSwitchActive,
    ErrorCode::X402PilotProviderNotAllowed,
    ErrorCode::X402PilotAmountLimitExceeded,
    ErrorCode::X402PilotDailyLimitExceeded,
    ErrorCode::X402WalletIssuerDecisionRequired,
    ErrorCode::X402WalletPolicyDelegationDepthExceeded,
    ErrorCode::X402DelegationDepthExceeded,
    ErrorCode::X402DelegationRevoked,
    ErrorCode::X402DelegationExpired,
    ErrorCode::X402AgentSignerKeyInvalid,
    ErrorCode::X402AgentSuspended,
    ErrorCode::X402AgentThrottled,
    ErrorCode::X402ReserveUnavailable,
    ErrorCode::X402ReserveFailed,
    ErrorCode::IdempotencyKeyConflict,
    ErrorCode::AgentCardPublicAttestationRequired,
    ErrorCode::RealMoneyDisabled,
    ErrorCode::StripeConnectAccountRequired,
    ErrorCode::StripeConnectCounterpartyMismatch,
    ErrorCode::PayoutKillSwitchActive,
    ErrorCode::PayoutAmountLimitExceeded,
    ErrorCode::PayoutDailyLimitExceeded,
    ErrorCode::NegativeBalancePayoutHold,
    ErrorCode::EmergencyPauseActive,
    ErrorCode::EmergencyQuarantineActive,
    ErrorCode::EmergencyRevokeActive,
    ErrorCode::EmergencyKillSwitchActive,
    ErrorCode::StreamConcurrencyConflict,
    ErrorCode::Timeout,
    ErrorCode::OverrideContextHashMismatch,
];
