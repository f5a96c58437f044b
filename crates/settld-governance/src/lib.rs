// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Governance policy v2, revocation list v1, governed-signer checks, and
//! dual control for sensitive operator actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_canon::hash_excluding;
use settld_error::{ErrorCode, SettldError};
use std::collections::BTreeMap;

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// Purposes a governance-root-class key may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredPurpose {
    /// Signs server-issued artifacts.
    Server,
    /// Signs governance policies and revocation lists.
    Governance,
    /// Co-signs timestamp proofs.
    Time,
}

/// Allowed-signer rule for one artifact subject type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerRule {
    /// Scopes this rule grants, e.g. `"work_certificate:sign"`.
    pub allowed_scopes: Vec<String>,
    /// Key ids explicitly permitted to sign this subject type.
    pub allowed_key_ids: Vec<String>,
    /// Whether this subject type requires governance at all.
    pub require_governed: bool,
    /// The purpose the signer key must declare, if any.
    pub required_purpose: Option<RequiredPurpose>,
}

impl SignerRule {
    /// Validate the rule's own shape: a rule with `require_governed` set
    /// must enumerate at least one allowed key id.
    pub fn validate(&self) -> Result<(), SettldError> {
        if self.require_governed && self.allowed_key_ids.is_empty() {
            return Err(err(
                ErrorCode::GovernancePolicySignatureRequired,
                "require_governed rule must have a non-empty allowed_key_ids set",
            ));
        }
        Ok(())
    }
}

/// A reference to the revocation list a governance policy is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationListRef {
    /// Path to the revocation list within the bundle.
    pub path: String,
    /// SHA-256 of the referenced revocation list's canonical form.
    pub sha256: String,
}

/// Signed governance policy, schema-tagged `GovernancePolicy.v2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernancePolicyV2 {
    /// Always `"GovernancePolicy.v2"`.
    pub schema_version: String,
    /// Policy identifier.
    pub policy_id: String,
    /// Reference to the bound revocation list.
    pub revocation_list_ref: RevocationListRef,
    /// Per-subject-type signer rules.
    pub signer_rules: BTreeMap<String, SignerRule>,
    /// When the policy was generated.
    pub generated_at: DateTime<Utc>,
    /// Key id of the governance root that signed this policy.
    pub signer_key_id: String,
    /// When the policy was signed.
    pub signed_at: DateTime<Utc>,
    /// SHA-256 of the canonical policy core (everything but this field
    /// and `signature`).
    pub policy_hash: String,
    /// Base64 Ed25519 signature over `policy_hash`.
    pub signature: String,
}

const POLICY_HASHED_FIELDS: &[&str] = &["policyHash", "signature"];

impl GovernancePolicyV2 {
    /// Recompute the policy hash over the hashed core.
    pub fn compute_hash(&self) -> Result<String, SettldError> {
        let value = serde_json::to_value(self)
            .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
        hash_excluding(&value, POLICY_HASHED_FIELDS)
    }

    /// Validate schema/shape invariants from §4.4, independent of the
    /// signature: every signer rule validates, and `required_purpose`
    /// (if present on any rule) is one of the three known values —
    /// enforced at the type level via [`RequiredPurpose`].
    pub fn validate_shape(&self) -> Result<(), SettldError> {
        if self.schema_version != "GovernancePolicy.v2" {
            return Err(err(
                ErrorCode::SchemaInvalid,
                format!("unexpected schemaVersion {}", self.schema_version),
            ));
        }
        for rule in self.signer_rules.values() {
            rule.validate()?;
        }
        Ok(())
    }

    /// Verify the policy's signature under a governance root public key.
    #[must_use]
    pub fn verify_signature(&self, governance_root_public_key_pem: &str) -> bool {
        let Ok(hash) = self.compute_hash() else {
            return false;
        };
        hash == self.policy_hash
            && settld_crypto::verify_hash_hex(&hash, &self.signature, governance_root_public_key_pem)
    }
}

/// A key rotation: old key → new key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    /// The superseded key id.
    pub key_id: String,
    /// The replacement key id.
    pub new_key_id: String,
    /// When the rotation took effect.
    pub at: DateTime<Utc>,
}

/// A key revocation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revocation {
    /// The revoked key id.
    pub key_id: String,
    /// Human-readable reason.
    pub reason: String,
    /// When the revocation took effect.
    pub at: DateTime<Utc>,
    /// If set, the revocation only applies until this time (a revoked
    /// window); `None` means permanent.
    pub until: Option<DateTime<Utc>>,
}

/// Signed revocation list, schema-tagged `RevocationList.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationListV1 {
    /// Always `"RevocationList.v1"`.
    pub schema_version: String,
    /// List identifier.
    pub list_id: String,
    /// Key rotations, forming chains.
    pub rotations: Vec<Rotation>,
    /// Key revocations.
    pub revocations: Vec<Revocation>,
    /// Key id of the governance root that signed this list.
    pub signer_key_id: String,
    /// When the list was signed.
    pub signed_at: DateTime<Utc>,
    /// SHA-256 of the canonical list core.
    pub list_hash: String,
    /// Base64 Ed25519 signature over `list_hash`.
    pub signature: String,
}

const LIST_HASHED_FIELDS: &[&str] = &["listHash", "signature"];

impl RevocationListV1 {
    /// Recompute the list hash over the hashed core.
    pub fn compute_hash(&self) -> Result<String, SettldError> {
        let value = serde_json::to_value(self)
            .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
        hash_excluding(&value, LIST_HASHED_FIELDS)
    }

    /// Verify the list's signature under a governance root public key.
    #[must_use]
    pub fn verify_signature(&self, governance_root_public_key_pem: &str) -> bool {
        let Ok(hash) = self.compute_hash() else {
            return false;
        };
        hash == self.list_hash
            && settld_crypto::verify_hash_hex(&hash, &self.signature, governance_root_public_key_pem)
    }

    /// Whether `key_id` is revoked (not merely rotated) at `now`.
    #[must_use]
    pub fn is_revoked(&self, key_id: &str, now: DateTime<Utc>) -> bool {
        self.revocations.iter().any(|r| {
            r.key_id == key_id && settld_trust_window(now, r.at, r.until)
        })
    }

    /// Follow the rotation chain starting at `key_id` to its current
    /// successor. Returns `key_id` unchanged if it was never rotated.
    #[must_use]
    pub fn resolve_active_key<'a>(&'a self, key_id: &'a str) -> &'a str {
        let mut current = key_id;
        let mut hops = 0;
        while let Some(rotation) = self.rotations.iter().find(|r| r.key_id == current) {
            current = &rotation.new_key_id;
            hops += 1;
            if hops > self.rotations.len() {
                break; // defensive: a malformed cyclic chain must not loop forever
            }
        }
        current
    }
}

fn settld_trust_window(now: DateTime<Utc>, start: DateTime<Utc>, until: Option<DateTime<Utc>>) -> bool {
    now >= start && until.is_none_or(|u| now <= u)
}

/// Whether `key_id` is governed for `subject_type` under `policy` and
/// `revocation` at time `now`, per §4.4: the (rotation-resolved) key
/// must be in `allowedKeyIds`, `scope` must be in `allowedScopes`, and
/// the key must not carry an active (non-window-expired) revocation.
#[must_use]
pub fn is_governed(
    policy: &GovernancePolicyV2,
    revocation: &RevocationListV1,
    subject_type: &str,
    key_id: &str,
    scope: &str,
    now: DateTime<Utc>,
) -> bool {
    let Some(rule) = policy.signer_rules.get(subject_type) else {
        return false;
    };
    if !rule.require_governed {
        return true;
    }
    let active_key = revocation.resolve_active_key(key_id);
    if revocation.is_revoked(active_key, now) {
        return false;
    }
    rule.allowed_key_ids.iter().any(|k| k == active_key) && rule.allowed_scopes.iter().any(|s| s == scope)
}

/// A single signed operator action (one half of a dual-control pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAction {
    /// Operator identifier (must differ between the two halves).
    pub operator_id: String,
    /// The operator's role, checked against an allowed-role matrix.
    pub role: String,
    /// The action being authorized, e.g. `"kill_switch"`, `"revoke"`.
    pub action: String,
    /// Tenant this action applies to, if tenant-scoped.
    pub tenant_id: Option<String>,
    /// Key id that signed this action (must differ between the halves).
    pub signer_key_id: String,
    /// When the action was signed.
    pub signed_at: DateTime<Utc>,
    /// Base64 Ed25519 signature over the action's hashed core.
    pub signature: String,
}

const ACTION_HASHED_FIELDS: &[&str] = &["signature"];

impl OperatorAction {
    /// Hash the action's core (everything but the signature).
    pub fn compute_hash(&self) -> Result<String, SettldError> {
        let value = serde_json::to_value(self)
            .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
        hash_excluding(&value, ACTION_HASHED_FIELDS)
    }

    /// Verify this action's signature under the given public key.
    #[must_use]
    pub fn verify_signature(&self, public_key_pem: &str) -> bool {
        let Ok(hash) = self.compute_hash() else {
            return false;
        };
        settld_crypto::verify_hash_hex(&hash, &self.signature, public_key_pem)
    }
}

/// Verify a dual-control pair for a sensitive action: two distinct,
/// validly signed operator actions from two distinct operators and
/// distinct signer keys, both with roles drawn from `allowed_roles`,
/// both naming the same action and (if set) the same tenant.
pub fn verify_dual_control(
    action_name: &str,
    first: &OperatorAction,
    first_public_key_pem: &str,
    second: &OperatorAction,
    second_public_key_pem: &str,
    allowed_roles: &[&str],
) -> Result<(), SettldError> {
    if first.action != action_name || second.action != action_name {
        return Err(err(
            ErrorCode::OperatorActionDecisionMismatch,
            "operator action names do not match the requested action",
        ));
    }
    if !allowed_roles.contains(&first.role.as_str()) || !allowed_roles.contains(&second.role.as_str()) {
        return Err(err(
            ErrorCode::OperatorActionRoleForbidden,
            "operator role is not permitted to perform this action",
        ));
    }
    if first.operator_id == second.operator_id {
        return Err(err(
            ErrorCode::DualControlDistinctOperatorRequired,
            "dual control requires two distinct operators",
        ));
    }
    if first.signer_key_id == second.signer_key_id {
        return Err(err(
            ErrorCode::DualControlDistinctSignerKeyRequired,
            "dual control requires two distinct signer keys",
        ));
    }
    if first.tenant_id != second.tenant_id {
        return Err(err(
            ErrorCode::OperatorActionTenantMismatch,
            "operator actions disagree on tenant",
        ));
    }
    if !first.verify_signature(first_public_key_pem) {
        return Err(err(
            ErrorCode::OperatorActionSignatureSchemaMismatch,
            "first operator action signature is invalid",
        ));
    }
    if !second.verify_signature(second_public_key_pem) {
        return Err(err(
            ErrorCode::OperatorActionSignatureSchemaMismatch,
            "second operator action signature is invalid",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn empty_policy(rules: BTreeMap<String, SignerRule>) -> GovernancePolicyV2 {
        GovernancePolicyV2 {
            schema_version: "GovernancePolicy.v2".into(),
            policy_id: "policy-1".into(),
            revocation_list_ref: RevocationListRef {
                path: "governance/revocations.json".into(),
                sha256: "a".repeat(64),
            },
            signer_rules: rules,
            generated_at: Utc::now(),
            signer_key_id: "key_root".into(),
            signed_at: Utc::now(),
            policy_hash: String::new(),
            signature: String::new(),
        }
    }

    fn empty_list() -> RevocationListV1 {
        RevocationListV1 {
            schema_version: "RevocationList.v1".into(),
            list_id: "list-1".into(),
            rotations: vec![],
            revocations: vec![],
            signer_key_id: "key_root".into(),
            signed_at: Utc::now(),
            list_hash: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn signer_rule_requires_governed_needs_allowed_key_ids() {
        let rule = SignerRule {
            allowed_scopes: vec!["sign".into()],
            allowed_key_ids: vec![],
            require_governed: true,
            required_purpose: None,
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn ungoverned_subject_type_is_always_allowed() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "work_certificate".into(),
            SignerRule {
                allowed_scopes: vec![],
                allowed_key_ids: vec![],
                require_governed: false,
                required_purpose: None,
            },
        );
        let policy = empty_policy(rules);
        let list = empty_list();
        assert!(is_governed(&policy, &list, "work_certificate", "key_x", "anything", Utc::now()));
    }

    #[test]
    fn governed_subject_requires_allowed_key_and_scope() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "work_certificate".into(),
            SignerRule {
                allowed_scopes: vec!["work_certificate:sign".into()],
                allowed_key_ids: vec!["key_server".into()],
                require_governed: true,
                required_purpose: Some(RequiredPurpose::Server),
            },
        );
        let policy = empty_policy(rules);
        let list = empty_list();
        assert!(is_governed(
            &policy,
            &list,
            "work_certificate",
            "key_server",
            "work_certificate:sign",
            Utc::now()
        ));
        assert!(!is_governed(
            &policy,
            &list,
            "work_certificate",
            "key_other",
            "work_certificate:sign",
            Utc::now()
        ));
        assert!(!is_governed(
            &policy,
            &list,
            "work_certificate",
            "key_server",
            "wrong_scope",
            Utc::now()
        ));
    }

    #[test]
    fn revoked_key_is_not_governed() {
        let mut rules = BTreeMap::new();
        rules.insert(
            "work_certificate".into(),
            SignerRule {
                allowed_scopes: vec!["sign".into()],
                allowed_key_ids: vec!["key_server".into()],
                require_governed: true,
                required_purpose: None,
            },
        );
        let policy = empty_policy(rules);
        let mut list = empty_list();
        list.revocations.push(Revocation {
            key_id: "key_server".into(),
            reason: "compromised".into(),
            at: Utc::now() - Duration::days(1),
            until: None,
        });
        assert!(!is_governed(&policy, &list, "work_certificate", "key_server", "sign", Utc::now()));
    }

    #[test]
    fn rotation_chain_resolves_to_successor() {
        let mut list = empty_list();
        list.rotations.push(Rotation {
            key_id: "key_old".into(),
            new_key_id: "key_mid".into(),
            at: Utc::now() - Duration::days(2),
        });
        list.rotations.push(Rotation {
            key_id: "key_mid".into(),
            new_key_id: "key_new".into(),
            at: Utc::now() - Duration::days(1),
        });
        assert_eq!(list.resolve_active_key("key_old"), "key_new");
        assert_eq!(list.resolve_active_key("key_unrelated"), "key_unrelated");
    }

    #[test]
    fn revocation_window_expires() {
        let mut list = empty_list();
        list.revocations.push(Revocation {
            key_id: "key_server".into(),
            reason: "temporary hold".into(),
            at: Utc::now() - Duration::days(2),
            until: Some(Utc::now() - Duration::days(1)),
        });
        assert!(!list.is_revoked("key_server", Utc::now()));
    }

    fn signed_action(
        operator_id: &str,
        role: &str,
        action: &str,
        tenant_id: Option<&str>,
        private_key_pem: &str,
    ) -> OperatorAction {
        let mut a = OperatorAction {
            operator_id: operator_id.into(),
            role: role.into(),
            action: action.into(),
            tenant_id: tenant_id.map(String::from),
            signer_key_id: settld_crypto::derive_key_id(
                &settld_crypto::generate_keypair().unwrap().public_key_pem,
            ),
            signed_at: Utc::now(),
            signature: String::new(),
        };
        let hash = a.compute_hash().unwrap();
        a.signature = settld_crypto::sign_bytes(private_key_pem, &hex_decode(&hash)).unwrap();
        a
    }

    fn hex_decode(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn dual_control_accepts_two_distinct_valid_actions() {
        let kp1 = settld_crypto::generate_keypair().unwrap();
        let kp2 = settld_crypto::generate_keypair().unwrap();

        let mut first = signed_action("op-1", "security_lead", "kill_switch", Some("tenant-a"), &kp1.private_key_pem);
        first.signer_key_id = kp1.key_id.clone();
        let hash1 = first.compute_hash().unwrap();
        first.signature = settld_crypto::sign_bytes(&kp1.private_key_pem, &hex_decode(&hash1)).unwrap();

        let mut second = signed_action("op-2", "compliance_officer", "kill_switch", Some("tenant-a"), &kp2.private_key_pem);
        second.signer_key_id = kp2.key_id.clone();
        let hash2 = second.compute_hash().unwrap();
        second.signature = settld_crypto::sign_bytes(&kp2.private_key_pem, &hex_decode(&hash2)).unwrap();

        verify_dual_control(
            "kill_switch",
            &first,
            &kp1.public_key_pem,
            &second,
            &kp2.public_key_pem,
            &["security_lead", "compliance_officer"],
        )
        .unwrap();
    }

    #[test]
    fn dual_control_rejects_same_operator() {
        let kp1 = settld_crypto::generate_keypair().unwrap();
        let kp2 = settld_crypto::generate_keypair().unwrap();
        let mut first = signed_action("op-1", "security_lead", "kill_switch", None, &kp1.private_key_pem);
        first.signer_key_id = kp1.key_id.clone();
        first.signature = settld_crypto::sign_bytes(&kp1.private_key_pem, &hex_decode(&first.compute_hash().unwrap())).unwrap();
        let mut second = signed_action("op-1", "security_lead", "kill_switch", None, &kp2.private_key_pem);
        second.signer_key_id = kp2.key_id.clone();
        second.signature = settld_crypto::sign_bytes(&kp2.private_key_pem, &hex_decode(&second.compute_hash().unwrap())).unwrap();

        let result = verify_dual_control(
            "kill_switch",
            &first,
            &kp1.public_key_pem,
            &second,
            &kp2.public_key_pem,
            &["security_lead"],
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::DualControlDistinctOperatorRequired);
    }

    #[test]
    fn dual_control_rejects_role_outside_matrix() {
        let kp1 = settld_crypto::generate_keypair().unwrap();
        let kp2 = settld_crypto::generate_keypair().unwrap();
        let mut first = signed_action("op-1", "intern", "kill_switch", None, &kp1.private_key_pem);
        first.signer_key_id = kp1.key_id.clone();
        first.signature = settld_crypto::sign_bytes(&kp1.private_key_pem, &hex_decode(&first.compute_hash().unwrap())).unwrap();
        let mut second = signed_action("op-2", "security_lead", "kill_switch", None, &kp2.private_key_pem);
        second.signer_key_id = kp2.key_id.clone();
        second.signature = settld_crypto::sign_bytes(&kp2.private_key_pem, &hex_decode(&second.compute_hash().unwrap())).unwrap();

        let result = verify_dual_control(
            "kill_switch",
            &first,
            &kp1.public_key_pem,
            &second,
            &kp2.public_key_pem,
            &["security_lead", "compliance_officer"],
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::OperatorActionRoleForbidden);
    }
}
