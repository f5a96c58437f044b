// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Trust directory: governance roots, time authorities, and (in dev
//! mode) local keypairs, persisted with restricted file permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_error::{ErrorCode, SettldError};
use std::collections::BTreeMap;
use std::path::Path;

/// Where a trust-store key's public material came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyProvenance {
    /// Generated and held locally (dev mode).
    Local,
    /// Resolved from a remote signer reached over HTTP.
    RemoteUrl {
        /// The signer URL.
        url: String,
    },
    /// Resolved from a remote signer invoked as a subprocess.
    RemoteCommand {
        /// The command used to resolve the key.
        command: String,
    },
}

/// The role a trust-store key plays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// Signs governance policies and revocation lists.
    GovernanceRoot,
    /// Co-signs timestamp proofs.
    TimeAuthority,
    /// Signs server-issued artifacts (Settld-Pay tokens, etc.).
    Server,
}

/// One entry in the trust directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    /// The key id (`"key_" + sha256Hex(publicKeyPem)[0..24]`).
    pub key_id: String,
    /// SPKI PEM public key.
    pub public_key_pem: String,
    /// The role this key plays.
    pub role: KeyRole,
    /// Where the public key came from.
    pub provenance: KeyProvenance,
}

/// Persisted `trust.json` contents: governance roots, time authorities,
/// and provenance for every key, independent of whether private key
/// material is held locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustStore {
    /// All trust records, keyed by key id.
    pub records: BTreeMap<String, TrustRecord>,
}

impl TrustStore {
    /// Register a trust record. Returns the previous record for this key
    /// id, if one existed.
    pub fn insert(&mut self, record: TrustRecord) -> Option<TrustRecord> {
        self.records.insert(record.key_id.clone(), record)
    }

    /// Look up a governance root key's PEM by key id.
    #[must_use]
    pub fn governance_root(&self, key_id: &str) -> Option<&str> {
        self.records
            .get(key_id)
            .filter(|r| r.role == KeyRole::GovernanceRoot)
            .map(|r| r.public_key_pem.as_str())
    }

    /// Look up a time authority key's PEM by key id.
    #[must_use]
    pub fn time_authority(&self, key_id: &str) -> Option<&str> {
        self.records
            .get(key_id)
            .filter(|r| r.role == KeyRole::TimeAuthority)
            .map(|r| r.public_key_pem.as_str())
    }

    /// All key ids with the given role, in sorted order.
    #[must_use]
    pub fn key_ids_for_role(&self, role: KeyRole) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.role == role)
            .map(|r| r.key_id.clone())
            .collect()
    }
}

/// Locally held private keys, persisted separately from `trust.json`
/// with `0600` permissions. Absent entirely in remote-only mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalKeypairs {
    /// Key id → PKCS8 PEM private key.
    pub keys: BTreeMap<String, String>,
}

/// Result of a local `settld-trust init` run.
pub struct LocalInit {
    /// The trust store, written to `trust.json`.
    pub trust: TrustStore,
    /// The local keypairs, written to `keypairs.json`.
    pub keypairs: LocalKeypairs,
    /// The governance root key id.
    pub governance_root_key_id: String,
    /// The time authority key id, if `with_time_authority` was set.
    pub time_authority_key_id: Option<String>,
}

/// Initialize a local (dev-mode) trust directory: generates a
/// governance root keypair and, optionally, a time authority keypair.
pub fn init_local(with_time_authority: bool) -> Result<LocalInit, SettldError> {
    let generated_at = Utc::now();
    let root = settld_crypto::generate_keypair()?;
    let mut trust = TrustStore::default();
    let mut keypairs = LocalKeypairs::default();

    trust.insert(TrustRecord {
        key_id: root.key_id.clone(),
        public_key_pem: root.public_key_pem.clone(),
        role: KeyRole::GovernanceRoot,
        provenance: KeyProvenance::Local,
    });
    keypairs
        .keys
        .insert(root.key_id.clone(), root.private_key_pem.clone());

    let time_authority_key_id = if with_time_authority {
        let ta = settld_crypto::generate_keypair()?;
        trust.insert(TrustRecord {
            key_id: ta.key_id.clone(),
            public_key_pem: ta.public_key_pem.clone(),
            role: KeyRole::TimeAuthority,
            provenance: KeyProvenance::Local,
        });
        keypairs.keys.insert(ta.key_id.clone(), ta.private_key_pem);
        Some(ta.key_id)
    } else {
        None
    };

    let _ = generated_at;
    Ok(LocalInit {
        governance_root_key_id: root.key_id,
        time_authority_key_id,
        trust,
        keypairs,
    })
}

/// Initialize a remote-only trust directory: public keys are resolved
/// through `resolve_public_key` (the remote signer's `getPublicKey`
/// capability) and no private key material is ever held locally.
pub fn init_remote_only(
    governance_root_key_id: &str,
    time_authority_key_id: Option<&str>,
    provenance: KeyProvenance,
    resolve_public_key: impl Fn(&str) -> Result<String, SettldError>,
) -> Result<TrustStore, SettldError> {
    let mut trust = TrustStore::default();

    let root_pem = resolve_public_key(governance_root_key_id)?;
    trust.insert(TrustRecord {
        key_id: governance_root_key_id.to_string(),
        public_key_pem: root_pem,
        role: KeyRole::GovernanceRoot,
        provenance: provenance.clone(),
    });

    if let Some(ta_id) = time_authority_key_id {
        let ta_pem = resolve_public_key(ta_id)?;
        trust.insert(TrustRecord {
            key_id: ta_id.to_string(),
            public_key_pem: ta_pem,
            role: KeyRole::TimeAuthority,
            provenance,
        });
    }

    Ok(trust)
}

fn io_error(message: impl Into<String>) -> SettldError {
    SettldError::new(ErrorCode::SchemaInvalid, message)
}

/// Write `trust.json` with `0644` permissions.
pub fn write_trust_file(path: &Path, trust: &TrustStore) -> Result<(), SettldError> {
    let json = serde_json::to_string_pretty(trust)
        .map_err(|e| io_error(format!("failed to serialize trust store: {e}")))?;
    std::fs::write(path, format!("{json}\n"))
        .map_err(|e| io_error(format!("failed to write {}: {e}", path.display())))?;
    set_mode(path, 0o644)?;
    Ok(())
}

/// Write `keypairs.json` with `0600` permissions.
pub fn write_keypairs_file(path: &Path, keypairs: &LocalKeypairs) -> Result<(), SettldError> {
    let json = serde_json::to_string_pretty(keypairs)
        .map_err(|e| io_error(format!("failed to serialize keypairs: {e}")))?;
    std::fs::write(path, format!("{json}\n"))
        .map_err(|e| io_error(format!("failed to write {}: {e}", path.display())))?;
    set_mode(path, 0o600)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SettldError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms)
        .map_err(|e| io_error(format!("failed to set permissions on {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SettldError> {
    Ok(())
}

/// Read `trust.json` back from disk.
pub fn read_trust_file(path: &Path) -> Result<TrustStore, SettldError> {
    let bytes =
        std::fs::read(path).map_err(|e| io_error(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|e| io_error(format!("invalid trust.json: {e}")))
}

/// Read `keypairs.json` back from disk.
pub fn read_keypairs_file(path: &Path) -> Result<LocalKeypairs, SettldError> {
    let bytes =
        std::fs::read(path).map_err(|e| io_error(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|e| io_error(format!("invalid keypairs.json: {e}")))
}

/// Whether the current timestamp falls within a revoked window
/// (inclusive start, optional open end) — shared by governance's
/// revocation-list checks and time-authority validity windows.
#[must_use]
pub fn within_window(now: DateTime<Utc>, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
    now >= start && end.is_none_or(|e| now <= e)
}
