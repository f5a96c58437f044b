// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Ed25519 signing, verification, and key-id derivation.
//!
//! Signers are exposed as a capability trait with two implementations —
//! a local PEM-backed signer and a remote callback — per the Design
//! Notes guidance to compose signing as a capability rather than a
//! concrete key everywhere a signature is required.

use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use settld_canon::sha256_hex;
use settld_error::{ErrorCode, SettldError};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

fn crypto_error(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// A freshly generated Ed25519 keypair, PEM-encoded.
pub struct GeneratedKeypair {
    /// SPKI PEM public key.
    pub public_key_pem: String,
    /// PKCS8 PEM private key.
    pub private_key_pem: String,
    /// Derived key id (`"key_" + sha256Hex(publicKeyPem)[0..24]`).
    pub key_id: String,
}

/// Generate a new Ed25519 keypair and derive its key id.
pub fn generate_keypair() -> Result<GeneratedKeypair, SettldError> {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let verifying_key = signing_key.verifying_key();

    let private_key_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| crypto_error(ErrorCode::SignerCannotSign, format!("failed to encode private key: {e}")))?
        .to_string();
    let public_key_pem = verifying_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| crypto_error(ErrorCode::SignerCannotSign, format!("failed to encode public key: {e}")))?;

    let key_id = derive_key_id(&public_key_pem);

    Ok(GeneratedKeypair {
        public_key_pem,
        private_key_pem,
        key_id,
    })
}

/// Recover a PKCS8 private key's SPKI public key PEM, so a caller that
/// only holds `private_key_pem` on disk (e.g. a daemon reading its
/// server signer key from a file at startup) can derive its own key id
/// without a separate public-key file.
pub fn public_key_pem_from_private(private_key_pem: &str) -> Result<String, SettldError> {
    let signing_key = SigningKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| crypto_error(ErrorCode::SignerCannotSign, format!("invalid private key pem: {e}")))?;
    signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| crypto_error(ErrorCode::SignerCannotSign, format!("failed to encode public key: {e}")))
}

/// `keyId = "key_" + sha256Hex(publicKeyPem)[0..24]`.
#[must_use]
pub fn derive_key_id(public_key_pem: &str) -> String {
    let digest = sha256_hex(public_key_pem.as_bytes());
    format!("key_{}", &digest[..24])
}

/// Sign arbitrary bytes with a PEM-encoded Ed25519 private key, returning
/// base64-encoded signature bytes.
pub fn sign_bytes(private_key_pem: &str, message: &[u8]) -> Result<String, SettldError> {
    let signing_key = SigningKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| crypto_error(ErrorCode::SignerCannotSign, format!("invalid private key pem: {e}")))?;
    let signature: Signature = signing_key.sign(message);
    Ok(B64.encode(signature.to_bytes()))
}

/// Verify a base64-encoded signature over `message` against a PEM-encoded
/// Ed25519 public key.
#[must_use]
pub fn verify_bytes(public_key_pem: &str, message: &[u8], signature_b64: &str) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_public_key_pem(public_key_pem) else {
        return false;
    };
    let Ok(sig_bytes) = B64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify_strict(message, &signature).is_ok()
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, SettldError> {
    if hex.len() % 2 != 0 {
        return Err(crypto_error(ErrorCode::SchemaInvalid, "hash hex has odd length"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| crypto_error(ErrorCode::SchemaInvalid, format!("invalid hex byte: {e}")))
        })
        .collect()
}

/// Sign a 32-byte (64 hex char) hash with a signer capability.
///
/// `purpose` and `context` are not mixed into the signed bytes — the
/// spec signs the hash alone — but are passed through to the signer so
/// remote capabilities can scope or audit the request.
///
/// # Errors
///
/// Returns [`ErrorCode::SignerCannotSign`] if neither a local key nor a
/// remote capability is available, or if `hashHex` is not a 64-character
/// hex string.
pub fn sign_hash_hex(
    hash_hex: &str,
    signer: &Signer,
    key_id: &str,
    purpose: &str,
    context: &str,
) -> Result<String, SettldError> {
    if hash_hex.len() != 64 {
        return Err(crypto_error(
            ErrorCode::SchemaInvalid,
            "hashHex must be a 64-character hex string",
        ));
    }
    let message = decode_hex(hash_hex)?;
    signer.sign(key_id, "ED25519-SHA256", &message, purpose, context)
}

/// `verifyHashHex(hashHex, sigB64, publicKeyPem) -> bool`.
#[must_use]
pub fn verify_hash_hex(hash_hex: &str, sig_b64: &str, public_key_pem: &str) -> bool {
    let Ok(message) = decode_hex(hash_hex) else {
        return false;
    };
    verify_bytes(public_key_pem, &message, sig_b64)
}

/// A callback-based remote signing capability: given a key id, algorithm
/// name, message bytes, purpose and context, produce a base64 signature.
pub trait RemoteSignerCapability: Send + Sync {
    /// Request a signature from the remote signer.
    fn sign(
        &self,
        key_id: &str,
        algorithm: &str,
        message: &[u8],
        purpose: &str,
        context: &str,
    ) -> Result<String, SettldError>;
}

/// The two-variant signer capability from Design Notes §9: a local
/// PEM-backed key, or a remote callback. `SIGNER_CANNOT_SIGN` is
/// returned when neither variant can actually produce a signature (e.g.
/// a `Local` variant whose key id doesn't match the requested one).
pub enum Signer {
    /// Local private key material, held in memory as PEM text.
    Local {
        /// PKCS8 PEM-encoded private key.
        private_key_pem: String,
    },
    /// A remote signer reached through a capability callback.
    Remote {
        /// The callback implementation.
        capability: std::sync::Arc<dyn RemoteSignerCapability>,
    },
}

impl Signer {
    fn sign(
        &self,
        key_id: &str,
        algorithm: &str,
        message: &[u8],
        purpose: &str,
        context: &str,
    ) -> Result<String, SettldError> {
        match self {
            Signer::Local { private_key_pem } => {
                let signing_key = SigningKey::from_pkcs8_pem(private_key_pem).map_err(|e| {
                    crypto_error(ErrorCode::SignerCannotSign, format!("invalid private key pem: {e}"))
                })?;
                let verifying_key = signing_key.verifying_key();
                let public_pem = verifying_key.to_public_key_pem(LineEnding::LF).map_err(|e| {
                    crypto_error(ErrorCode::SignerCannotSign, format!("failed to encode public key: {e}"))
                })?;
                let derived = derive_key_id(&public_pem);
                if derived != key_id {
                    return Err(crypto_error(
                        ErrorCode::SignerCannotSign,
                        format!("local signer holds key {derived}, not requested key {key_id}"),
                    ));
                }
                let signature: Signature = signing_key.sign(message);
                Ok(B64.encode(signature.to_bytes()))
            }
            Signer::Remote { capability } => {
                capability.sign(key_id, algorithm, message, purpose, context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_verifies_its_own_signature() {
        let kp = generate_keypair().unwrap();
        let hash = sha256_hex(b"a message to sign");
        let signer = Signer::Local {
            private_key_pem: kp.private_key_pem.clone(),
        };
        let sig = sign_hash_hex(&hash, &signer, &kp.key_id, "server", "test").unwrap();
        assert!(verify_hash_hex(&hash, &sig, &kp.public_key_pem));
    }

    #[test]
    fn tampered_hash_fails_verification() {
        let kp = generate_keypair().unwrap();
        let hash = sha256_hex(b"original message");
        let signer = Signer::Local {
            private_key_pem: kp.private_key_pem.clone(),
        };
        let sig = sign_hash_hex(&hash, &signer, &kp.key_id, "server", "test").unwrap();
        let other_hash = sha256_hex(b"different message");
        assert!(!verify_hash_hex(&other_hash, &sig, &kp.public_key_pem));
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let kp = generate_keypair().unwrap();
        let hash = sha256_hex(b"a message to sign");
        let signer = Signer::Local {
            private_key_pem: kp.private_key_pem.clone(),
        };
        let mut sig = sign_hash_hex(&hash, &signer, &kp.key_id, "server", "test").unwrap();
        sig.replace_range(0..1, if sig.starts_with('A') { "B" } else { "A" });
        assert!(!verify_hash_hex(&hash, &sig, &kp.public_key_pem));
    }

    #[test]
    fn public_key_pem_from_private_matches_generated_pair() {
        let kp = generate_keypair().unwrap();
        let recovered = public_key_pem_from_private(&kp.private_key_pem).unwrap();
        assert_eq!(recovered, kp.public_key_pem);
    }

    #[test]
    fn key_id_has_expected_shape() {
        let kp = generate_keypair().unwrap();
        assert!(kp.key_id.starts_with("key_"));
        assert_eq!(kp.key_id.len(), "key_".len() + 24);
    }

    #[test]
    fn local_signer_refuses_mismatched_key_id() {
        let kp = generate_keypair().unwrap();
        let hash = sha256_hex(b"message");
        let signer = Signer::Local {
            private_key_pem: kp.private_key_pem,
        };
        let err = sign_hash_hex(&hash, &signer, "key_not_this_one_000000", "server", "test").unwrap_err();
        assert_eq!(err.code, ErrorCode::SignerCannotSign);
    }

    #[test]
    fn rejects_non_64_char_hash() {
        let kp = generate_keypair().unwrap();
        let signer = Signer::Local {
            private_key_pem: kp.private_key_pem,
        };
        let err = sign_hash_hex("deadbeef", &signer, &kp.key_id, "server", "test").unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaInvalid);
    }

    struct EchoRemoteSigner {
        expected_key_id: String,
        private_key_pem: String,
    }

    impl RemoteSignerCapability for EchoRemoteSigner {
        fn sign(
            &self,
            key_id: &str,
            _algorithm: &str,
            message: &[u8],
            _purpose: &str,
            _context: &str,
        ) -> Result<String, SettldError> {
            if key_id != self.expected_key_id {
                return Err(SettldError::new(ErrorCode::SignerCannotSign, "unknown key"));
            }
            sign_bytes(&self.private_key_pem, message)
        }
    }

    #[test]
    fn remote_signer_capability_round_trips() {
        let kp = generate_keypair().unwrap();
        let signer = Signer::Remote {
            capability: std::sync::Arc::new(EchoRemoteSigner {
                expected_key_id: kp.key_id.clone(),
                private_key_pem: kp.private_key_pem.clone(),
            }),
        };
        let hash = sha256_hex(b"remote-signed message");
        let sig = sign_hash_hex(&hash, &signer, &kp.key_id, "server", "ctx").unwrap();
        assert!(verify_hash_hex(&hash, &sig, &kp.public_key_pem));
    }
}
