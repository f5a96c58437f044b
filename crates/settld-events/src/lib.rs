// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Append-only, chain-hashed event log.
//!
//! Every event binds to its predecessor through a running SHA-256 chain
//! hash; per-event-type payload schemas are validated on push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settld_canon::sha256_hex;
use settld_error::{ErrorCode, SettldError};
use std::collections::HashSet;
use std::fmt;

fn err(code: ErrorCode, message: impl Into<String>) -> SettldError {
    SettldError::new(code, message)
}

/// Who performed an action: a role tag plus an identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    /// The actor's role, e.g. `"operator"`, `"robot"`, `"customer"`.
    pub role: String,
    /// The actor's identifier within that role.
    pub id: String,
}

/// Priority levels used by assist-request payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Normal priority.
    Normal,
    /// High priority.
    High,
    /// Critical priority, paged immediately.
    Critical,
}

/// One event in a job's append-only stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event identifier, assigned on creation.
    pub id: String,
    /// The stream (job id) this event belongs to.
    pub stream_id: String,
    /// Event type tag, e.g. `"JOB_CREATED"`, `"ASSIST_REQUESTED"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event occurred.
    pub at: DateTime<Utc>,
    /// Type-specific payload.
    pub payload: serde_json::Value,
    /// Who caused the event.
    pub actor: Actor,
    /// Key id of the signer, if this event is signed.
    pub signer_key_id: Option<String>,
    /// Base64 Ed25519 signature over `chainHash`, if signed.
    pub signature: Option<String>,
    /// `SHA256(chainHash(prev) ++ canonical(self minus chainHash/signature))`.
    pub chain_hash: String,
}

const CHAIN_HASHED_FIELDS: &[&str] = &["chainHash", "signature"];

/// Errors from event chain operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// An event's stored `chainHash` does not match the recomputed value.
    HashMismatch {
        /// Index of the offending event.
        index: usize,
    },
    /// A signed event's signature does not verify under its claimed key.
    SignatureInvalid {
        /// Index of the offending event.
        index: usize,
    },
    /// An event's payload failed its per-type schema.
    PayloadInvalid {
        /// Index of the offending event.
        index: usize,
        /// What was wrong.
        reason: String,
    },
    /// The stream's first event was not `JOB_CREATED`.
    MissingJobCreated,
    /// A duplicate event id was encountered.
    DuplicateId {
        /// The duplicate id.
        id: String,
    },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashMismatch { index } => write!(f, "chain hash mismatch at index {index}"),
            Self::SignatureInvalid { index } => write!(f, "invalid signature at index {index}"),
            Self::PayloadInvalid { index, reason } => {
                write!(f, "invalid payload at index {index}: {reason}")
            }
            Self::MissingJobCreated => write!(f, "stream does not start with JOB_CREATED"),
            Self::DuplicateId { id } => write!(f, "duplicate event id: {id}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<ChainError> for SettldError {
    fn from(e: ChainError) -> Self {
        let code = match e {
            ChainError::MissingJobCreated => ErrorCode::StreamMissingJobCreated,
            ChainError::HashMismatch { .. } => ErrorCode::ChainHashMismatch,
            ChainError::SignatureInvalid { .. } => ErrorCode::ChainHashMismatch,
            ChainError::PayloadInvalid { .. } => ErrorCode::SchemaInvalid,
            ChainError::DuplicateId { .. } => ErrorCode::SchemaInvalid,
        };
        err(code, e.to_string())
    }
}

/// Validate one event's payload against its type's required shape.
///
/// Only the handful of payload contracts named in the component design
/// are enforced here; unrecognized event types pass through unchecked so
/// new event types can be introduced without a schema-registry round trip.
pub fn validate_payload(event_type: &str, payload: &serde_json::Value) -> Result<(), String> {
    let obj = payload
        .as_object()
        .ok_or_else(|| "payload must be an object".to_string())?;
    match event_type {
        "ASSIST_REQUESTED" => {
            for field in ["jobId", "robotId", "requestedAt"] {
                if !obj.contains_key(field) {
                    return Err(format!("ASSIST_REQUESTED payload missing {field}"));
                }
            }
            let priority = obj
                .get("priority")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "ASSIST_REQUESTED payload missing priority".to_string())?;
            if !["LOW", "NORMAL", "HIGH", "CRITICAL"].contains(&priority) {
                return Err(format!("invalid priority {priority}"));
            }
            Ok(())
        }
        "JOB_CREATED" => {
            for field in ["jobId", "tenantId"] {
                if !obj.contains_key(field) {
                    return Err(format!("JOB_CREATED payload missing {field}"));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// An ordered, chain-hash-verified stream of events for one job.
///
/// Mirrors the push/verify shape of a receipt chain, generalized from a
/// single-struct ledger to arbitrary typed events with per-type payload
/// validation.
#[derive(Debug, Clone, Default)]
pub struct EventChain {
    stream_id: Option<String>,
    events: Vec<Event>,
    seen_ids: HashSet<String>,
}

impl EventChain {
    /// Create an empty event chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute what `chainHash` should be for `event`, given the hash of
    /// the preceding event (empty string for the first event in a stream).
    pub fn compute_chain_hash(prev_chain_hash: &str, event: &Event) -> Result<String, SettldError> {
        let value = serde_json::to_value(event)
            .map_err(|e| err(ErrorCode::SchemaInvalid, format!("serialization failed: {e}")))?;
        let core = settld_canon::excluding_fields(&value, CHAIN_HASHED_FIELDS);
        let core_bytes = settld_canon::canonical_bytes(&core)?;
        let mut preimage = prev_chain_hash.as_bytes().to_vec();
        preimage.extend_from_slice(&core_bytes);
        Ok(sha256_hex(&preimage))
    }

    /// Validate and append an event to the chain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::MissingJobCreated`] if this is the first
    /// event in the stream and its type is not `JOB_CREATED`,
    /// [`ChainError::PayloadInvalid`] if the payload fails its per-type
    /// schema, [`ChainError::HashMismatch`] if `chainHash` does not match
    /// the recomputed value, [`ChainError::SignatureInvalid`] if a signed
    /// event's signature fails verification under `public_key_pem`, and
    /// [`ChainError::DuplicateId`] if the event id was already seen.
    pub fn push(&mut self, event: Event, public_key_pem: Option<&str>) -> Result<(), ChainError> {
        let index = self.events.len();

        if self.seen_ids.contains(&event.id) {
            return Err(ChainError::DuplicateId { id: event.id.clone() });
        }

        if index == 0 {
            match &self.stream_id {
                Some(s) if *s != event.stream_id => {
                    return Err(ChainError::PayloadInvalid {
                        index,
                        reason: "event streamId does not match chain".into(),
                    });
                }
                _ => {}
            }
            if event.event_type != "JOB_CREATED" {
                return Err(ChainError::MissingJobCreated);
            }
        }

        validate_payload(&event.event_type, &event.payload).map_err(|reason| {
            ChainError::PayloadInvalid { index, reason }
        })?;

        let prev_hash = self
            .events
            .last()
            .map(|e| e.chain_hash.as_str())
            .unwrap_or("");
        let expected = Self::compute_chain_hash(prev_hash, &event)
            .map_err(|_| ChainError::HashMismatch { index })?;
        if expected != event.chain_hash {
            return Err(ChainError::HashMismatch { index });
        }

        if let (Some(sig), Some(key_id), Some(pem)) =
            (&event.signature, &event.signer_key_id, public_key_pem)
        {
            let _ = key_id;
            if !settld_crypto::verify_hash_hex(&event.chain_hash, sig, pem) {
                return Err(ChainError::SignatureInvalid { index });
            }
        }

        self.stream_id = Some(event.stream_id.clone());
        self.seen_ids.insert(event.id.clone());
        self.events.push(event);
        Ok(())
    }

    /// Append an unsigned event without signature verification.
    pub fn push_unsigned(&mut self, event: Event) -> Result<(), ChainError> {
        self.push(event, None)
    }

    /// Re-verify every stored event's chain hash from scratch.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.events.is_empty() {
            return Ok(());
        }
        if self.events[0].event_type != "JOB_CREATED" {
            return Err(ChainError::MissingJobCreated);
        }
        let mut prev = String::new();
        for (index, event) in self.events.iter().enumerate() {
            let expected = Self::compute_chain_hash(&prev, event)
                .map_err(|_| ChainError::HashMismatch { index })?;
            if expected != event.chain_hash {
                return Err(ChainError::HashMismatch { index });
            }
            prev = event.chain_hash.clone();
        }
        Ok(())
    }

    /// Number of events in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The last event's `chainHash`, or the empty string for an empty
    /// stream.
    #[must_use]
    pub fn last_chain_hash(&self) -> &str {
        self.events.last().map(|e| e.chain_hash.as_str()).unwrap_or("")
    }

    /// Iterate over events in stream order.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Borrow the full event slice.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl<'a> IntoIterator for &'a EventChain {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Build the next unsigned event for a stream, filling in `id` and
/// `chainHash` from the current chain tail.
pub fn next_event(
    chain: &EventChain,
    stream_id: impl Into<String>,
    event_type: impl Into<String>,
    at: DateTime<Utc>,
    payload: serde_json::Value,
    actor: Actor,
) -> Result<Event, SettldError> {
    let mut event = Event {
        id: uuid::Uuid::new_v4().to_string(),
        stream_id: stream_id.into(),
        event_type: event_type.into(),
        at,
        payload,
        actor,
        signer_key_id: None,
        signature: None,
        chain_hash: String::new(),
    };
    event.chain_hash = EventChain::compute_chain_hash(chain.last_chain_hash(), &event)?;
    Ok(event)
}

// ── Stream concurrency (§5) ──────────────────────────────────────────

/// A held lease on a streamId. Dropping the guard releases the lease.
///
/// The concrete lock/lease mechanism (distributed lock, DB row lock,
/// in-process mutex) is an implementation detail of the `StreamLease`
/// that issued it; only the RAII release on drop is guaranteed.
pub trait StreamLeaseGuard: Send {}

/// Per-streamId serialization point (§5 "operations on a single stream
/// must be totally ordered, enforced by a per-stream lease or
/// transaction"). The concrete backing (database advisory lock,
/// distributed lease service) is out of scope; this is the narrow
/// trait boundary the spec calls for.
pub trait StreamLease: Send + Sync {
    /// The lease guard this implementation hands out.
    type Guard: StreamLeaseGuard;

    /// Attempt to acquire exclusive access to `stream_id` without
    /// blocking. Returns `STREAM_CONCURRENCY_CONFLICT` if another
    /// holder already has the stream leased.
    fn try_acquire(&self, stream_id: &str) -> Result<Self::Guard, SettldError>;
}

/// An in-process `StreamLease` backed by a set of currently-held
/// streamIds, for single-daemon deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryStreamLease {
    held: std::sync::Mutex<HashSet<String>>,
}

impl InMemoryStreamLease {
    /// Build an empty lease registry.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The guard returned by [`InMemoryStreamLease`]; releases its
/// streamId on drop.
#[derive(Debug)]
pub struct InMemoryStreamLeaseGuard {
    stream_id: String,
    registry: std::sync::Arc<InMemoryStreamLease>,
}

impl StreamLeaseGuard for InMemoryStreamLeaseGuard {}

impl Drop for InMemoryStreamLeaseGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.registry.held.lock() {
            held.remove(&self.stream_id);
        }
    }
}

impl StreamLease for std::sync::Arc<InMemoryStreamLease> {
    type Guard = InMemoryStreamLeaseGuard;

    fn try_acquire(&self, stream_id: &str) -> Result<Self::Guard, SettldError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| err(ErrorCode::StreamConcurrencyConflict, "stream lease registry poisoned"))?;
        if !held.insert(stream_id.to_string()) {
            return Err(err(
                ErrorCode::StreamConcurrencyConflict,
                format!("streamId {stream_id} is already leased"),
            ));
        }
        drop(held);
        Ok(InMemoryStreamLeaseGuard {
            stream_id: stream_id.to_string(),
            registry: std::sync::Arc::clone(self),
        })
    }
}
