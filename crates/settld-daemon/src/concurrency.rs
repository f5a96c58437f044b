// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation and persistence trait boundaries (§5).
//!
//! Blocking/suspension is confined to `async fn` boundaries on I/O:
//! the store, object storage, remote signer, and external reserve.
//! Hashing and canonical JSON never suspend. `Store` and `ObjectStore`
//! are the narrow trait boundaries the spec calls for in place of a
//! concrete database or blob-storage integration (§1).

use settld_error::{ErrorCode, SettldError};
use std::future::Future;
use std::time::Duration;

/// A key-value transactional store, out of scope as a concrete
/// integration (§1). Reads and writes suspend; they never partially
/// mutate on cancellation.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Fetch a value by key, if present.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SettldError>;
    /// Write a value, replacing any prior value for `key`.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), SettldError>;
}

/// Content-addressed blob storage, out of scope as a concrete
/// integration (§1). Used to persist ClosePack archives and other
/// artifacts larger than the event log wants to carry inline.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`.
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), SettldError>;
    /// Read the bytes stored under `key`, if present.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, SettldError>;
}

/// Run `fut` under a deadline; on expiry, return `TIMEOUT` without
/// running any of `fut`'s remaining side effects (§5 "cancellation
/// returns `REQUEST_TIMEOUT` without mutating state").
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, SettldError>
where
    F: Future<Output = Result<T, SettldError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SettldError::new(ErrorCode::Timeout, "deadline exceeded before the operation completed")),
    }
}
