/*!
Object store clients that receive uploaded batches.

This module defines the upload abstraction (port) and concrete implementations
(adapters). The coordinator only ever performs one call, a PUT of a complete
blob, so that is the whole interface; timeouts and credentials belong to the
adapter.
*/

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Result, SpoolError};

pub use local::LocalObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// Access level applied to an uploaded object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Private,
    #[default]
    PublicRead,
}

impl Visibility {
    /// Canned ACL name understood by S3-compatible stores
    pub fn as_acl(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::PublicRead => "public-read",
        }
    }
}

/// One object upload
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub visibility: Visibility,
}

/// Remote store accepting whole-object uploads
///
/// Implementations must either store the full body under the key or return an
/// error; the coordinator deletes staged data only after `Ok(())`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Upload `request.body` under `request.key`
    async fn put(&self, request: PutRequest) -> Result<()>;
}

#[async_trait]
impl<T: ObjectStoreClient + ?Sized> ObjectStoreClient for Arc<T> {
    async fn put(&self, request: PutRequest) -> Result<()> {
        (**self).put(request).await
    }
}

#[async_trait]
impl<T: ObjectStoreClient + ?Sized> ObjectStoreClient for Box<T> {
    async fn put(&self, request: PutRequest) -> Result<()> {
        (**self).put(request).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    puts: Vec<PutRequest>,
    fail_next: usize,
    unavailable: bool,
}

/// In-process object store
///
/// Keeps every successful put in order, including puts that reuse a key, and
/// can be told to reject uploads. Clones share state, so a test can hand one
/// clone to a sink and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` uploads
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Reject every upload until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// All accepted uploads in the order they arrived
    pub fn puts(&self) -> Vec<PutRequest> {
        self.lock().puts.clone()
    }

    /// Most recent body stored under `key`
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock()
            .puts
            .iter()
            .rev()
            .find(|put| put.key == key)
            .map(|put| put.body.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn put(&self, request: PutRequest) -> Result<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(SpoolError::upload(format!(
                "store unavailable (key: {})",
                request.key
            )));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SpoolError::upload(format!(
                "injected network failure (key: {})",
                request.key
            )));
        }
        state.puts.push(request);
        Ok(())
    }
}
