use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("store is closed")]
    Closed,
    #[error("storage error: {0}")]
    Storage(String),
}

/// An embedded key/value store with TTL support.
///
/// Implementations own their internal locking: every method must be safe
/// under unbounded concurrent callers. Values are opaque strings; encoding
/// concerns belong to the repository layer above.
#[async_trait]
pub trait Client: Send + Sync {
    async fn get(&self, key: String) -> Result<String, KvError>;

    async fn set(&self, key: String, value: String) -> Result<(), KvError>;

    /// Write a value that expires automatically after `ttl`. The key stays
    /// readable with this value until the deadline, then reads as absent.
    /// This is the deferred-delete primitive.
    async fn set_with_expiry(&self, key: String, value: String, ttl: Duration)
        -> Result<(), KvError>;

    /// Idempotent: succeeds whether or not the key exists.
    async fn del(&self, key: String) -> Result<(), KvError>;

    /// All live values whose key starts with `prefix`, in key order.
    /// Zero matches is Ok(vec![]).
    async fn scan_prefix(&self, prefix: String) -> Result<Vec<String>, KvError>;

    async fn close(&self) -> Result<(), KvError>;
}

mod memory;
mod mock;

pub use memory::MemoryKvClient;
pub use mock::MockKvClient;
