use common_kvstore::KvError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache miss. A normal outcome for callers, not a system failure.
    #[error("not found")]
    NotFound,

    /// Malformed JSON in the store or in an incoming payload. Fatal to the
    /// individual record or key, never retried.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("kv store error: {0}")]
    Store(KvError),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }
}

impl From<KvError> for CacheError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NotFound => CacheError::NotFound,
            other => CacheError::Store(other),
        }
    }
}
