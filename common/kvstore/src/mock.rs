use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{Client, KvError};

/// Mock client for dependent-crate tests that need failure injection.
/// Behaves like the in-memory store, minus TTL handling, plus per-key
/// scripted errors.
#[derive(Clone, Default)]
pub struct MockKvClient {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    set_errors: Arc<Mutex<HashMap<String, KvError>>>,
    get_errors: Arc<Mutex<HashMap<String, KvError>>>,
}

impl MockKvClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_err_ret(self, key: &str, err: KvError) -> Self {
        Self::lock(&self.set_errors).insert(key.to_owned(), err);
        self
    }

    pub fn get_err_ret(self, key: &str, err: KvError) -> Self {
        Self::lock(&self.get_errors).insert(key.to_owned(), err);
        self
    }
}

#[async_trait]
impl Client for MockKvClient {
    async fn get(&self, key: String) -> Result<String, KvError> {
        if let Some(err) = Self::lock(&self.get_errors).get(&key) {
            return Err(err.clone());
        }

        Self::lock(&self.entries)
            .get(&key)
            .cloned()
            .ok_or(KvError::NotFound)
    }

    async fn set(&self, key: String, value: String) -> Result<(), KvError> {
        if let Some(err) = Self::lock(&self.set_errors).get(&key) {
            return Err(err.clone());
        }

        Self::lock(&self.entries).insert(key, value);
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: String,
        value: String,
        _ttl: Duration,
    ) -> Result<(), KvError> {
        self.set(key, value).await
    }

    async fn del(&self, key: String) -> Result<(), KvError> {
        Self::lock(&self.entries).remove(&key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: String) -> Result<Vec<String>, KvError> {
        Ok(Self::lock(&self.entries)
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn close(&self) -> Result<(), KvError> {
        Self::lock(&self.entries).clear();
        Ok(())
    }
}
