use super::error::{DbError, Result};
use super::lock::LockTable;
use super::transaction::MemoryTx;
use crate::context::Context;
use crate::core::ConfigError;
use crate::datastore::Datastore;
use crate::retry::policy::duration_ms;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{Level, event};

/// Lock behaviour of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long a transaction waits for a row lock before failing with
    /// [`DbError::LockWaitTimeout`].
    #[serde(rename = "lock_wait_timeout_ms", with = "duration_ms")]
    pub lock_wait_timeout: Duration,
}

impl LockConfig {
    /// Set the lock wait timeout
    pub fn lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.lock_wait_timeout.is_zero() {
            return Err("lock_wait_timeout must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout: Duration::from_secs(1),
        }
    }
}

/// Transaction counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Default)]
pub(crate) struct StoreStatsCounters {
    pub(crate) begun: AtomicU64,
    pub(crate) committed: AtomicU64,
    pub(crate) rolled_back: AtomicU64,
}

pub(crate) struct StoreInner {
    pub(crate) data: RwLock<im::HashMap<String, Value>>,
    pub(crate) locks: LockTable,
    pub(crate) config: LockConfig,
    pub(crate) stats: StoreStatsCounters,
    next_tx_id: AtomicU64,
}

/// In-memory key/value store with pessimistic row locks.
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Empty store. Fails if `config` does not pass [`LockConfig::validate`].
    pub fn new(config: LockConfig) -> std::result::Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::LockConfig)?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: LockConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(im::HashMap::new()),
                locks: LockTable::default(),
                config,
                stats: StoreStatsCounters::default(),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<StoreInner> {
        &self.inner
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Latest committed value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot().get(key).cloned()
    }

    /// Writes `key` outside any transaction, ignoring row locks.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let mut data = self
            .inner
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        data.insert(key.into(), value);
    }

    /// Point-in-time copy of all committed data.
    pub fn snapshot(&self) -> im::HashMap<String, Value> {
        self.inner
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the transaction currently holding the lock on `key`.
    pub fn lock_holder(&self, key: &str) -> Result<Option<u64>> {
        self.inner.locks.holder(key)
    }

    pub fn stats(&self) -> StoreStats {
        let stats = &self.inner.stats;
        StoreStats {
            begun: stats.begun.load(Ordering::SeqCst),
            committed: stats.committed.load(Ordering::SeqCst),
            rolled_back: stats.rolled_back.load(Ordering::SeqCst),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_config(LockConfig::default())
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    type Error = DbError;
    type Transaction = MemoryTx;

    async fn begin_transaction(&self, ctx: &Context) -> Result<MemoryTx> {
        if let Some(reason) = ctx.err() {
            return Err(DbError::Cancelled(reason));
        }

        let id = self.inner.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.inner.data.read()?.clone();
        self.inner.stats.begun.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, tx_id = id, "memory transaction begun");

        Ok(MemoryTx::new(id, Arc::clone(&self.inner), snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CancelReason;
    use serde_json::json;

    #[test]
    fn test_lock_config() {
        let config = LockConfig::default();
        assert_eq!(config.lock_wait_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
        assert!(config.lock_wait_timeout(Duration::ZERO).validate().is_err());
        assert!(MemoryStore::new(config).is_ok());
        assert!(matches!(
            MemoryStore::new(config.lock_wait_timeout(Duration::ZERO)).err(),
            Some(ConfigError::LockConfig(_))
        ));

        let parsed: LockConfig = serde_json::from_str(r#"{ "lock_wait_timeout_ms": 250 }"#).unwrap();
        assert_eq!(parsed.lock_wait_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_insert_and_get() {
        let store = MemoryStore::default();
        assert!(store.is_empty());

        store.insert("a", json!(1));
        assert_eq!(store.get("a"), Some(json!(1)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_begin_respects_cancellation() {
        let store = MemoryStore::default();
        let ctx = Context::background();
        ctx.cancel();

        let err = store.begin_transaction(&ctx).await.err();
        assert_eq!(err, Some(DbError::Cancelled(CancelReason::Cancelled)));
        assert_eq!(store.stats().begun, 0);
    }

    #[tokio::test]
    async fn test_begin_assigns_distinct_ids() {
        let store = MemoryStore::default();
        let ctx = Context::background();

        let first = store.begin_transaction(&ctx).await.unwrap();
        let second = store.begin_transaction(&ctx).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(store.stats().begun, 2);
    }
}
