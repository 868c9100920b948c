use super::error::{DbError, Result};
use super::lock::TxId;
use super::store::StoreInner;
use crate::context::Context;
use crate::datastore::Transaction;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Active,
    Committed,
    RolledBack,
}

struct TxState {
    status: TxStatus,
    /// Buffered writes; `None` deletes the key on commit.
    writes: HashMap<String, Option<Value>>,
    locks: Vec<String>,
}

/// A transaction on a [`MemoryStore`](super::MemoryStore).
///
/// Plain reads see the store as of `begin`, plus this transaction's own
/// writes. Writes and `get_for_update` take an exclusive row lock that is
/// held until commit or rollback.
pub struct MemoryTx {
    id: TxId,
    store: Arc<StoreInner>,
    snapshot: im::HashMap<String, Value>,
    state: Mutex<TxState>,
}

impl MemoryTx {
    pub(crate) fn new(id: TxId, store: Arc<StoreInner>, snapshot: im::HashMap<String, Value>) -> Self {
        Self {
            id,
            store,
            snapshot,
            state: Mutex::new(TxState {
                status: TxStatus::Active,
                writes: HashMap::new(),
                locks: Vec::new(),
            }),
        }
    }

    /// The transaction attached to `ctx` by the executor.
    pub fn from_context(ctx: &Context) -> Result<Arc<MemoryTx>> {
        Ok(ctx.handle_of::<MemoryTx>()?)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.status == TxStatus::Active)
            .unwrap_or(false)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.lock()?.status != TxStatus::Active {
            return Err(DbError::TransactionClosed(self.id));
        }
        Ok(())
    }

    /// Reads `key` from this transaction's view.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let state = self.state.lock()?;
        if state.status != TxStatus::Active {
            return Err(DbError::TransactionClosed(self.id));
        }
        match state.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.snapshot.get(key).cloned()),
        }
    }

    /// Locks `key`, then reads its latest committed value (or this
    /// transaction's pending write).
    pub async fn get_for_update(&self, ctx: &Context, key: &str) -> Result<Option<Value>> {
        self.lock(ctx, key).await?;

        if let Some(pending) = self.state.lock()?.writes.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.store.data.read()?.get(key).cloned())
    }

    pub async fn put(&self, ctx: &Context, key: &str, value: Value) -> Result<()> {
        self.lock(ctx, key).await?;
        self.write(key, Some(value))
    }

    pub async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        self.lock(ctx, key).await?;
        self.write(key, None)
    }

    /// Locks `key` without waiting; fails with [`DbError::LockNotAvailable`]
    /// if another transaction holds it.
    pub fn try_lock(&self, key: &str) -> Result<()> {
        self.ensure_active()?;
        let acquired = self.store.locks.try_acquire(self.id, key)?;
        self.track_lock(key, acquired)
    }

    async fn lock(&self, ctx: &Context, key: &str) -> Result<()> {
        self.ensure_active()?;
        let acquired = self
            .store
            .locks
            .acquire(ctx, self.id, key, self.store.config.lock_wait_timeout)
            .await?;
        self.track_lock(key, acquired)
    }

    fn track_lock(&self, key: &str, acquired: bool) -> Result<()> {
        if !acquired {
            return Ok(());
        }

        let mut state = self.state.lock()?;
        if state.status != TxStatus::Active {
            // Finalized while waiting for the lock.
            drop(state);
            self.store.locks.release_all(self.id, &[key.to_string()])?;
            return Err(DbError::TransactionClosed(self.id));
        }
        state.locks.push(key.to_string());
        Ok(())
    }

    fn write(&self, key: &str, value: Option<Value>) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.status != TxStatus::Active {
            return Err(DbError::TransactionClosed(self.id));
        }
        state.writes.insert(key.to_string(), value);
        Ok(())
    }

    fn finish(&self, state: &mut TxState, status: TxStatus) -> Result<()> {
        state.status = status;
        let locks = std::mem::take(&mut state.locks);
        self.store.locks.release_all(self.id, &locks)
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    type Error = DbError;

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.status != TxStatus::Active {
            return Err(DbError::TransactionClosed(self.id));
        }

        let written = state.writes.len();
        {
            // Nothing is taken from the transaction until the data lock is
            // held, so a failure here leaves it active and intact.
            let mut data = self.store.data.write()?;
            for (key, value) in state.writes.drain() {
                match value {
                    Some(value) => data.insert(key, value),
                    None => data.remove(&key),
                };
            }
        }

        // The writes are visible from here on; the commit has happened.
        if let Err(err) = self.finish(&mut state, TxStatus::Committed) {
            event!(Level::WARN, tx_id = self.id, error = %err, "releasing row locks after commit failed");
        }
        self.store.stats.committed.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, tx_id = self.id, written, "memory transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.status != TxStatus::Active {
            return Ok(());
        }

        state.writes.clear();
        self.finish(&mut state, TxStatus::RolledBack)?;
        self.store.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, tx_id = self.id, "memory transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Err(err) = self.rollback() {
            event!(Level::WARN, tx_id = self.id, error = %err, "memory transaction rollback on drop failed");
        }
    }
}
