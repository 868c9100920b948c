// ============================================================================
// Row Lock Table
// ============================================================================
//
// Exclusive per-key locks held until the owning transaction finalizes.
//
// A transaction that finds a key held by another one records a waits-for
// edge and sleeps until some lock is released, its lock wait timeout
// expires, or its context is cancelled. Before sleeping it walks the
// waits-for chain starting at the holder; reaching itself means the wait
// would never end, and the requester is chosen as the deadlock victim.
//
// ============================================================================

use super::error::{DbError, Result};
use crate::context::Context;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

pub(crate) type TxId = u64;

#[derive(Default)]
struct LockState {
    holders: HashMap<String, TxId>,
    waits_for: HashMap<TxId, TxId>,
}

impl LockState {
    /// Would `waiter` waiting on `holder` close a cycle?
    fn closes_cycle(&self, waiter: TxId, holder: TxId) -> bool {
        let mut current = holder;
        for _ in 0..=self.waits_for.len() {
            if current == waiter {
                return true;
            }
            match self.waits_for.get(&current) {
                Some(next) => current = *next,
                None => return false,
            }
        }
        false
    }
}

/// A waits-for edge owned by a pending `acquire`.
struct WaitEdge<'a> {
    table: &'a LockTable,
    tx: TxId,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        self.table
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waits_for
            .remove(&self.tx);
    }
}

#[derive(Default)]
pub(crate) struct LockTable {
    state: Mutex<LockState>,
    released: Notify,
}

impl LockTable {
    /// Blocks until `tx` holds `key`.
    ///
    /// Returns `true` when the lock was newly taken, `false` when `tx`
    /// already held it.
    pub(crate) async fn acquire(
        &self,
        ctx: &Context,
        tx: TxId,
        key: &str,
        wait_timeout: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + wait_timeout;

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register interest before inspecting the table so a release in
            // between is not missed.
            released.as_mut().enable();

            {
                let mut state = self.state.lock()?;
                match state.holders.get(key).copied() {
                    None => {
                        state.holders.insert(key.to_string(), tx);
                        state.waits_for.remove(&tx);
                        return Ok(true);
                    }
                    Some(holder) if holder == tx => return Ok(false),
                    Some(holder) => {
                        if state.closes_cycle(tx, holder) {
                            state.waits_for.remove(&tx);
                            return Err(DbError::Deadlock(key.to_string()));
                        }
                        state.waits_for.insert(tx, holder);
                    }
                }
            }

            // Clears the edge however the wait ends, including this future
            // being dropped.
            let _edge = WaitEdge { table: self, tx };

            let failure = tokio::select! {
                biased;
                reason = ctx.cancelled() => Some(DbError::Cancelled(reason)),
                _ = sleep_until(deadline) => Some(DbError::LockWaitTimeout(key.to_string())),
                _ = &mut released => None,
            };

            if let Some(err) = failure {
                return Err(err);
            }
        }
    }

    /// Takes `key` for `tx` without waiting.
    pub(crate) fn try_acquire(&self, tx: TxId, key: &str) -> Result<bool> {
        let mut state = self.state.lock()?;
        match state.holders.get(key).copied() {
            None => {
                state.holders.insert(key.to_string(), tx);
                Ok(true)
            }
            Some(holder) if holder == tx => Ok(false),
            Some(_) => Err(DbError::LockNotAvailable(key.to_string())),
        }
    }

    /// Releases the given keys held by `tx` and wakes every waiter.
    pub(crate) fn release_all(&self, tx: TxId, keys: &[String]) -> Result<()> {
        {
            let mut state = self.state.lock()?;
            for key in keys {
                if state.holders.get(key) == Some(&tx) {
                    state.holders.remove(key);
                }
            }
            state.waits_for.remove(&tx);
        }
        self.released.notify_waiters();
        Ok(())
    }

    pub(crate) fn holder(&self, key: &str) -> Result<Option<TxId>> {
        Ok(self.state.lock()?.holders.get(key).copied())
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _state = self.state.lock().unwrap();
            panic!("poison the lock table");
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_is_reentrant() {
        let table = LockTable::default();
        let ctx = Context::background();

        assert!(table.acquire(&ctx, 1, "a", Duration::from_secs(1)).await.unwrap());
        assert!(!table.acquire(&ctx, 1, "a", Duration::from_secs(1)).await.unwrap());
        assert_eq!(table.holder("a").unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let table = LockTable::default();
        let ctx = Context::background();
        table.try_acquire(1, "a").unwrap();

        let err = table
            .acquire(&ctx, 2, "a", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, DbError::LockWaitTimeout("a".into()));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let table = Arc::new(LockTable::default());
        table.try_acquire(1, "a").unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .acquire(&Context::background(), 2, "a", Duration::from_secs(5))
                    .await
            })
        };

        tokio::task::yield_now().await;
        table.release_all(1, &["a".to_string()]).unwrap();

        assert!(waiter.await.unwrap().unwrap());
        assert_eq!(table.holder("a").unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_cycle_is_reported_as_deadlock() {
        let table = Arc::new(LockTable::default());
        table.try_acquire(1, "a").unwrap();
        table.try_acquire(2, "b").unwrap();

        let first = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .acquire(&Context::background(), 1, "b", Duration::from_secs(5))
                    .await
            })
        };

        // Wait until tx 1 is registered as waiting on tx 2.
        while table.state.lock().unwrap().waits_for.get(&1) != Some(&2) {
            tokio::task::yield_now().await;
        }

        let err = table
            .acquire(&Context::background(), 2, "a", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, DbError::Deadlock("a".into()));

        table.release_all(2, &["b".to_string()]).unwrap();
        assert!(first.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let table = LockTable::default();
        table.try_acquire(1, "a").unwrap();
        let ctx = Context::background();
        ctx.cancel();

        let err = table
            .acquire(&ctx, 2, "a", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled(_)));
    }

    #[test]
    fn test_try_acquire_conflict() {
        let table = LockTable::default();
        table.try_acquire(1, "a").unwrap();
        assert_eq!(
            table.try_acquire(2, "a").unwrap_err(),
            DbError::LockNotAvailable("a".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_leaves_no_edge() {
        let table = LockTable::default();
        let ctx = Context::background();
        table.try_acquire(1, "a").unwrap();
        table.try_acquire(2, "b").unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            table.acquire(&ctx, 2, "a", Duration::from_secs(5)),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!table.state.lock().unwrap().waits_for.contains_key(&2));

        // tx 2 waits on nothing, so tx 1 waiting on it is no cycle.
        let err = table
            .acquire(&ctx, 1, "b", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, DbError::LockWaitTimeout("b".into()));
    }
}
