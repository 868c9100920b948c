use super::state::AttemptState;
use crate::datastore::Transaction;
use std::sync::Arc;
use tracing::{Level, event};

/// Owns the strong reference to an attempt's transaction and rolls it back
/// when dropped.
///
/// The rollback is issued on every exit path, including a panic unwinding
/// out of the body and the `execute` future being dropped mid-attempt. After
/// a commit it is a no-op by the [`Transaction::rollback`] contract.
///
/// The guard also records the states the attempt went through, starting at
/// `Idle` before the transaction was begun.
pub(crate) struct RollbackGuard<H: Transaction> {
    tx: Arc<H>,
    path: Vec<AttemptState>,
    finalized: bool,
}

impl<H: Transaction> RollbackGuard<H> {
    pub(crate) fn new(tx: H) -> Self {
        Self {
            tx: Arc::new(tx),
            path: vec![AttemptState::Idle, AttemptState::Began],
            finalized: false,
        }
    }

    pub(crate) fn handle(&self) -> &Arc<H> {
        &self.tx
    }

    pub(crate) fn state(&self) -> AttemptState {
        self.path.last().copied().unwrap_or(AttemptState::Idle)
    }

    /// States visited so far, oldest first.
    pub(crate) fn path(&self) -> &[AttemptState] {
        &self.path
    }

    pub(crate) fn transition(&mut self, state: AttemptState) {
        if self.state() != state {
            self.path.push(state);
        }
    }

    /// Issues the safety-net rollback once. A failed rollback is logged and
    /// leaves the state where it was.
    pub(crate) fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let unwinding = std::thread::panicking();
        match self.tx.rollback() {
            Ok(()) => {
                if self.state().needs_rollback() {
                    self.transition(AttemptState::RolledBack);
                    event!(Level::DEBUG, state = %self.state(), unwinding, "transaction rolled back");
                }
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    state = %self.state(),
                    unwinding,
                    error = %err,
                    "transaction rollback failed"
                );
            }
        }
    }
}

impl<H: Transaction> Drop for RollbackGuard<H> {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("connection reset")]
    struct ResetError;

    #[derive(Default)]
    struct CountingTx {
        rollbacks: AtomicUsize,
        fail_rollback: bool,
        committed: AtomicBool,
    }

    #[async_trait]
    impl Transaction for CountingTx {
        type Error = ResetError;

        async fn commit(&self) -> Result<(), ResetError> {
            self.committed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(&self) -> Result<(), ResetError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.fail_rollback {
                return Err(ResetError);
            }
            Ok(())
        }
    }

    #[test]
    fn test_failed_body_path() {
        let mut guard = RollbackGuard::new(CountingTx::default());
        guard.transition(AttemptState::BodyRunning);
        guard.finalize();

        assert_eq!(
            guard.path(),
            &[
                AttemptState::Idle,
                AttemptState::Began,
                AttemptState::BodyRunning,
                AttemptState::RolledBack,
            ]
        );
        assert!(guard.state().is_terminal());

        let tx = Arc::clone(guard.handle());
        drop(guard);
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_committed_path_stays_committed() {
        let mut guard = RollbackGuard::new(CountingTx::default());
        guard.transition(AttemptState::BodyRunning);
        guard.handle().commit().await.unwrap();
        guard.transition(AttemptState::Committed);
        guard.finalize();

        assert_eq!(
            guard.path(),
            &[
                AttemptState::Idle,
                AttemptState::Began,
                AttemptState::BodyRunning,
                AttemptState::Committed,
            ]
        );
        // The inert rollback after commit still ran once.
        assert_eq!(guard.handle().rollbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_rollback_keeps_state() {
        let mut guard = RollbackGuard::new(CountingTx {
            fail_rollback: true,
            ..Default::default()
        });
        guard.transition(AttemptState::BodyRunning);
        guard.finalize();

        assert_eq!(guard.state(), AttemptState::BodyRunning);
        assert!(!guard.state().is_terminal());
    }

    #[test]
    fn test_drop_rolls_back() {
        let guard = RollbackGuard::new(CountingTx::default());
        let tx = Arc::clone(guard.handle());
        drop(guard);

        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
    }
}
