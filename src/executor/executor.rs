use super::guard::RollbackGuard;
use super::state::AttemptState;
use crate::context::Context;
use crate::core::{ConfigError, TxError};
use crate::datastore::{Datastore, Transaction};
use crate::retry::{Backoff, ConflictClassifier, LinearBackoff, RetryPolicy, TextualConflictClassifier};
use std::fmt;
use std::future::Future;
use tokio::time::sleep;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Outcome of a single failed attempt, tagged by the stage that failed.
enum AttemptError<E> {
    Begin(E),
    Body(E),
    Commit(E),
}

/// Runs units of work inside datastore transactions, retrying transient
/// lock conflicts.
///
/// The active transaction reaches nested code through the [`Context`] passed
/// to the body; see [`Context::handle_of`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use txr::{Context, RetryPolicy, TxExecutor};
/// use txr::memory::{DbError, LockConfig, MemoryStore, MemoryTx};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new(LockConfig::default())?;
/// let executor = TxExecutor::new(store.clone(), RetryPolicy::new(2, Duration::from_millis(10)))?;
///
/// executor
///     .execute(&Context::background(), |ctx| async move {
///         let tx = MemoryTx::from_context(&ctx)?;
///         tx.put(&ctx, "greeting", "hello".into()).await?;
///         Ok::<_, DbError>(())
///     })
///     .await?;
///
/// assert_eq!(store.get("greeting"), Some("hello".into()));
/// # Ok(())
/// # }
/// ```
pub struct TxExecutor<D, C = TextualConflictClassifier, B = LinearBackoff> {
    datastore: D,
    classifier: C,
    backoff: B,
    max_retries: u32,
}

impl<D: Datastore> TxExecutor<D> {
    /// Executor with the textual conflict classifier and the policy's linear
    /// backoff.
    ///
    /// Fails if `policy` does not pass [`RetryPolicy::validate`].
    pub fn new(datastore: D, policy: RetryPolicy) -> Result<Self, ConfigError> {
        policy.validate().map_err(ConfigError::RetryPolicy)?;

        Ok(Self {
            datastore,
            classifier: TextualConflictClassifier::default(),
            backoff: policy.backoff(),
            max_retries: policy.max_retries,
        })
    }
}

impl<D, C, B> TxExecutor<D, C, B> {
    /// Replaces the conflict classifier.
    pub fn with_classifier<C2>(self, classifier: C2) -> TxExecutor<D, C2, B> {
        TxExecutor {
            datastore: self.datastore,
            classifier,
            backoff: self.backoff,
            max_retries: self.max_retries,
        }
    }

    /// Replaces the backoff policy. The retry limit is unchanged.
    pub fn with_backoff<B2: Backoff>(self, backoff: B2) -> TxExecutor<D, C, B2> {
        TxExecutor {
            datastore: self.datastore,
            classifier: self.classifier,
            backoff,
            max_retries: self.max_retries,
        }
    }

    pub fn datastore(&self) -> &D {
        &self.datastore
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl<D, C, B> TxExecutor<D, C, B>
where
    D: Datastore,
    B: Backoff,
{
    /// Runs `body` inside a transaction and commits it.
    ///
    /// `body` receives a child of `ctx` carrying the transaction, and may be
    /// invoked again with a fresh transaction whenever it fails with an error
    /// the classifier deems a transient conflict.
    ///
    /// # Panics
    ///
    /// Panics if `ctx` already belongs to a transaction: nested transactions
    /// are not allowed. A panic raised by `body` propagates unchanged after
    /// the transaction is rolled back.
    pub async fn execute<T, E, F, Fut>(&self, ctx: &Context, body: F) -> Result<T, TxError<E>>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<D::Error> + fmt::Display,
        C: ConflictClassifier<E>,
    {
        self.process(true, ctx, body).await
    }

    // TODO: expose a read-only entry point (skipping commit) once callers
    // need one; `writable` is always true until then.
    async fn process<T, E, F, Fut>(
        &self,
        writable: bool,
        ctx: &Context,
        body: F,
    ) -> Result<T, TxError<E>>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<D::Error> + fmt::Display,
        C: ConflictClassifier<E>,
    {
        if ctx.is_active() {
            panic!("transaction executor : nested transactions are not allowed");
        }

        let span = info_span!(
            "txr.execute",
            call_id = %Uuid::new_v4(),
            writable,
            max_retries = self.max_retries
        );
        self.run(writable, ctx, body).instrument(span).await
    }

    async fn run<T, E, F, Fut>(&self, writable: bool, ctx: &Context, mut body: F) -> Result<T, TxError<E>>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<D::Error> + fmt::Display,
        C: ConflictClassifier<E>,
    {
        let mut retries: u32 = 0;

        loop {
            let err = match self.attempt(writable, ctx, &mut body).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Begin(err)) => {
                    event!(Level::ERROR, error = %err, "transaction begin failed");
                    return Err(TxError::Begin(err));
                }
                Err(AttemptError::Commit(err)) => {
                    event!(Level::ERROR, error = %err, "transaction commit failed");
                    return Err(TxError::Commit(err));
                }
                Err(AttemptError::Body(err)) => err,
            };

            if !self.classifier.is_retryable(&err) {
                return Err(TxError::Aborted(err));
            }

            if retries >= self.max_retries {
                event!(Level::ERROR, retries, error = %err, "transaction conflict retry limit exceeded");
                return Err(TxError::RetryLimitExceeded {
                    limit: self.max_retries,
                    source: err,
                });
            }

            retries += 1;
            let backoff = self.backoff.interval(retries);
            event!(
                Level::WARN,
                attempt = retries,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "transaction conflict, retrying"
            );

            let cancelled = tokio::select! {
                biased;
                reason = ctx.cancelled() => Some(reason),
                _ = sleep(backoff) => None,
            };

            if let Some(reason) = cancelled {
                event!(Level::ERROR, attempt = retries, reason = %reason, "transaction retry cancelled");
                return Err(TxError::Cancelled {
                    attempt: retries,
                    cause: err,
                    reason,
                });
            }
        }
    }

    async fn attempt<T, E, F, Fut>(
        &self,
        writable: bool,
        ctx: &Context,
        body: &mut F,
    ) -> Result<T, AttemptError<E>>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<D::Error>,
    {
        let tx = self
            .datastore
            .begin_transaction(ctx)
            .await
            .map_err(|err| AttemptError::Begin(E::from(err)))?;

        // Dropping the guard rolls back, whichever way this scope is left.
        let mut guard = RollbackGuard::new(tx);
        let tx_ctx = ctx.attach(guard.handle());

        guard.transition(AttemptState::BodyRunning);
        let outcome = match body(tx_ctx).await {
            Ok(value) if writable => {
                let committed = guard.handle().commit().await;
                match committed {
                    Ok(()) => {
                        guard.transition(AttemptState::Committed);
                        Ok(value)
                    }
                    Err(err) => Err(AttemptError::Commit(E::from(err))),
                }
            }
            Ok(value) => Ok(value),
            Err(err) => Err(AttemptError::Body(err)),
        };

        guard.finalize();
        event!(
            Level::DEBUG,
            state = %guard.state(),
            path = ?guard.path(),
            "transaction attempt finished"
        );
        outcome
    }
}
