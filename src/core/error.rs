use thiserror::Error;

/// Why a [`Context`](crate::context::Context) stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Failure to resolve the transaction handle carried by a context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("no transaction is attached to this context")]
    NoTransaction,

    #[error("transaction attached to this context is not a `{expected}` (found `{found}`)")]
    HandleTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("transaction attached to this context has already been finalized")]
    TransactionFinalized,
}

/// Configuration rejected when building an executor or a store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid retry policy: {0}")]
    RetryPolicy(String),

    #[error("invalid lock configuration: {0}")]
    LockConfig(String),
}

/// Error returned by [`TxExecutor::execute`](crate::executor::TxExecutor::execute).
///
/// `E` is the unit-of-work error type. Begin and commit failures of the
/// datastore are converted into it, so every variant carries an `E` as its
/// underlying cause.
#[derive(Error, Debug)]
pub enum TxError<E> {
    /// The datastore refused to start a transaction. Never retried.
    #[error(transparent)]
    Begin(E),

    /// The body failed with an error that is not a transient conflict.
    #[error(transparent)]
    Aborted(E),

    /// The body succeeded but the commit failed. Never retried.
    #[error(transparent)]
    Commit(E),

    #[error("transaction executor : conflict retry limit ({limit}) exceeded. Originally caused by : {source}")]
    RetryLimitExceeded {
        limit: u32,
        #[source]
        source: E,
    },

    #[error("transaction executor : retry #{attempt} (originally caused by: {cause}) cancelled by context: {reason}")]
    Cancelled {
        attempt: u32,
        cause: E,
        #[source]
        reason: CancelReason,
    },
}

impl<E> TxError<E> {
    /// The underlying datastore or body error.
    pub fn cause(&self) -> &E {
        match self {
            TxError::Begin(err) | TxError::Aborted(err) | TxError::Commit(err) => err,
            TxError::RetryLimitExceeded { source, .. } => source,
            TxError::Cancelled { cause, .. } => cause,
        }
    }

    pub fn into_cause(self) -> E {
        match self {
            TxError::Begin(err) | TxError::Aborted(err) | TxError::Commit(err) => err,
            TxError::RetryLimitExceeded { source, .. } => source,
            TxError::Cancelled { cause, .. } => cause,
        }
    }

    pub fn is_retry_limit_exceeded(&self) -> bool {
        matches!(self, TxError::RetryLimitExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TxError::Cancelled { .. })
    }
}
