use crate::core::{CancelReason, ContextError};
use crate::retry::{SqlState, TransientConflict};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("deadlock detected while waiting for lock on '{0}'")]
    Deadlock(String),

    #[error("lock wait timeout exceeded on '{0}'; try restarting transaction")]
    LockWaitTimeout(String),

    #[error("could not obtain lock on row '{0}'")]
    LockNotAvailable(String),

    #[error("Transaction {0} is already finalized")]
    TransactionClosed(u64),

    #[error("Operation cancelled: {0}")]
    Cancelled(CancelReason),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl TransientConflict for DbError {
    fn is_transient_conflict(&self) -> bool {
        matches!(
            self,
            DbError::Deadlock(_) | DbError::LockWaitTimeout(_) | DbError::LockNotAvailable(_)
        )
    }
}

impl SqlState for DbError {
    fn sql_state(&self) -> Option<&str> {
        match self {
            DbError::Deadlock(_) => Some("40P01"),
            DbError::LockWaitTimeout(_) | DbError::LockNotAvailable(_) => Some("55P03"),
            DbError::ConstraintViolation(_) => Some("23000"),
            DbError::Cancelled(_) => Some("57014"),
            _ => None,
        }
    }
}
