// ============================================================================
// Datastore Collaborator Contract
// ============================================================================
//
// The executor never talks to a driver directly. It begins, commits and rolls
// back through these two traits, and hands the begun transaction to the unit
// of work only through the execution context.
//
// ============================================================================

use crate::context::Context;
use async_trait::async_trait;
use std::sync::Arc;

/// A store that can open transactions.
#[async_trait]
pub trait Datastore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Transaction: Transaction<Error = Self::Error>;

    /// Opens a transaction on a dedicated connection.
    ///
    /// Implementations must give up once `ctx` is cancelled.
    async fn begin_transaction(&self, ctx: &Context) -> Result<Self::Transaction, Self::Error>;
}

/// A live transaction bound to one connection.
#[async_trait]
pub trait Transaction: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn commit(&self) -> Result<(), Self::Error>;

    /// Discards the transaction.
    ///
    /// Must return `Ok(())` without side effects if the transaction was
    /// already committed or rolled back. Runs from a drop guard, possibly
    /// while a panic is unwinding, so it cannot block on I/O; drivers that
    /// need a round trip queue the rollback on their connection instead.
    fn rollback(&self) -> Result<(), Self::Error>;
}

#[async_trait]
impl<D> Datastore for Arc<D>
where
    D: Datastore + ?Sized,
{
    type Error = D::Error;
    type Transaction = D::Transaction;

    async fn begin_transaction(&self, ctx: &Context) -> Result<Self::Transaction, Self::Error> {
        (**self).begin_transaction(ctx).await
    }
}
