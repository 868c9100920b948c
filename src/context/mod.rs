// ============================================================================
// Execution Context
// ============================================================================
//
// An immutable, cheaply cloneable context tree. Every node owns a cancellation
// token derived from its parent's, an optional deadline, and optionally a
// marker pointing at the transaction that is active for its subtree.
//
// Attaching a transaction never mutates a context: it produces a child node.
// The marker holds only a weak reference; the executor keeps the strong one
// for the lifetime of the attempt.
//
// ============================================================================

use crate::core::{CancelReason, ContextError};
use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Ambient, cancellable value threaded through a unit of work.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextNode>,
}

struct ContextNode {
    parent: Option<Context>,
    token: CancellationToken,
    deadline: Option<Instant>,
    tx: Option<TxMarker>,
}

struct TxMarker {
    handle: Weak<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Context {
    /// Root context. Only an explicit [`cancel`](Self::cancel) stops it.
    pub fn background() -> Self {
        Self {
            inner: Arc::new(ContextNode {
                parent: None,
                token: CancellationToken::new(),
                deadline: None,
                tx: None,
            }),
        }
    }

    fn derive(&self, deadline: Option<Instant>, tx: Option<TxMarker>) -> Self {
        Self {
            inner: Arc::new(ContextNode {
                parent: Some(self.clone()),
                token: self.inner.token.child_token(),
                deadline,
                tx,
            }),
        }
    }

    /// Derives a context that is cancelled together with `self`, and can be
    /// cancelled on its own without affecting `self`.
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline, None)
    }

    /// Derives a context that expires at `deadline`, or earlier if an
    /// ancestor's deadline comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(inherited) if inherited <= deadline => inherited,
            _ => deadline,
        };
        self.derive(Some(deadline), None)
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Reason this context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<CancelReason> {
        if self.inner.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Completes once the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> CancelReason {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.inner.token.cancelled() => CancelReason::Cancelled,
                    _ = sleep_until(deadline) => CancelReason::DeadlineExceeded,
                }
            }
            None => {
                self.inner.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }

    /// Returns a child context carrying `handle` as the active transaction.
    ///
    /// The child keeps a weak reference only; once every strong reference
    /// held by the transaction owner is dropped, [`handle_of`](Self::handle_of)
    /// reports [`ContextError::TransactionFinalized`].
    pub fn attach<H>(&self, handle: &Arc<H>) -> Self
    where
        H: Send + Sync + 'static,
    {
        let erased: Arc<dyn Any + Send + Sync> = handle.clone();
        let marker = TxMarker {
            handle: Arc::downgrade(&erased),
            type_name: type_name::<H>(),
        };
        self.derive(self.inner.deadline, Some(marker))
    }

    /// `true` if this context or any of its ancestors carries a transaction.
    pub fn is_active(&self) -> bool {
        self.marker().is_some()
    }

    /// Resolves the transaction handle carried by the context chain.
    ///
    /// The returned `Arc` is for use within the body that received this
    /// context and must not escape it. A kept clone outlives the attempt:
    /// the transaction behind it is already finalized, and while the clone
    /// lives this lookup keeps succeeding instead of reporting
    /// [`ContextError::TransactionFinalized`]. Resolve the handle from the
    /// context at each use rather than storing it.
    pub fn handle_of<H>(&self) -> Result<Arc<H>, ContextError>
    where
        H: Send + Sync + 'static,
    {
        let marker = self.marker().ok_or(ContextError::NoTransaction)?;
        let handle = marker
            .handle
            .upgrade()
            .ok_or(ContextError::TransactionFinalized)?;
        handle
            .downcast::<H>()
            .map_err(|_| ContextError::HandleTypeMismatch {
                expected: type_name::<H>(),
                found: marker.type_name,
            })
    }

    fn marker(&self) -> Option<&TxMarker> {
        let mut node = Some(self);
        while let Some(ctx) = node {
            if let Some(marker) = &ctx.inner.tx {
                return Some(marker);
            }
            node = ctx.inner.parent.as_ref();
        }
        None
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .field("transaction", &self.marker().map(|m| m.type_name))
            .finish()
    }
}
