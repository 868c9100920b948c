// ============================================================================
// txr Library
// ============================================================================

//! Run a unit of work inside a datastore transaction, retrying transient lock
//! conflicts, with the active transaction reachable from nested code through
//! an ambient [`Context`].
//!
//! ```
//! use std::time::Duration;
//! use serde_json::json;
//! use txr::{Context, RetryPolicy, StructuredConflictClassifier, TxExecutor};
//! use txr::memory::{DbError, MemoryStore, MemoryTx};
//!
//! async fn credit(ctx: &Context, account: &str, amount: i64) -> Result<(), DbError> {
//!     // Nested data access finds the transaction through the context.
//!     let tx = MemoryTx::from_context(ctx)?;
//!     let balance = tx.get_for_update(ctx, account).await?.and_then(|v| v.as_i64()).unwrap_or(0);
//!     tx.put(ctx, account, json!(balance + amount)).await
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::default();
//! let executor = TxExecutor::new(store.clone(), RetryPolicy::new(3, Duration::from_millis(5)))?
//!     .with_classifier(StructuredConflictClassifier);
//!
//! executor
//!     .execute(&Context::background(), |ctx| async move {
//!         credit(&ctx, "alice", 10).await?;
//!         credit(&ctx, "bob", -10).await
//!     })
//!     .await?;
//!
//! assert_eq!(store.get("alice"), Some(json!(10)));
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod core;
pub mod datastore;
pub mod executor;
pub mod memory;
pub mod retry;

// Re-export main types for convenience
pub use context::Context;
pub use crate::core::{CancelReason, ConfigError, ContextError, TxError};
pub use datastore::{Datastore, Transaction};
pub use executor::{AttemptState, TxExecutor};
pub use retry::{
    Backoff, ConflictClassifier, ExponentialBackoff, LinearBackoff, RetryPolicy, SqlState,
    SqlStateClassifier, StructuredConflictClassifier, TextualConflictClassifier,
    TransientConflict,
};
