// ============================================================================
// In-Memory Reference Datastore
// ============================================================================
//
// A small key/value store implementing the datastore contract with
// pessimistic row locks, lock wait timeouts and deadlock detection. Its lock
// failures are the transient conflicts the executor retries, which makes it
// the store of choice for exercising retry behaviour in tests.
//
// Committed data is an `im::HashMap`, so taking a transaction snapshot at
// begin is a constant-time clone.
//
// ============================================================================

pub mod error;
mod lock;
pub mod store;
pub mod transaction;

pub use error::{DbError, Result};
pub use store::{LockConfig, MemoryStore, StoreStats};
pub use transaction::MemoryTx;
