// ============================================================================
// Transaction Executor
// ============================================================================
//
// begin -> body(ctx + tx) -> commit, with a rollback guard covering every
// exit path and a cancellable backoff between conflict retries.
//
// ============================================================================

pub mod executor;
mod guard;
pub mod state;

pub use executor::TxExecutor;
pub use state::AttemptState;
