// ============================================================================
// Attempt State
// ============================================================================
//
// Lifecycle of one attempt inside an `execute` call:
//
//   Idle ──begin──> Began ──body──> BodyRunning ──commit──> Committed
//                                        │
//                                        └──────rollback──> RolledBack
//
// Committed and RolledBack are terminal for the attempt. A retryable
// RolledBack sends the call back to a fresh Idle attempt.
//
// ============================================================================

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// No transaction begun yet
    Idle,

    /// Transaction begun, body not yet invoked
    Began,

    /// Body is running against the transaction
    BodyRunning,

    /// Transaction committed
    Committed,

    /// Transaction rolled back (explicitly or by the safety net)
    RolledBack,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Committed | AttemptState::RolledBack)
    }

    /// Whether the rollback guard still has to discard the transaction.
    pub fn needs_rollback(&self) -> bool {
        matches!(self, AttemptState::Began | AttemptState::BodyRunning)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Idle => write!(f, "IDLE"),
            AttemptState::Began => write!(f, "BEGAN"),
            AttemptState::BodyRunning => write!(f, "BODY_RUNNING"),
            AttemptState::Committed => write!(f, "COMMITTED"),
            AttemptState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}
