pub mod backoff;
pub mod classifier;
pub mod policy;

pub use backoff::{Backoff, ExponentialBackoff, LinearBackoff};
pub use classifier::{
    ConflictClassifier, SqlState, SqlStateClassifier, StructuredConflictClassifier,
    TextualConflictClassifier, TransientConflict,
};
pub use policy::RetryPolicy;
