pub mod error;

pub use error::{CancelReason, ConfigError, ContextError, TxError};
