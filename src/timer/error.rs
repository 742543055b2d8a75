use thiserror::Error;

/// Errors the scheduler reports synchronously to whoever asked for the
/// transition. Side-effect failures (audio, storage, wake lock) never show up
/// here; they are swallowed where they happen.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}
