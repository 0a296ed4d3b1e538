use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Write-write conflict detected: {0}")]
    Conflict(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Transaction {0} is doomed")]
    Doomed(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("No transaction is active for this request")]
    NoTransaction,

    #[error("Request body error: {0}")]
    Body(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl TmError {
    /// Conflicts and explicitly transient failures may succeed when the
    /// whole request is replayed against a fresh transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, TmError::Conflict(_) | TmError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, TmError>;

impl<T> From<std::sync::PoisonError<T>> for TmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
