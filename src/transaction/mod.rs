// ============================================================================
// Transaction Handle
// ============================================================================
//
// The contract the attempt loop drives: a manager that begins transactions
// and classifies conflicts, and the per-attempt transaction it hands out.
//
// `MemoryTransactionManager` is the bundled backend: a shared key/value
// resource with optimistic concurrency (read-set validation at commit).
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::{MemoryStats, MemoryTransaction, MemoryTransactionManager, TransactionInfo};
pub use state::{TransactionId, TransactionRecord, TransactionState};

use crate::core::Result;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;

/// Source of transactions for one transactional resource.
#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// Begin a fresh transaction. Called once per attempt.
    async fn begin(&self) -> Result<Arc<dyn Transaction>>;

    /// Whether `err` was caused by a resolvable conflict, so that replaying
    /// the whole request against a new transaction may succeed.
    ///
    /// Called before the failed transaction is aborted.
    fn is_retryable(&self, err: &(dyn StdError + 'static)) -> bool;
}

/// One transaction begun by a [`TransactionManager`].
///
/// Every transaction handed to the attempt loop ends in exactly one of
/// `commit` or `abort`.
#[async_trait]
pub trait Transaction: Send + Sync + 'static {
    fn id(&self) -> TransactionId;

    async fn commit(&self) -> Result<()>;

    async fn abort(&self) -> Result<()>;

    /// Mark the transaction for mandatory rollback.
    async fn doom(&self) -> Result<()>;

    async fn is_doomed(&self) -> bool;

    /// Attach a free-text description (typically the request path).
    async fn note(&self, text: &str) -> Result<()>;

    /// Record the identity of the caller on whose behalf the work runs.
    async fn set_user(&self, user: &str) -> Result<()>;
}

/// Walks an error and its `source()` chain looking for a transient
/// [`crate::core::TmError`].
pub fn is_transient_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(tm) = err.downcast_ref::<crate::core::TmError>() {
            if tm.is_transient() {
                return true;
            }
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TmError;
    use std::fmt;

    #[derive(Debug)]
    struct Wrapped(TmError);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "handler failed")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_transient_found_through_source_chain() {
        let err = Wrapped(TmError::Conflict("k".into()));
        assert!(is_transient_error(&err));

        let err = Wrapped(TmError::Doomed("txn_1".into()));
        assert!(!is_transient_error(&err));
    }

    #[test]
    fn test_foreign_errors_are_not_transient() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!is_transient_error(&err));
    }
}
