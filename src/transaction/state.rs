// ============================================================================
// Transaction State Management
// ============================================================================
//
// Implements the State Pattern for transaction lifecycle management.
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// Optimistic concurrency:
// - Reads record the version of every key they observe (read set)
// - Writes are buffered as `Change`s (write set)
// - COMMIT validates the read set against the shared store
//
// ============================================================================

use super::Change;
use crate::core::{Result, TmError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state following the State Pattern
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can execute operations
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted/rolled back
    Aborted,
}

impl TransactionState {
    /// Check if transaction can execute operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if transaction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Bookkeeping for one in-memory transaction
///
/// # Thread Safety
/// Records live inside the manager's lock; a record is only touched by the
/// request that began it.
#[derive(Debug)]
pub struct TransactionRecord {
    /// Unique transaction identifier
    id: TransactionId,

    /// Current state (Active, Committed, Aborted)
    state: TransactionState,

    /// Version of every key observed by this transaction
    reads: HashMap<String, u64>,

    /// Writes buffered until commit
    changes: Vec<Change>,

    doomed: bool,

    note: Option<String>,

    user: Option<String>,

    /// Start time for diagnostics
    start_time: std::time::Instant,
}

impl TransactionRecord {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            reads: HashMap::new(),
            changes: Vec::new(),
            doomed: false,
            note: None,
            user: None,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn reads(&self) -> &HashMap<String, u64> {
        &self.reads
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn is_doomed(&self) -> bool {
        self.doomed
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Latest buffered write for `key`, if this transaction wrote it.
    ///
    /// `Some(None)` means the key was deleted inside the transaction.
    pub fn pending(&self, key: &str) -> Option<Option<&serde_json::Value>> {
        self.changes
            .iter()
            .rev()
            .find(|change| change.key() == key)
            .map(Change::value)
    }

    /// Remember the version observed for `key`; the first observation wins.
    pub fn record_read(&mut self, key: &str, version: u64) -> Result<()> {
        self.ensure_active("read")?;
        self.reads.entry(key.to_string()).or_insert(version);
        Ok(())
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active("record change")?;
        self.changes.push(change);
        Ok(())
    }

    pub fn doom(&mut self) -> Result<()> {
        self.ensure_active("doom")?;
        self.doomed = true;
        Ok(())
    }

    pub fn set_note(&mut self, text: &str) {
        self.note = Some(text.to_string());
    }

    pub fn set_user(&mut self, user: &str) {
        self.user = Some(user.to_string());
    }

    /// Mark transaction as committed
    ///
    /// # Errors
    /// Returns error if transaction is not active or has been doomed
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        if self.doomed {
            return Err(TmError::Doomed(self.id.to_string()));
        }

        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and discard changes
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active("rollback")?;
        self.changes.clear();
        self.reads.clear();
        self.state = TransactionState::Aborted;
        Ok(())
    }

    fn ensure_active(&self, op: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(TmError::Transaction(format!(
                "Cannot {}: transaction {} is already {}",
                op, self.id, self.state
            )));
        }
        Ok(())
    }
}
