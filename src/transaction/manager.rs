// ============================================================================
// In-Memory Transaction Manager
// ============================================================================

use super::{
    Change, Transaction, TransactionId, TransactionManager, TransactionRecord, TransactionState,
    is_transient_error,
};
use crate::core::{Result, TmError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Committed value of one key. Deletes keep a tombstone so the version
/// keeps increasing.
#[derive(Debug, Clone)]
struct Versioned {
    value: Option<Value>,
    version: u64,
}

#[derive(Default)]
struct Shared {
    data: RwLock<HashMap<String, Versioned>>,

    // Stores full transaction state for every active transaction.
    transactions: RwLock<HashMap<TransactionId, TransactionRecord>>,

    // Transactions flagged by `mark_conflict`; they fail at commit.
    conflicted_ids: RwLock<HashSet<u64>>,

    commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
}

/// Shared key/value resource with optimistic concurrency control.
///
/// Cloning is cheap; every clone talks to the same store. Lock order is
/// always `data` before `transactions`.
#[derive(Clone, Default)]
pub struct MemoryTransactionManager {
    shared: Arc<Shared>,
}

/// Point-in-time view of an active transaction
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub state: TransactionState,
    pub change_count: usize,
    pub doomed: bool,
    pub note: Option<String>,
    pub user: Option<String>,
    pub duration: std::time::Duration,
}

/// Lifetime counters of a [`MemoryTransactionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub active: usize,
    pub commits: u64,
    pub aborts: u64,
    pub conflicts: u64,
}

impl MemoryTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `key` inside a transaction, recording the observed version.
    pub async fn get(&self, txn_id: TransactionId, key: &str) -> Result<Option<Value>> {
        {
            let transactions = self.shared.transactions.read().await;
            let record = transactions
                .get(&txn_id)
                .ok_or_else(|| not_found(txn_id))?;
            if let Some(pending) = record.pending(key) {
                return Ok(pending.cloned());
            }
        }

        let (value, version) = {
            let data = self.shared.data.read().await;
            match data.get(key) {
                Some(entry) => (entry.value.clone(), entry.version),
                None => (None, 0),
            }
        };

        let mut transactions = self.shared.transactions.write().await;
        let record = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| not_found(txn_id))?;
        record.record_read(key, version)?;
        Ok(value)
    }

    /// Buffer a write; it becomes visible to others only on commit.
    pub async fn put(&self, txn_id: TransactionId, key: &str, value: Value) -> Result<()> {
        self.record_change(
            txn_id,
            Change::Put {
                key: key.to_string(),
                value,
            },
        )
        .await
    }

    pub async fn delete(&self, txn_id: TransactionId, key: &str) -> Result<()> {
        self.record_change(
            txn_id,
            Change::Delete {
                key: key.to_string(),
            },
        )
        .await
    }

    /// Latest committed value, outside of any transaction.
    pub async fn read_committed(&self, key: &str) -> Option<Value> {
        let data = self.shared.data.read().await;
        data.get(key).and_then(|entry| entry.value.clone())
    }

    /// Force the next commit of `txn_id` to fail with a conflict.
    pub async fn mark_conflict(&self, txn_id: TransactionId) {
        let mut conflicts = self.shared.conflicted_ids.write().await;
        conflicts.insert(txn_id.0);
    }

    pub async fn is_conflicted(&self, txn_id: TransactionId) -> bool {
        let conflicts = self.shared.conflicted_ids.read().await;
        conflicts.contains(&txn_id.0)
    }

    pub async fn transaction_info(&self, txn_id: TransactionId) -> Option<TransactionInfo> {
        let transactions = self.shared.transactions.read().await;
        transactions.get(&txn_id).map(|txn| TransactionInfo {
            id: txn.id(),
            state: txn.state(),
            change_count: txn.change_count(),
            doomed: txn.is_doomed(),
            note: txn.note().map(str::to_string),
            user: txn.user().map(str::to_string),
            duration: txn.duration(),
        })
    }

    pub async fn stats(&self) -> MemoryStats {
        let active = self.shared.transactions.read().await.len();
        MemoryStats {
            active,
            commits: self.shared.commits.load(Ordering::SeqCst),
            aborts: self.shared.aborts.load(Ordering::SeqCst),
            conflicts: self.shared.conflicts.load(Ordering::SeqCst),
        }
    }

    async fn record_change(&self, txn_id: TransactionId, change: Change) -> Result<()> {
        let mut transactions = self.shared.transactions.write().await;
        let record = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| not_found(txn_id))?;
        record.record_change(change)
    }

    async fn update_record<F>(&self, txn_id: TransactionId, f: F) -> Result<()>
    where
        F: FnOnce(&mut TransactionRecord) -> Result<()> + Send,
    {
        let mut transactions = self.shared.transactions.write().await;
        let record = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| not_found(txn_id))?;
        f(record)
    }

    async fn commit(&self, txn_id: TransactionId) -> Result<()> {
        let mut data = self.shared.data.write().await;
        let mut transactions = self.shared.transactions.write().await;
        let record = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| not_found(txn_id))?;

        if let Some(reason) = self.find_conflict(&data, record).await {
            record.rollback()?;
            transactions.remove(&txn_id);
            self.shared.conflicted_ids.write().await.remove(&txn_id.0);
            self.shared.conflicts.fetch_add(1, Ordering::SeqCst);
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
            return Err(TmError::Conflict(reason));
        }

        record.commit()?;
        for change in record.changes() {
            let version = data.get(change.key()).map(|e| e.version).unwrap_or(0) + 1;
            data.insert(
                change.key().to_string(),
                Versioned {
                    value: change.value().cloned(),
                    version,
                },
            );
        }
        transactions.remove(&txn_id);
        self.shared.commits.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn find_conflict(
        &self,
        data: &HashMap<String, Versioned>,
        record: &TransactionRecord,
    ) -> Option<String> {
        if self.is_conflicted(record.id()).await {
            return Some(format!("{} was marked conflicted", record.id()));
        }

        record.reads().iter().find_map(|(key, seen)| {
            let current = data.get(key).map(|e| e.version).unwrap_or(0);
            (current != *seen).then(|| {
                format!(
                    "key '{}' changed under {} (read version {}, now {})",
                    key,
                    record.id(),
                    seen,
                    current
                )
            })
        })
    }

    /// Aborting a finished or unknown transaction is a no-op.
    async fn rollback(&self, txn_id: TransactionId) -> Result<()> {
        let mut transactions = self.shared.transactions.write().await;

        if let Some(record) = transactions.get_mut(&txn_id) {
            record.rollback()?;
            transactions.remove(&txn_id);
            self.shared.conflicted_ids.write().await.remove(&txn_id.0);
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for MemoryTransactionManager {
    async fn begin(&self) -> Result<Arc<dyn Transaction>> {
        let id = TransactionId::new();
        let mut transactions = self.shared.transactions.write().await;
        transactions.insert(id, TransactionRecord::new(id));

        Ok(Arc::new(MemoryTransaction {
            id,
            manager: self.clone(),
        }))
    }

    fn is_retryable(&self, err: &(dyn StdError + 'static)) -> bool {
        is_transient_error(err)
    }
}

/// Handle to one transaction of a [`MemoryTransactionManager`]
pub struct MemoryTransaction {
    id: TransactionId,
    manager: MemoryTransactionManager,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    async fn commit(&self) -> Result<()> {
        self.manager.commit(self.id).await
    }

    async fn abort(&self) -> Result<()> {
        self.manager.rollback(self.id).await
    }

    async fn doom(&self) -> Result<()> {
        self.manager.update_record(self.id, |record| record.doom()).await
    }

    async fn is_doomed(&self) -> bool {
        let transactions = self.manager.shared.transactions.read().await;
        transactions
            .get(&self.id)
            .map(TransactionRecord::is_doomed)
            .unwrap_or(false)
    }

    async fn note(&self, text: &str) -> Result<()> {
        self.manager
            .update_record(self.id, |record| {
                record.set_note(text);
                Ok(())
            })
            .await
    }

    async fn set_user(&self, user: &str) -> Result<()> {
        self.manager
            .update_record(self.id, |record| {
                record.set_user(user);
                Ok(())
            })
            .await
    }
}

fn not_found(txn_id: TransactionId) -> TmError {
    TmError::Transaction(format!("Transaction {} not found", txn_id))
}
