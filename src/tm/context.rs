//! Per-attempt request context.
//!
//! Every attempt's request carries a fresh [`TmContext`] in its extensions.
//! Downstream handlers reach the transaction through it instead of any
//! ambient lookup.

use crate::core::{Result, TmError};
use crate::transaction::{Transaction, TransactionManager};
use http::Extensions;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Identity of the caller, inserted into request extensions by an upstream
/// authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        UserId(value.to_string())
    }
}

/// Marker inserted by an outer component that already manages the
/// transaction for this request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalTransaction;

type PropertyMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

struct ContextInner {
    manager: Arc<dyn TransactionManager>,
    transaction: Arc<dyn Transaction>,
    attempt: usize,
    max_attempts: usize,
    active: AtomicBool,
    properties: Mutex<PropertyMap>,
}

/// Transaction state visible to the handler during one attempt.
#[derive(Clone)]
pub struct TmContext {
    inner: Arc<ContextInner>,
}

impl TmContext {
    pub(crate) fn new(
        manager: Arc<dyn TransactionManager>,
        transaction: Arc<dyn Transaction>,
        attempt: usize,
        max_attempts: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                manager,
                transaction,
                attempt,
                max_attempts,
                active: AtomicBool::new(true),
                properties: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The context of the attempt currently running for this request.
    ///
    /// Fails with [`TmError::NoTransaction`] outside the managed window.
    pub fn current(extensions: &Extensions) -> Result<&TmContext> {
        extensions
            .get::<TmContext>()
            .filter(|ctx| ctx.is_active())
            .ok_or(TmError::NoTransaction)
    }

    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        &self.inner.transaction
    }

    pub fn manager(&self) -> &Arc<dyn TransactionManager> {
        &self.inner.manager
    }

    /// Zero-based index of this attempt.
    pub fn attempt(&self) -> usize {
        self.inner.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.inner.max_attempts
    }

    pub fn is_last_attempt(&self) -> bool {
        self.inner.attempt + 1 >= self.inner.max_attempts
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Whether replaying the request could resolve `err`.
    ///
    /// Always `false` once the attempt has finished.
    pub fn is_exception_retryable(&self, err: &(dyn StdError + 'static)) -> bool {
        self.is_active() && self.inner.manager.is_retryable(err)
    }

    /// Memoize a request property for the lifetime of this attempt.
    ///
    /// Values are keyed by type. A replayed request gets a new context and
    /// therefore recomputes every property against its new transaction.
    pub fn reify<T, F>(&self, compute: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(&TmContext) -> T,
    {
        let key = TypeId::of::<T>();
        if let Some(cached) = self.inner.properties.lock()?.get(&key).cloned() {
            return cached
                .downcast::<T>()
                .map_err(|_| TmError::Transaction("reified property type mismatch".into()));
        }

        let value = Arc::new(compute(self));
        self.inner
            .properties
            .lock()?
            .insert(key, value.clone() as Arc<dyn Any + Send + Sync>);
        Ok(value)
    }

    pub(crate) fn deactivate(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for TmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmContext")
            .field("transaction", &self.inner.transaction.id())
            .field("attempt", &self.inner.attempt)
            .field("max_attempts", &self.inner.max_attempts)
            .field("active", &self.is_active())
            .finish()
    }
}
