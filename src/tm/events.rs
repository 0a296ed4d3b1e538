//! Attempt lifecycle notifications.

use crate::transaction::Transaction;
use http::request::Parts;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::BoxError;

/// Fired just before the handler runs for an attempt.
///
/// `attempt == 0` is the first play of the request; higher values are
/// replays.
pub struct AttemptEvent<'a> {
    pub request: &'a Parts,
    pub transaction: &'a Arc<dyn Transaction>,
    pub attempt: usize,
    pub max_attempts: usize,
}

/// Fired before the exception renderer is consulted.
pub struct ExceptionRenderEvent<'a> {
    pub request: &'a Parts,
    pub error: &'a BoxError,
}

pub trait AttemptObserver: Send + Sync + 'static {
    fn on_attempt(&self, _event: &AttemptEvent<'_>) {}

    fn on_exception_render(&self, _event: &ExceptionRenderEvent<'_>) {}
}

/// Counts attempts and exception renders.
#[derive(Debug, Default)]
pub struct AttemptCounter {
    attempts: AtomicUsize,
    replays: AtomicUsize,
    renders: AtomicUsize,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Attempts after the first one of their request.
    pub fn replays(&self) -> usize {
        self.replays.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl AttemptObserver for AttemptCounter {
    fn on_attempt(&self, event: &AttemptEvent<'_>) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if event.attempt > 0 {
            self.replays.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_exception_render(&self, _event: &ExceptionRenderEvent<'_>) {
        self.renders.fetch_add(1, Ordering::SeqCst);
    }
}
