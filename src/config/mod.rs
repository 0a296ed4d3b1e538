pub mod settings;

pub use settings::{PolicyRegistry, TmSettings, as_bool};

use crate::core::{Result, TmError};
use crate::tm::events::AttemptObserver;
use crate::tm::gate::ActivateHook;
use crate::tm::outcome::ExceptionRenderer;
use crate::tm::veto::{CommitVeto, default_commit_veto};
use crate::transaction::TransactionManager;
use http::request::Parts;
use std::fmt;
use std::sync::Arc;

/// Default cap on the request body buffered for replays (2 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Picks the transaction manager for a request. Called once per request;
/// the result serves every attempt.
pub trait ManagerHook: Send + Sync + 'static {
    fn manager_for(&self, request: &Parts) -> Arc<dyn TransactionManager>;
}

impl<F> ManagerHook for F
where
    F: Fn(&Parts) -> Arc<dyn TransactionManager> + Send + Sync + 'static,
{
    fn manager_for(&self, request: &Parts) -> Arc<dyn TransactionManager> {
        self(request)
    }
}

/// Transaction middleware configuration
///
/// Resolved once at startup; the request path only reads it.
#[derive(Clone)]
pub struct TmConfig {
    /// Upper bound on plays of one request (1 = no replay)
    pub max_attempts: usize,

    /// Record the caller's `UserId` on each transaction
    pub annotate_user: bool,

    /// Maximum request body size buffered when replays are enabled
    pub body_limit: usize,

    /// Default transaction manager
    pub manager: Arc<dyn TransactionManager>,

    /// Per-request override of `manager`
    pub manager_hook: Option<Arc<dyn ManagerHook>>,

    pub commit_veto: Option<Arc<dyn CommitVeto>>,

    pub activate_hook: Option<Arc<dyn ActivateHook>>,

    /// Exception view consulted for errors that end an attempt
    pub renderer: Option<Arc<dyn ExceptionRenderer>>,

    pub observer: Option<Arc<dyn AttemptObserver>>,
}

impl TmConfig {
    /// Create a configuration around `manager` with single-attempt defaults
    pub fn new(manager: impl TransactionManager) -> Self {
        Self::with_manager(Arc::new(manager))
    }

    pub fn with_manager(manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            max_attempts: 1,
            annotate_user: true,
            body_limit: DEFAULT_BODY_LIMIT,
            manager,
            manager_hook: None,
            commit_veto: None,
            activate_hook: None,
            renderer: None,
            observer: None,
        }
    }

    /// Set maximum attempts per request
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn annotate_user(mut self, enabled: bool) -> Self {
        self.annotate_user = enabled;
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn manager_hook(mut self, hook: impl ManagerHook) -> Self {
        self.manager_hook = Some(Arc::new(hook));
        self
    }

    pub fn commit_veto(mut self, veto: impl CommitVeto) -> Self {
        self.commit_veto = Some(Arc::new(veto));
        self
    }

    /// Use the built-in status/`X-Tm` header veto
    pub fn default_commit_veto(self) -> Self {
        self.commit_veto(default_commit_veto)
    }

    pub fn activate_hook(mut self, hook: impl ActivateHook) -> Self {
        self.activate_hook = Some(Arc::new(hook));
        self
    }

    pub fn renderer(mut self, renderer: impl ExceptionRenderer) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Reject settings that could never serve a request.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TmError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.body_limit == 0 {
            return Err(TmError::Config("body_limit must be positive".to_string()));
        }
        Ok(())
    }

    pub(crate) fn manager_for(&self, request: &Parts) -> Arc<dyn TransactionManager> {
        match &self.manager_hook {
            Some(hook) => hook.manager_for(request),
            None => self.manager.clone(),
        }
    }
}

impl fmt::Debug for TmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmConfig")
            .field("max_attempts", &self.max_attempts)
            .field("annotate_user", &self.annotate_user)
            .field("body_limit", &self.body_limit)
            .field("manager_hook", &self.manager_hook.is_some())
            .field("commit_veto", &self.commit_veto.is_some())
            .field("activate_hook", &self.activate_hook.is_some())
            .field("renderer", &self.renderer.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MemoryTransactionManager;
    use http::Request;

    #[test]
    fn test_defaults_are_single_attempt_without_veto() {
        let config = TmConfig::new(MemoryTransactionManager::new());
        assert_eq!(config.max_attempts, 1);
        assert!(config.annotate_user);
        assert!(config.commit_veto.is_none());
        assert!(config.activate_hook.is_none());
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);
        config.validate().unwrap();
    }

    #[test]
    fn test_builder_chain() {
        let config = TmConfig::new(MemoryTransactionManager::new())
            .max_attempts(3)
            .annotate_user(false)
            .default_commit_veto()
            .activate_hook(|_: &Parts| true);

        assert_eq!(config.max_attempts, 3);
        assert!(!config.annotate_user);
        assert!(config.commit_veto.is_some());
        assert!(config.activate_hook.is_some());
    }

    #[test]
    fn test_zero_attempts_fail_validation() {
        let config = TmConfig::new(MemoryTransactionManager::new()).max_attempts(0);
        assert!(matches!(config.validate(), Err(TmError::Config(_))));

        let config = TmConfig::new(MemoryTransactionManager::new()).body_limit(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manager_hook_overrides_default_manager() {
        let tenant = Arc::new(MemoryTransactionManager::new());
        let hooked: Arc<dyn TransactionManager> = tenant.clone();
        let config = TmConfig::new(MemoryTransactionManager::new())
            .manager_hook(move |_: &Parts| hooked.clone());

        let (parts, _) = Request::new(()).into_parts();
        let chosen = config.manager_for(&parts);
        let expected: Arc<dyn TransactionManager> = tenant;
        assert!(Arc::ptr_eq(&chosen, &expected));
    }
}
