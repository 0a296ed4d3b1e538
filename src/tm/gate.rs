//! Activation gate: decides whether a request runs inside the attempt loop.

use super::context::{ExternalTransaction, TmContext};
use http::request::Parts;

/// Per-request opt-out hook. Returning `false` bypasses transaction
/// management for the request.
pub trait ActivateHook: Send + Sync + 'static {
    fn should_activate(&self, request: &Parts) -> bool;
}

impl<F> ActivateHook for F
where
    F: Fn(&Parts) -> bool + Send + Sync + 'static,
{
    fn should_activate(&self, request: &Parts) -> bool {
        self(request)
    }
}

/// Side-effect free; repeated calls on an unchanged request agree.
pub fn should_activate(hook: Option<&dyn ActivateHook>, request: &Parts) -> bool {
    if request.extensions.get::<ExternalTransaction>().is_some() {
        return false;
    }
    if request
        .extensions
        .get::<TmContext>()
        .is_some_and(TmContext::is_active)
    {
        return false;
    }
    hook.is_none_or(|hook| hook.should_activate(request))
}
