//! Request predicates for downstream view-selection code.

use super::context::TmContext;
use crate::config::as_bool;
use crate::core::Result;
use http::Extensions;
use std::error::Error as StdError;

fn active(extensions: &Extensions) -> Option<&TmContext> {
    TmContext::current(extensions).ok()
}

/// Whether an attempt is running for this request right now.
pub fn is_active(extensions: &Extensions) -> bool {
    active(extensions).is_some()
}

/// Whether a failure now would be final. Outside the managed window there
/// is no replay to hope for, so this is `true`.
pub fn is_last_attempt(extensions: &Extensions) -> bool {
    active(extensions).is_none_or(TmContext::is_last_attempt)
}

/// Whether `err` would be replayed by the running attempt loop.
pub fn is_exception_retryable(extensions: &Extensions, err: &(dyn StdError + 'static)) -> bool {
    active(extensions).is_some_and(|ctx| ctx.is_exception_retryable(err))
}

/// View predicate matching requests on whether transaction management is
/// active for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TmActivePredicate {
    expected: bool,
}

impl TmActivePredicate {
    pub fn new(expected: bool) -> Self {
        Self { expected }
    }

    /// Build from a configuration value; anything but a boolean is rejected
    /// here rather than at request time.
    pub fn from_setting(value: &str) -> Result<Self> {
        as_bool(value).map(Self::new)
    }

    pub fn matches(&self, extensions: &Extensions) -> bool {
        is_active(extensions) == self.expected
    }

    pub fn text(&self) -> String {
        format!("tm_active = {}", self.expected)
    }
}
