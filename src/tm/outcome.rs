//! What one invocation of the downstream handler produced, and the
//! collaborator that turns unhandled errors into responses.

use axum::response::Response;
use http::request::Parts;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tower::BoxError;

/// An error an inner layer already rendered into a response.
///
/// Travels in the response extensions so the attempt loop can still
/// classify the underlying error.
#[derive(Clone)]
pub struct HandledError(Arc<dyn StdError + Send + Sync>);

impl HandledError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        let err: BoxError = err.into();
        HandledError(Arc::from(err))
    }

    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Attach to `response`, replacing any earlier marker.
    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }

    pub fn from_response(response: &Response) -> Option<&HandledError> {
        response.extensions().get::<HandledError>()
    }
}

impl fmt::Debug for HandledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandledError").field(&self.0).finish()
    }
}

impl fmt::Display for HandledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of running the handler once inside a transaction.
#[derive(Debug)]
pub enum Outcome {
    Success(Response),
    SuccessButVetoed(Response),
    Doomed(Response),
    HandledException(Response, HandledError),
    UnhandledException(BoxError),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::SuccessButVetoed(_) => "vetoed",
            Outcome::Doomed(_) => "doomed",
            Outcome::HandledException(..) => "handled_exception",
            Outcome::UnhandledException(_) => "unhandled_exception",
        }
    }
}

/// Renders an error that escaped the handler (or transaction finalization)
/// into a response. `None` means no view handles it and the error is
/// returned to the caller unchanged.
pub trait ExceptionRenderer: Send + Sync + 'static {
    fn render(&self, request: &Parts, err: &BoxError) -> Option<Response>;
}

impl<F> ExceptionRenderer for F
where
    F: Fn(&Parts, &BoxError) -> Option<Response> + Send + Sync + 'static,
{
    fn render(&self, request: &Parts, err: &BoxError) -> Option<Response> {
        self(request, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TmError;
    use axum::body::Body;

    #[test]
    fn test_handled_error_round_trips_through_response() {
        let mut response = Response::new(Body::empty());
        assert!(HandledError::from_response(&response).is_none());

        HandledError::new(TmError::Conflict("k".into())).attach(&mut response);
        let handled = HandledError::from_response(&response).unwrap();
        assert_eq!(
            handled.error().downcast_ref::<TmError>(),
            Some(&TmError::Conflict("k".into()))
        );
        assert_eq!(handled.to_string(), "Write-write conflict detected: k");
    }

    #[test]
    fn test_outcome_kinds() {
        let err: BoxError = "boom".into();
        assert_eq!(Outcome::UnhandledException(err).kind(), "unhandled_exception");
        assert_eq!(Outcome::Doomed(Response::new(Body::empty())).kind(), "doomed");
    }
}
