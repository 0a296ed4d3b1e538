//! Commit-veto policy.

use axum::response::Response;
use http::request::Parts;

/// Response header a handler uses to override the commit decision.
pub const TM_HEADER: &str = "x-tm";

/// Decides whether an otherwise successful response must still roll back.
///
/// Implementations are pure: they must not touch the transaction or the
/// request, and are consulted at most once per attempt.
pub trait CommitVeto: Send + Sync + 'static {
    fn veto(&self, request: &Parts, response: &Response) -> bool;
}

impl<F> CommitVeto for F
where
    F: Fn(&Parts, &Response) -> bool + Send + Sync + 'static,
{
    fn veto(&self, request: &Parts, response: &Response) -> bool {
        self(request, response)
    }
}

/// Built-in veto.
///
/// Rolls back when the response carries an `X-Tm` header with any value
/// other than `commit`, or, without the header, when the status is 4xx/5xx.
pub fn default_commit_veto(_request: &Parts, response: &Response) -> bool {
    if let Some(directive) = response.headers().get(TM_HEADER) {
        return directive.as_bytes() != b"commit";
    }
    let status = response.status();
    status.is_client_error() || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Request, StatusCode};

    fn parts() -> Parts {
        Request::new(()).into_parts().0
    }

    fn response(status: u16, xtm: Option<&str>) -> Response {
        let mut builder = Response::builder().status(status);
        if let Some(value) = xtm {
            builder = builder.header(TM_HEADER, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_error_statuses_veto() {
        for status in [400, 411, 404, 500, 503] {
            assert!(default_commit_veto(&parts(), &response(status, None)), "{status}");
        }
    }

    #[test]
    fn test_success_and_redirect_statuses_commit() {
        for status in [200, 201, 204, 301, 302] {
            assert!(!default_commit_veto(&parts(), &response(status, None)), "{status}");
        }
    }

    #[test]
    fn test_header_commit_overrides_error_status() {
        assert!(!default_commit_veto(&parts(), &response(500, Some("commit"))));
        assert!(!default_commit_veto(&parts(), &response(200, Some("commit"))));
    }

    #[test]
    fn test_header_with_other_value_always_vetoes() {
        assert!(default_commit_veto(&parts(), &response(200, Some("abort"))));
        assert!(default_commit_veto(&parts(), &response(200, Some(""))));
        assert!(default_commit_veto(&parts(), &response(302, Some("Commit"))));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header("X-Tm", "commit")
            .body(Body::empty())
            .unwrap();
        assert!(!default_commit_veto(&parts(), &response));
    }

    #[test]
    fn test_closures_are_vetoes() {
        let always = |_: &Parts, _: &Response| true;
        assert!(always.veto(&parts(), &response(200, None)));
    }
}
