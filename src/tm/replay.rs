//! Request replay state.
//!
//! Holds the pristine request head and the buffered body so that every
//! attempt starts from an identical, freshly built request.

use super::context::TmContext;
use crate::core::{Result, TmError};
use axum::body::{Body, Bytes};
use http::Request;
use http::request::Parts;

enum ReplayBody {
    /// Not read yet; only a single attempt may consume it.
    Streaming(Body),
    Buffered(Bytes),
    Consumed,
}

pub struct ReplayState {
    parts: Parts,
    body: ReplayBody,
    max_attempts: usize,
    attempt_count: usize,
    seek_calls: usize,
}

impl ReplayState {
    pub fn new(parts: Parts, body: Body, max_attempts: usize) -> Self {
        Self {
            parts,
            body: ReplayBody::Streaming(body),
            max_attempts,
            attempt_count: 0,
            seek_calls: 0,
        }
    }

    /// Head of the original request. Never mutated by attempts.
    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt_count + 1 >= self.max_attempts
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.body, ReplayBody::Buffered(_))
    }

    /// Number of `make_body_seekable` calls so far.
    pub fn seek_calls(&self) -> usize {
        self.seek_calls
    }

    /// Buffer the body on first call; later calls only rewind.
    ///
    /// Fails when the body exceeds `limit` bytes or the stream errors.
    pub async fn make_body_seekable(&mut self, limit: usize) -> Result<()> {
        self.seek_calls += 1;
        self.body = match std::mem::replace(&mut self.body, ReplayBody::Consumed) {
            ReplayBody::Streaming(body) => {
                let bytes = axum::body::to_bytes(body, limit)
                    .await
                    .map_err(|err| TmError::Body(err.to_string()))?;
                ReplayBody::Buffered(bytes)
            }
            other => other,
        };
        Ok(())
    }

    /// Build the request for the next attempt.
    ///
    /// Method, URI, headers and the extensions of the original request are
    /// carried forward; anything a previous attempt attached to its own
    /// request is dropped with it. `ctx` is inserted for the handler.
    pub fn next_request(&mut self, ctx: TmContext) -> Request<Body> {
        let body = match std::mem::replace(&mut self.body, ReplayBody::Consumed) {
            ReplayBody::Buffered(bytes) => {
                let body = Body::from(bytes.clone());
                self.body = ReplayBody::Buffered(bytes);
                body
            }
            ReplayBody::Streaming(body) => body,
            ReplayBody::Consumed => Body::empty(),
        };

        let mut request = Request::new(body);
        *request.method_mut() = self.parts.method.clone();
        *request.uri_mut() = self.parts.uri.clone();
        *request.version_mut() = self.parts.version;
        *request.headers_mut() = self.parts.headers.clone();
        *request.extensions_mut() = self.parts.extensions.clone();
        request.extensions_mut().insert(ctx);
        request
    }

    pub fn finish_attempt(&mut self) {
        self.attempt_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{MemoryTransactionManager, TransactionManager};
    use http::{HeaderValue, Method};
    use std::sync::Arc;

    fn state(max_attempts: usize) -> ReplayState {
        let (parts, body) = Request::builder()
            .method(Method::POST)
            .uri("/orders?x=1")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"qty":2}"#))
            .unwrap()
            .into_parts();
        ReplayState::new(parts, body, max_attempts)
    }

    async fn ctx(attempt: usize) -> TmContext {
        let manager = Arc::new(MemoryTransactionManager::new());
        let txn = manager.begin().await.unwrap();
        TmContext::new(manager, txn, attempt, 3)
    }

    async fn read(request: Request<Body>) -> Bytes {
        axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_body_buffered_once_and_replayed_verbatim() {
        let mut replay = state(3);

        for attempt in 0..3 {
            replay.make_body_seekable(1024).await.unwrap();
            assert!(replay.is_buffered());
            let request = replay.next_request(ctx(attempt).await);
            assert_eq!(*request.method(), Method::POST);
            assert_eq!(request.uri(), "/orders?x=1");
            assert_eq!(&read(request).await[..], br#"{"qty":2}"#);
            replay.finish_attempt();
        }
        assert_eq!(replay.seek_calls(), 3);
        assert_eq!(replay.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut replay = state(2);
        let err = replay.make_body_seekable(3).await.unwrap_err();
        assert!(matches!(err, TmError::Body(_)));
    }

    #[tokio::test]
    async fn test_single_attempt_streams_body_without_buffering() {
        let mut replay = state(1);
        let request = replay.next_request(ctx(0).await);
        assert!(!replay.is_buffered());
        assert_eq!(&read(request).await[..], br#"{"qty":2}"#);
    }

    #[tokio::test]
    async fn test_attempt_mutations_do_not_leak_into_replay() {
        let mut replay = state(2);
        replay.make_body_seekable(1024).await.unwrap();

        let mut first = replay.next_request(ctx(0).await);
        first
            .headers_mut()
            .insert("x-touched", HeaderValue::from_static("yes"));
        first.extensions_mut().insert(42u32);
        replay.finish_attempt();

        let second = replay.next_request(ctx(1).await);
        assert!(second.headers().get("x-touched").is_none());
        assert!(second.extensions().get::<u32>().is_none());
        assert_eq!(
            second.extensions().get::<TmContext>().unwrap().attempt(),
            1
        );
        assert!(replay.parts().extensions.get::<TmContext>().is_none());
    }

    #[test]
    fn test_last_attempt_tracking() {
        let mut replay = state(2);
        assert!(!replay.is_last_attempt());
        replay.finish_attempt();
        assert!(replay.is_last_attempt());
        assert_eq!(replay.max_attempts(), 2);
    }
}
