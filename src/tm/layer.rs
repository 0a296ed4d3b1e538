//! Tower middleware wrapping a service in the attempt loop.

use super::attempt;
use super::gate::should_activate;
use crate::config::TmConfig;
use crate::core::Result;
use axum::body::Body;
use axum::response::Response;
use futures::future::BoxFuture;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service, ServiceExt};

/// Applies [`TmService`] to an inner service.
#[derive(Debug, Clone)]
pub struct TmLayer {
    config: Arc<TmConfig>,
}

impl TmLayer {
    /// Validate `config` and build the layer.
    pub fn new(config: TmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &TmConfig {
        &self.config
    }
}

impl<S> Layer<S> for TmLayer {
    type Service = TmService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TmService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Runs each request through the activation gate and, when it passes,
/// the attempt loop.
///
/// The inner service is cloned per attempt and driven with `oneshot`, so
/// readiness is checked where each attempt is dispatched.
#[derive(Debug, Clone)]
pub struct TmService<S> {
    inner: S,
    config: Arc<TmConfig>,
}

impl<S> Service<Request<Body>> for TmService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    type Response = Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, std::result::Result<Response, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let inner = self.inner.clone();
        let (parts, body) = request.into_parts();

        if !should_activate(self.config.activate_hook.as_deref(), &parts) {
            let request = Request::from_parts(parts, body);
            return Box::pin(async move { inner.oneshot(request).await.map_err(Into::into) });
        }

        Box::pin(attempt::run(self.config.clone(), inner, parts, body))
    }
}
