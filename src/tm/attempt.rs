//! The attempt loop.
//!
//! Each attempt begins a transaction, plays the request once through the
//! inner service, maps what came back to an [`Outcome`] and ends the
//! transaction with exactly one of commit or abort. Transient failures
//! replay the request until the attempt budget runs out.

use super::context::{TmContext, UserId};
use super::events::{AttemptEvent, ExceptionRenderEvent};
use super::outcome::{HandledError, Outcome};
use super::replay::ReplayState;
use crate::config::TmConfig;
use crate::transaction::Transaction;
use axum::body::Body;
use axum::response::Response;
use http::Request;
use http::request::Parts;
use log::warn;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::sync::Arc;
use tower::{BoxError, Service, ServiceExt};
use tracing::{Instrument, Level, event, info_span};

/// Note recorded when the request path is not valid UTF-8 once decoded.
pub const UNDECODABLE_PATH_NOTE: &str = "Unable to decode path as unicode";

enum Step {
    Return(Result<Response, BoxError>),
    Retry,
}

/// Aborts an attempt's transaction when the attempt future is dropped
/// before it resolved, e.g. on client disconnect or timeout.
struct AbortOnDrop {
    transaction: Option<Arc<dyn Transaction>>,
}

impl AbortOnDrop {
    fn new(transaction: Arc<dyn Transaction>) -> Self {
        Self {
            transaction: Some(transaction),
        }
    }

    fn disarm(&mut self) {
        self.transaction = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let id = transaction.id();
                    match transaction.abort().await {
                        Ok(()) => event!(Level::DEBUG, transaction = %id, "cancelled attempt aborted"),
                        Err(err) => warn!("abort of cancelled attempt {} failed: {}", id, err),
                    }
                });
            }
            Err(_) => warn!(
                "attempt {} dropped outside a runtime; transaction left open",
                transaction.id()
            ),
        }
    }
}

/// Run `parts`/`body` through `inner` inside the attempt loop.
pub(crate) async fn run<S>(
    config: Arc<TmConfig>,
    inner: S,
    parts: Parts,
    body: Body,
) -> Result<Response, BoxError>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    let manager = config.manager_for(&parts);
    let max_attempts = config.max_attempts;
    let mut replay = ReplayState::new(parts, body, max_attempts);

    loop {
        if max_attempts > 1 {
            if let Err(err) = replay.make_body_seekable(config.body_limit).await {
                return render_or_raise(&config, replay.parts(), err.into());
            }
        }

        let attempt = replay.attempt_count();
        let transaction = manager.begin().await?;
        let mut guard = AbortOnDrop::new(transaction.clone());
        let ctx = TmContext::new(manager.clone(), transaction, attempt, max_attempts);
        let span = info_span!(
            "tm_attempt",
            attempt,
            max_attempts,
            transaction = %ctx.transaction().id()
        );

        let service = inner.clone();
        let step = async {
            let outcome = play(&config, service, &mut replay, &ctx).await;
            event!(Level::DEBUG, outcome = outcome.kind(), "handler finished");
            resolve(&config, replay.parts(), &ctx, outcome).await
        }
        .instrument(span)
        .await;
        guard.disarm();
        ctx.deactivate();

        match step {
            Step::Return(result) => return result,
            Step::Retry => replay.finish_attempt(),
        }
    }
}

/// Invoke the inner service once and classify the result.
async fn play<S>(
    config: &TmConfig,
    inner: S,
    replay: &mut ReplayState,
    ctx: &TmContext,
) -> Outcome
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    let transaction = ctx.transaction();
    if let Err(err) = annotate(config, replay.parts(), transaction).await {
        return Outcome::UnhandledException(err.into());
    }

    if let Some(observer) = &config.observer {
        observer.on_attempt(&AttemptEvent {
            request: replay.parts(),
            transaction,
            attempt: ctx.attempt(),
            max_attempts: ctx.max_attempts(),
        });
    }

    let request = replay.next_request(ctx.clone());
    match inner.oneshot(request).await.map_err(Into::<BoxError>::into) {
        Ok(response) => classify(config, replay.parts(), ctx, response).await,
        Err(err) => Outcome::UnhandledException(err),
    }
}

/// Map a returned response to an outcome.
///
/// Doom wins over everything. A handled error that a replay could fix
/// comes next; after that a configured veto has the final say, and
/// without one any handled error rolls back.
async fn classify(
    config: &TmConfig,
    request: &Parts,
    ctx: &TmContext,
    response: Response,
) -> Outcome {
    if ctx.transaction().is_doomed().await {
        return Outcome::Doomed(response);
    }

    let handled = HandledError::from_response(&response).cloned();
    if let Some(handled) = handled {
        if !ctx.is_last_attempt() && ctx.is_exception_retryable(handled.error()) {
            return Outcome::HandledException(response, handled);
        }
        if config.commit_veto.is_none() {
            return Outcome::HandledException(response, handled);
        }
    }

    match &config.commit_veto {
        Some(veto) if veto.veto(request, &response) => Outcome::SuccessButVetoed(response),
        _ => Outcome::Success(response),
    }
}

async fn resolve(config: &TmConfig, request: &Parts, ctx: &TmContext, outcome: Outcome) -> Step {
    let transaction = ctx.transaction();
    match outcome {
        Outcome::Success(response) => match transaction.commit().await {
            Ok(()) => {
                event!(Level::DEBUG, "transaction committed");
                Step::Return(Ok(response))
            }
            Err(err) => {
                event!(Level::DEBUG, error = %err, "commit failed");
                fail_or_retry(config, request, ctx, err.into()).await
            }
        },
        Outcome::SuccessButVetoed(response) => {
            event!(Level::DEBUG, status = %response.status(), "commit vetoed");
            abort_and_return(config, request, transaction, response).await
        }
        Outcome::Doomed(response) => {
            event!(Level::DEBUG, "transaction doomed");
            abort_and_return(config, request, transaction, response).await
        }
        Outcome::HandledException(response, handled) => {
            if !ctx.is_last_attempt() && ctx.is_exception_retryable(handled.error()) {
                if let Err(err) = transaction.abort().await {
                    return Step::Return(render_or_raise(config, request, err.into()));
                }
                warn!(
                    "request replay on handled error (attempt {} of {}): {}",
                    ctx.attempt() + 1,
                    ctx.max_attempts(),
                    handled
                );
                return Step::Retry;
            }
            event!(Level::DEBUG, error = %handled, "handled error rolls back");
            abort_and_return(config, request, transaction, response).await
        }
        Outcome::UnhandledException(err) => fail_or_retry(config, request, ctx, err).await,
    }
}

/// Abort after a failure, then either replay or surface the error.
///
/// Retryability is decided before the abort, which may discard what the
/// classifier needs. An abort failure replaces the original error.
async fn fail_or_retry(
    config: &TmConfig,
    request: &Parts,
    ctx: &TmContext,
    err: BoxError,
) -> Step {
    let retry = !ctx.is_last_attempt() && ctx.is_exception_retryable(&*err);

    if let Err(abort_err) = ctx.transaction().abort().await {
        event!(Level::ERROR, error = %abort_err, "abort failed");
        return Step::Return(render_or_raise(config, request, abort_err.into()));
    }

    if retry {
        warn!(
            "request replay on transient error (attempt {} of {}): {}",
            ctx.attempt() + 1,
            ctx.max_attempts(),
            err
        );
        return Step::Retry;
    }

    event!(Level::DEBUG, error = %err, "transaction aborted");
    Step::Return(render_or_raise(config, request, err))
}

async fn abort_and_return(
    config: &TmConfig,
    request: &Parts,
    transaction: &Arc<dyn Transaction>,
    response: Response,
) -> Step {
    match transaction.abort().await {
        Ok(()) => {
            event!(Level::DEBUG, "transaction aborted");
            Step::Return(Ok(response))
        }
        Err(err) => Step::Return(render_or_raise(config, request, err.into())),
    }
}

/// Give the exception renderer a chance at `err`; otherwise hand `err`
/// back untouched.
fn render_or_raise(config: &TmConfig, request: &Parts, err: BoxError) -> Result<Response, BoxError> {
    let Some(renderer) = &config.renderer else {
        return Err(err);
    };
    if let Some(observer) = &config.observer {
        observer.on_exception_render(&ExceptionRenderEvent {
            request,
            error: &err,
        });
    }
    match renderer.render(request, &err) {
        Some(response) => Ok(response),
        None => Err(err),
    }
}

async fn annotate(
    config: &TmConfig,
    request: &Parts,
    transaction: &Arc<dyn Transaction>,
) -> crate::core::Result<()> {
    if config.annotate_user {
        if let Some(user) = request.extensions.get::<UserId>() {
            transaction.set_user(user.as_str()).await?;
        }
    }
    transaction.note(&describe_target(request)).await
}

/// Decoded request path, or [`UNDECODABLE_PATH_NOTE`].
pub fn describe_target(request: &Parts) -> String {
    percent_decode_str(request.uri.path())
        .decode_utf8()
        .map(Cow::into_owned)
        .unwrap_or_else(|_| UNDECODABLE_PATH_NOTE.to_string())
}
