use anyhow::{Context, Result};
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use clap::Parser;
use request_tm::{
    AttemptCounter, MemoryTransactionManager, TmConfig, TmContext, TmError, TmLayer, WebError,
    web,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "request-tm-demo")]
#[command(about = "Counter service running every request in its own transaction")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Attempts per request (1 disables replay)
    #[arg(long, default_value_t = 3)]
    attempts: usize,

    /// Roll back 4xx/5xx responses
    #[arg(long)]
    veto: bool,
}

#[derive(Clone)]
struct AppState {
    store: MemoryTransactionManager,
    counter: Arc<AttemptCounter>,
}

/// Read-increment-write with a pause in between so concurrent hits on the
/// same key collide at commit.
async fn hit(
    State(state): State<AppState>,
    Extension(ctx): Extension<TmContext>,
    Path(key): Path<String>,
) -> web::Result<Json<Value>> {
    let txn = ctx.transaction().id();
    let current = state
        .store
        .get(txn, &key)
        .await?
        .and_then(|value| value.as_u64())
        .unwrap_or(0);

    tokio::time::sleep(Duration::from_millis(25)).await;
    state.store.put(txn, &key, json!(current + 1)).await?;

    Ok(Json(json!({
        "key": key,
        "count": current + 1,
        "attempt": ctx.attempt(),
    })))
}

async fn count(State(state): State<AppState>, Path(key): Path<String>) -> Json<Value> {
    let value = state.store.read_committed(&key).await.unwrap_or(Value::Null);
    let stats = state.store.stats().await;
    Json(json!({
        "key": key,
        "count": value,
        "attempts": state.counter.attempts(),
        "replays": state.counter.replays(),
        "commits": stats.commits,
        "conflicts": stats.conflicts,
    }))
}

async fn fail() -> web::Result<Json<Value>> {
    Err(WebError::Input("this request always fails".to_string()))
}

async fn handle_error(err: BoxError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn render_transaction_error(_request: &Parts, err: &BoxError) -> Option<axum::response::Response> {
    err.downcast_ref::<TmError>()
        .map(|err| WebError::from(err.clone()).into_response())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("request_tm=debug,tower_http=info")
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = MemoryTransactionManager::new();
    let counter = Arc::new(AttemptCounter::new());

    let mut config = TmConfig::new(store.clone())
        .max_attempts(cli.attempts)
        .renderer(render_transaction_error)
        .observer(counter.clone());
    if cli.veto {
        config = config.default_commit_veto();
    }
    let tm = TmLayer::new(config).context("invalid transaction settings")?;

    let app = Router::new()
        .route("/hit/:key", post(hit))
        .route("/count/:key", get(count))
        .route("/fail", post(fail))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_error))
                .layer(tm),
        )
        .with_state(AppState { store, counter });

    let listener = tokio::net::TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;
    info!(
        "request-tm-demo listening on {} (attempts={}, veto={})",
        cli.addr, cli.attempts, cli.veto
    );
    axum::serve(listener, app).await?;
    Ok(())
}
