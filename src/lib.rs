// ============================================================================
// request-tm Library
// ============================================================================
//
// Request-scoped transaction management for tower/axum services: one
// transaction per attempt, commit or abort decided per response, and
// bounded replay of requests that failed on a transient conflict.
//
// ============================================================================

//! # Examples
//!
//! ```no_run
//! use axum::error_handling::HandleErrorLayer;
//! use axum::http::StatusCode;
//! use axum::{Extension, Router, routing::post};
//! use request_tm::{MemoryTransactionManager, TmConfig, TmContext, TmLayer};
//! use tower::{BoxError, ServiceBuilder};
//!
//! async fn handler(Extension(ctx): Extension<TmContext>) -> &'static str {
//!     let _txn = ctx.transaction();
//!     "ok"
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TmConfig::new(MemoryTransactionManager::new())
//!     .max_attempts(3)
//!     .default_commit_veto();
//!
//! let _app: Router = Router::new()
//!     .route("/orders", post(handler))
//!     .layer(
//!         ServiceBuilder::new()
//!             .layer(HandleErrorLayer::new(|err: BoxError| async move {
//!                 (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
//!             }))
//!             .layer(TmLayer::new(config)?),
//!     );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod tm;
pub mod transaction;
pub mod web;

// Re-export main types for convenience
pub use config::{ManagerHook, PolicyRegistry, TmConfig, TmSettings};
pub use core::{Result, TmError};
pub use tm::{
    ActivateHook, AttemptCounter, AttemptObserver, CommitVeto, ExceptionRenderer,
    ExternalTransaction, HandledError, TmActivePredicate, TmContext, TmLayer, TmService, UserId,
    default_commit_veto,
};
pub use transaction::{MemoryTransactionManager, Transaction, TransactionManager};
pub use web::WebError;
