// ============================================================================
// Request Transaction Middleware
// ============================================================================
//
// Wraps a request handler in a transaction per attempt:
//
//   TmService::call
//     -> gate::should_activate         (bypass when externally managed)
//     -> attempt::run                  (begin, play, classify, resolve)
//          -> replay::ReplayState      (buffered body, fresh request per attempt)
//          -> veto / HandledError      (commit or abort the response)
//          -> TransactionManager       (retry classification)
//
// ============================================================================

pub mod attempt;
pub mod context;
pub mod events;
pub mod gate;
pub mod layer;
pub mod outcome;
pub mod predicates;
pub mod replay;
pub mod veto;

pub use attempt::{UNDECODABLE_PATH_NOTE, describe_target};
pub use context::{ExternalTransaction, TmContext, UserId};
pub use events::{AttemptCounter, AttemptEvent, AttemptObserver, ExceptionRenderEvent};
pub use gate::{ActivateHook, should_activate};
pub use layer::{TmLayer, TmService};
pub use outcome::{ExceptionRenderer, HandledError, Outcome};
pub use predicates::{TmActivePredicate, is_active, is_exception_retryable, is_last_attempt};
pub use replay::ReplayState;
pub use veto::{CommitVeto, TM_HEADER, default_commit_veto};
