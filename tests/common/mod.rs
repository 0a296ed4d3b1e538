#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::{Request, StatusCode};
use request_tm::transaction::{TransactionId, is_transient_error};
use request_tm::{Result, TmError, Transaction, TransactionManager};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Transaction manager double that records every call it receives.
#[derive(Clone, Default)]
pub struct ScriptedManager {
    script: Arc<Script>,
}

#[derive(Default)]
struct Script {
    begun: AtomicUsize,
    committed: AtomicUsize,
    aborted: AtomicUsize,
    commit_error: Mutex<Option<TmError>>,
    abort_error: Mutex<Option<TmError>>,
    notes: Mutex<Vec<String>>,
    users: Mutex<Vec<String>>,
}

impl ScriptedManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit fails with `err`.
    pub fn fail_commit_with(self, err: TmError) -> Self {
        *self.script.commit_error.lock().unwrap() = Some(err);
        self
    }

    /// Every abort fails with `err`.
    pub fn fail_abort_with(self, err: TmError) -> Self {
        *self.script.abort_error.lock().unwrap() = Some(err);
        self
    }

    pub fn begun(&self) -> usize {
        self.script.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.script.committed.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.script.aborted.load(Ordering::SeqCst)
    }

    pub fn notes(&self) -> Vec<String> {
        self.script.notes.lock().unwrap().clone()
    }

    pub fn users(&self) -> Vec<String> {
        self.script.users.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionManager for ScriptedManager {
    async fn begin(&self) -> Result<Arc<dyn Transaction>> {
        self.script.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedTransaction {
            id: TransactionId::new(),
            script: self.script.clone(),
            doomed: AtomicBool::new(false),
        }))
    }

    fn is_retryable(&self, err: &(dyn StdError + 'static)) -> bool {
        is_transient_error(err)
    }
}

struct ScriptedTransaction {
    id: TransactionId,
    script: Arc<Script>,
    doomed: AtomicBool,
}

#[async_trait]
impl Transaction for ScriptedTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    async fn commit(&self) -> Result<()> {
        if let Some(err) = self.script.commit_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.script.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.script.aborted.fetch_add(1, Ordering::SeqCst);
        match self.script.abort_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn doom(&self) -> Result<()> {
        self.doomed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_doomed(&self) -> bool {
        self.doomed.load(Ordering::SeqCst)
    }

    async fn note(&self, text: &str) -> Result<()> {
        self.script.notes.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn set_user(&self, user: &str) -> Result<()> {
        self.script.users.lock().unwrap().push(user.to_string());
        Ok(())
    }
}

/// Non-transient handler failure.
#[derive(Debug, PartialEq)]
pub struct Boom(pub &'static str);

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl StdError for Boom {}

pub fn request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from("payload"))
        .unwrap()
}

pub fn status(code: u16) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(code).unwrap())
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
