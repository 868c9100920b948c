//! Scripted datastore shared by the integration suites.
//!
//! Records every begin, commit and effective rollback, and can be told to
//! fail begins, commits or rollbacks with a given message.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use txr::{Context, Datastore, Transaction};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ScriptError(pub String);

impl ScriptError {
    pub fn new(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin(u64),
    Commit(u64),
    Rollback(u64),
}

#[derive(Default)]
struct ScriptState {
    next_id: AtomicU64,
    begin_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    events: Mutex<Vec<TxEvent>>,
    begin_failure: Mutex<Option<ScriptError>>,
    commit_failure: Mutex<Option<ScriptError>>,
    rollback_failure: Mutex<Option<ScriptError>>,
}

impl ScriptState {
    fn record(&self, event: TxEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Clone, Default)]
pub struct ScriptedStore {
    state: Arc<ScriptState>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin_with(&self, message: &str) {
        *self.state.begin_failure.lock().unwrap() = Some(ScriptError::new(message));
    }

    pub fn fail_commit_with(&self, message: &str) {
        *self.state.commit_failure.lock().unwrap() = Some(ScriptError::new(message));
    }

    pub fn fail_rollback_with(&self, message: &str) {
        *self.state.rollback_failure.lock().unwrap() = Some(ScriptError::new(message));
    }

    pub fn events(&self) -> Vec<TxEvent> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn begin_calls(&self) -> usize {
        self.state.begin_calls.load(Ordering::SeqCst)
    }

    pub fn rollback_calls(&self) -> usize {
        self.state.rollback_calls.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Begin(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Rollback(_)))
    }

    fn count(&self, predicate: impl Fn(&TxEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

pub struct ScriptedTx {
    id: u64,
    state: Arc<ScriptState>,
    finalized: AtomicBool,
}

impl ScriptedTx {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Datastore for ScriptedStore {
    type Error = ScriptError;
    type Transaction = ScriptedTx;

    async fn begin_transaction(&self, ctx: &Context) -> Result<ScriptedTx, ScriptError> {
        self.state.begin_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = ctx.err() {
            return Err(ScriptError(reason.to_string()));
        }
        if let Some(err) = self.state.begin_failure.lock().unwrap().clone() {
            return Err(err);
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.record(TxEvent::Begin(id));
        Ok(ScriptedTx {
            id,
            state: Arc::clone(&self.state),
            finalized: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transaction for ScriptedTx {
    type Error = ScriptError;

    async fn commit(&self) -> Result<(), ScriptError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(ScriptError::new("transaction has already been committed or rolled back"));
        }
        if let Some(err) = self.state.commit_failure.lock().unwrap().clone() {
            return Err(err);
        }

        self.finalized.store(true, Ordering::SeqCst);
        self.state.record(TxEvent::Commit(self.id));
        Ok(())
    }

    fn rollback(&self) -> Result<(), ScriptError> {
        self.state.rollback_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.rollback_failure.lock().unwrap().clone() {
            return Err(err);
        }
        if !self.finalized.swap(true, Ordering::SeqCst) {
            self.state.record(TxEvent::Rollback(self.id));
        }
        Ok(())
    }
}
