//! Collaborator traits for the marking engine.
//!
//! The engine never evaluates expressions itself: it compiles and runs them
//! through a [`Scope`]. It reads other parts through a [`Question`], reports
//! to a [`DisplaySink`] and persists through [`Storage`].

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credit::Credit;
use crate::error::EvalError;
use crate::value::Value;

/// Named values passed to an evaluation.
pub type Bindings = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// A compiled expression. The payload is whatever the scope that compiled it
/// needs to evaluate it later.
#[derive(Clone)]
pub struct Tree {
    source: String,
    compiled: Arc<dyn Any + Send + Sync>,
}

impl Tree {
    pub fn new<T: Any + Send + Sync>(source: impl Into<String>, compiled: T) -> Self {
        Self {
            source: source.into(),
            compiled: Arc::new(compiled),
        }
    }

    /// The expression text this tree was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.compiled.downcast_ref::<T>()
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree").field("source", &self.source).finish()
    }
}

/// Expression compiler and evaluator.
pub trait Scope: Send + Sync {
    fn compile(&self, expr: &str) -> Result<Tree, EvalError>;

    /// Evaluate `tree` with `bindings` layered over the scope's own variables.
    fn evaluate(&self, tree: &Tree, bindings: &Bindings) -> Result<Value, EvalError>;

    /// Names referenced by `tree` that it does not bind itself.
    fn find_free_variables(&self, tree: &Tree) -> BTreeSet<String>;

    fn get_variable(&self, name: &str) -> Option<Value>;

    /// A new scope that sees `bindings` in place of its own variables of the
    /// same name.
    fn with_additional_bindings(&self, bindings: Bindings) -> Arc<dyn Scope>;
}

// ---------------------------------------------------------------------------
// Question
// ---------------------------------------------------------------------------

/// What one part can see of another.
#[derive(Debug, Clone, PartialEq)]
pub struct PartSnapshot {
    pub path: String,
    pub answered: bool,
    pub interpreted_answer: Option<Value>,
    pub credit: Credit,
    pub score: f64,
}

/// The question a part belongs to.
pub trait Question: Send + Sync {
    /// The question's base scope.
    fn scope(&self) -> Arc<dyn Scope>;

    fn get_part(&self, path: &str) -> Option<PartSnapshot>;

    fn notify_score_changed(&self, path: &str);
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Receives student-visible notifications.
pub trait DisplaySink: Send + Sync {
    fn warning(&self, path: &str, text: &str);
    fn score_changed(&self, path: &str, score: f64, marks: f64);
}

/// Display sink that discards everything.
pub struct NoopDisplay;

impl DisplaySink for NoopDisplay {
    fn warning(&self, _: &str, _: &str) {}
    fn score_changed(&self, _: &str, _: f64, _: f64) {}
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// A cached pre-submit result: what the `pre_submit` note resolved to for
/// one answer along one execution path.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPreSubmit {
    pub execution_path: String,
    pub answer: Value,
    pub results: Value,
}

/// Part state as saved by a [`Storage`] backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredPartState {
    pub answered: bool,
    pub staged_answer: Option<Value>,
    pub pre_submit_cache: Vec<CachedPreSubmit>,
}

/// Everything recorded when an answer is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub path: String,
    pub answer: Option<Value>,
    pub answered: bool,
    pub credit: Credit,
    pub score: f64,
    pub pre_submit_cache: Vec<CachedPreSubmit>,
}

/// Persistence for part state.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_part_state(&self, path: &str) -> anyhow::Result<Option<StoredPartState>>;

    async fn record_answer_submitted(&self, record: &SubmissionRecord) -> anyhow::Result<()>;
}

/// Storage that keeps nothing.
pub struct NoopStorage;

#[async_trait]
impl Storage for NoopStorage {
    async fn load_part_state(&self, _: &str) -> anyhow::Result<Option<StoredPartState>> {
        Ok(None)
    }

    async fn record_answer_submitted(&self, _: &SubmissionRecord) -> anyhow::Result<()> {
        Ok(())
    }
}
