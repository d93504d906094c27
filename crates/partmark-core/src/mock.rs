//! In-memory collaborators for testing the marking engine without a real
//! expression language or persistence layer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::EvalError;
use crate::traits::{
    Bindings, DisplaySink, PartSnapshot, Question, Scope, Storage, StoredPartState,
    SubmissionRecord, Tree,
};
use crate::value::Value;

type EvalFn = Arc<dyn Fn(&Bindings) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone)]
struct MockExpr {
    dependencies: BTreeSet<String>,
    eval: EvalFn,
}

/// What a [`MockScope`] compiled an expression to.
#[derive(Debug, Clone)]
enum Compiled {
    Registered(String),
    Name(String),
    Literal(Value),
}

/// A table-driven scope.
///
/// Expressions are matched by their exact (trimmed) text against closures
/// registered with [`MockScope::define`]. Bare names, numbers, quoted strings
/// and `true`/`false` compile without registration.
#[derive(Clone, Default)]
pub struct MockScope {
    expressions: BTreeMap<String, MockExpr>,
    variables: Bindings,
    evaluations: Arc<AtomicU32>,
}

impl MockScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expression. `dependencies` are the names it reads.
    pub fn define<F>(mut self, expr: &str, dependencies: &[&str], eval: F) -> Self
    where
        F: Fn(&Bindings) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.expressions.insert(
            expr.trim().to_string(),
            MockExpr {
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                eval: Arc::new(eval),
            },
        );
        self
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    /// Number of registered-expression evaluations so far, shared with every
    /// scope derived from this one.
    pub fn evaluation_count(&self) -> u32 {
        self.evaluations.load(Ordering::Relaxed)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl Scope for MockScope {
    fn compile(&self, expr: &str) -> Result<Tree, EvalError> {
        let expr = expr.trim();
        let compiled = if self.expressions.contains_key(expr) {
            Compiled::Registered(expr.to_string())
        } else if expr == "true" || expr == "false" {
            Compiled::Literal(Value::Bool(expr == "true"))
        } else if is_identifier(expr) {
            Compiled::Name(expr.to_string())
        } else if let Ok(n) = expr.parse::<f64>() {
            Compiled::Literal(Value::Number(n))
        } else if let Some(s) = expr.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            Compiled::Literal(Value::from(s))
        } else {
            return Err(EvalError::Compile {
                expr: expr.to_string(),
                message: "no mock registered for this expression".into(),
            });
        };
        Ok(Tree::new(expr, compiled))
    }

    fn evaluate(&self, tree: &Tree, bindings: &Bindings) -> Result<Value, EvalError> {
        let compiled = tree.downcast_ref::<Compiled>().ok_or_else(|| {
            EvalError::Failed(format!("'{}' was compiled by another scope", tree.source()))
        })?;
        match compiled {
            Compiled::Registered(key) => {
                let expr = self.expressions.get(key).ok_or_else(|| {
                    EvalError::Failed(format!("'{key}' is not registered in this scope"))
                })?;
                self.evaluations.fetch_add(1, Ordering::Relaxed);
                let mut merged = self.variables.clone();
                merged.extend(bindings.iter().map(|(k, v)| (k.clone(), v.clone())));
                (expr.eval)(&merged)
            }
            Compiled::Name(name) => bindings
                .get(name)
                .or_else(|| self.variables.get(name))
                .cloned()
                .ok_or_else(|| EvalError::UndefinedName(name.clone())),
            Compiled::Literal(value) => Ok(value.clone()),
        }
    }

    fn find_free_variables(&self, tree: &Tree) -> BTreeSet<String> {
        match tree.downcast_ref::<Compiled>() {
            Some(Compiled::Registered(key)) => self
                .expressions
                .get(key)
                .map(|e| e.dependencies.clone())
                .unwrap_or_default(),
            Some(Compiled::Name(name)) => BTreeSet::from([name.clone()]),
            _ => BTreeSet::new(),
        }
    }

    fn get_variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn with_additional_bindings(&self, bindings: Bindings) -> Arc<dyn Scope> {
        let mut scope = self.clone();
        scope.variables.extend(bindings);
        Arc::new(scope)
    }
}

/// A question whose parts are fixed snapshots set by the caller.
pub struct StaticQuestion {
    scope: Arc<dyn Scope>,
    parts: Mutex<BTreeMap<String, PartSnapshot>>,
    notifications: Mutex<Vec<String>>,
}

impl StaticQuestion {
    pub fn new(scope: Arc<dyn Scope>) -> Self {
        Self {
            scope,
            parts: Mutex::new(BTreeMap::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn with_part(self, snapshot: PartSnapshot) -> Self {
        self.set_part(snapshot);
        self
    }

    pub fn set_part(&self, snapshot: PartSnapshot) {
        self.parts
            .lock()
            .unwrap()
            .insert(snapshot.path.clone(), snapshot);
    }

    /// Paths passed to `notify_score_changed`, in order.
    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Question for StaticQuestion {
    fn scope(&self) -> Arc<dyn Scope> {
        Arc::clone(&self.scope)
    }

    fn get_part(&self, path: &str) -> Option<PartSnapshot> {
        self.parts.lock().unwrap().get(path).cloned()
    }

    fn notify_score_changed(&self, path: &str) {
        self.notifications.lock().unwrap().push(path.to_string());
    }
}

/// Storage that keeps part state in memory.
#[derive(Default)]
pub struct MemoryStorage {
    states: Mutex<BTreeMap<String, StoredPartState>>,
    records: Mutex<Vec<SubmissionRecord>>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A storage whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_state(&self, path: &str, state: StoredPartState) {
        self.states.lock().unwrap().insert(path.to_string(), state);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_part_state(&self, path: &str) -> anyhow::Result<Option<StoredPartState>> {
        Ok(self.states.lock().unwrap().get(path).cloned())
    }

    async fn record_answer_submitted(&self, record: &SubmissionRecord) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("storage is read-only");
        }
        self.states.lock().unwrap().insert(
            record.path.clone(),
            StoredPartState {
                answered: record.answered,
                staged_answer: record.answer.clone(),
                pre_submit_cache: record.pre_submit_cache.clone(),
            },
        );
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Display sink that records what it was told.
#[derive(Default)]
pub struct RecordingDisplay {
    warnings: Mutex<Vec<(String, String)>>,
    scores: Mutex<Vec<(String, f64)>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<(String, String)> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn scores(&self) -> Vec<(String, f64)> {
        self.scores.lock().unwrap().clone()
    }
}

impl DisplaySink for RecordingDisplay {
    fn warning(&self, path: &str, text: &str) {
        self.warnings
            .lock()
            .unwrap()
            .push((path.to_string(), text.to_string()));
    }

    fn score_changed(&self, path: &str, score: f64, _marks: f64) {
        self.scores.lock().unwrap().push((path.to_string(), score));
    }
}
