//! Marking scripts: parsing, compilation and evaluation.
//!
//! A script is a set of named notes, written as
//!
//! ```text
//! interpreted_answer (The student's answer, parsed):
//!   parse(studentAnswer)
//!
//! mark:
//!   compare(interpreted_answer, settings.answer)
//! ```
//!
//! with notes separated by blank lines. [`ScriptRunner`] compiles a script
//! against a [`Scope`] once, orders the notes by dependency, and then runs
//! them for each answer. A note that fails is recorded as failed; notes that
//! depend on it are skipped, and the rest still run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use uuid::Uuid;

use crate::error::{EvalError, MarkingError};
use crate::feedback::FeedbackOp;
use crate::traits::{Bindings, CachedPreSubmit, Scope, Tree};
use crate::value::Value;

/// Name of the note whose value is computed before marking, possibly
/// asynchronously.
pub const PRE_SUBMIT_NOTE: &str = "pre_submit";

// ---------------------------------------------------------------------------
// Source form
// ---------------------------------------------------------------------------

/// A single note as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkingNote {
    pub name: String,
    pub description: Option<String>,
    pub expr: String,
}

impl MarkingNote {
    pub fn new(name: &str, expr: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            description: None,
            expr: expr.to_string(),
        }
    }

    fn parse(text: &str) -> Result<Self, MarkingError> {
        let text = text.trim();
        let name_end = text
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(text.len());
        let name = &text[..name_end];
        let first_line = text.lines().next().unwrap_or_default();
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(MarkingError::InvalidNote(format!(
                "'{first_line}' does not start with a note name"
            )));
        }

        let rest = text[name_end..].trim_start();
        let (description, rest) = match rest.strip_prefix('(') {
            Some(inner) => {
                let close = inner.find(')').ok_or_else(|| {
                    MarkingError::InvalidNote(format!(
                        "note '{name}': missing closing bracket after the description"
                    ))
                })?;
                (
                    Some(inner[..close].trim().to_string()),
                    inner[close + 1..].trim_start(),
                )
            }
            None => (None, rest),
        };

        let expr = rest
            .strip_prefix(':')
            .ok_or_else(|| {
                MarkingError::InvalidNote(format!("note '{name}': missing colon after the name"))
            })?
            .trim();
        if expr.is_empty() {
            return Err(MarkingError::InvalidNote(format!(
                "note '{name}' has no definition"
            )));
        }

        Ok(Self {
            name: name.to_lowercase(),
            description,
            expr: expr.to_string(),
        })
    }
}

/// A parsed, not yet compiled, marking script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkingScript {
    notes: Vec<MarkingNote>,
}

impl MarkingScript {
    pub fn new(notes: Vec<MarkingNote>) -> Result<Self, MarkingError> {
        let mut seen = BTreeSet::new();
        for note in &notes {
            if !seen.insert(note.name.as_str()) {
                return Err(MarkingError::InvalidNote(format!(
                    "note '{}' is defined more than once",
                    note.name
                )));
            }
        }
        Ok(Self { notes })
    }

    /// Parse notes separated by blank lines.
    pub fn parse(source: &str) -> Result<Self, MarkingError> {
        let mut notes = Vec::new();
        let mut block: Vec<&str> = Vec::new();
        for line in source.lines().chain(std::iter::once("")) {
            if line.trim().is_empty() {
                if !block.is_empty() {
                    notes.push(MarkingNote::parse(&block.join("\n"))?);
                    block.clear();
                }
            } else {
                block.push(line);
            }
        }
        Self::new(notes)
    }

    /// Merge a base script under this one. A base note that this script
    /// redefines stays available as `base_<name>`.
    pub fn extend(&self, base: &MarkingScript) -> MarkingScript {
        let mut notes = Vec::with_capacity(base.notes.len() + self.notes.len());
        for note in &base.notes {
            if self.get(&note.name).is_some() {
                let renamed = format!("base_{}", note.name);
                if self.get(&renamed).is_none() {
                    notes.push(MarkingNote {
                        name: renamed,
                        ..note.clone()
                    });
                }
            } else {
                notes.push(note.clone());
            }
        }
        notes.extend(self.notes.iter().cloned());
        MarkingScript { notes }
    }

    pub fn notes(&self) -> &[MarkingNote] {
        &self.notes
    }

    pub fn get(&self, name: &str) -> Option<&MarkingNote> {
        let name = name.to_lowercase();
        self.notes.iter().find(|n| n.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parameters and results
// ---------------------------------------------------------------------------

/// The explicit inputs every note can read.
#[derive(Debug, Clone)]
pub struct MarkingParams {
    pub student_answer: Value,
    pub settings: Value,
    pub marks: f64,
}

impl MarkingParams {
    pub fn new(student_answer: Value, settings: Value, marks: f64) -> Self {
        Self {
            student_answer,
            settings,
            marks,
        }
    }

    pub fn bindings(&self) -> Bindings {
        Bindings::from([
            ("studentAnswer".to_string(), self.student_answer.clone()),
            ("settings".to_string(), self.settings.clone()),
            ("marks".to_string(), Value::Number(self.marks)),
        ])
    }
}

/// The outcome of evaluating one note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteResult {
    pub name: String,
    pub value: Value,
    /// False if the note errored or its feedback ends with an invalid `end`.
    pub is_valid: bool,
    pub error: Option<EvalError>,
    pub feedback: Vec<FeedbackOp>,
}

impl NoteResult {
    fn evaluated(name: &str, value: Value) -> Self {
        let feedback = value.feedback_ops().unwrap_or_default();
        let is_valid = !feedback.iter().any(FeedbackOp::is_invalid_end);
        Self {
            name: name.to_string(),
            value,
            is_valid,
            error: None,
            feedback,
        }
    }

    fn failed(name: &str, error: EvalError) -> Self {
        Self {
            name: name.to_string(),
            value: Value::Nothing,
            is_valid: false,
            error: Some(error),
            feedback: Vec::new(),
        }
    }
}

/// Every note's result from one run, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutcome {
    order: Vec<String>,
    results: BTreeMap<String, NoteResult>,
}

impl ScriptOutcome {
    fn push(&mut self, result: NoteResult) {
        self.order.push(result.name.clone());
        self.results.insert(result.name.clone(), result);
    }

    pub fn get(&self, name: &str) -> Option<&NoteResult> {
        self.results.get(name)
    }

    /// Results in the order they were evaluated.
    pub fn iter(&self) -> impl Iterator<Item = &NoteResult> {
        self.order.iter().filter_map(|n| self.results.get(n))
    }

    /// Values of every note that evaluated without error.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.results
            .iter()
            .filter(|(_, r)| r.error.is_none())
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }

    /// Notes that failed, with their errors.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &EvalError)> {
        self.iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r.name.as_str(), e)))
    }
}

/// Either a finished run or the tasks it is waiting on.
#[derive(Debug)]
pub enum ScriptRun {
    Complete(ScriptOutcome),
    Pending(PendingTasks),
}

// ---------------------------------------------------------------------------
// Pre-submit cache
// ---------------------------------------------------------------------------

/// Resolved `pre_submit` values keyed by execution path and answer.
///
/// Append-only; the first value stored for a key is kept. Clones share the
/// same entries.
#[derive(Debug, Clone, Default)]
pub struct PreSubmitCache {
    entries: Arc<Mutex<Vec<CachedPreSubmit>>>,
}

impl PreSubmitCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CachedPreSubmit>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, execution_path: &str, answer: &Value) -> Option<Value> {
        self.lock()
            .iter()
            .find(|e| e.execution_path == execution_path && &e.answer == answer)
            .map(|e| e.results.clone())
    }

    pub fn insert(&self, execution_path: &str, answer: &Value, results: Value) {
        let mut entries = self.lock();
        let exists = entries
            .iter()
            .any(|e| e.execution_path == execution_path && &e.answer == answer);
        if !exists {
            entries.push(CachedPreSubmit {
                execution_path: execution_path.to_string(),
                answer: answer.clone(),
                results,
            });
        }
    }

    /// Add saved entries, skipping keys that are already present.
    pub fn restore(&self, saved: impl IntoIterator<Item = CachedPreSubmit>) {
        for entry in saved {
            self.insert(&entry.execution_path, &entry.answer, entry.results);
        }
    }

    pub fn entries(&self) -> Vec<CachedPreSubmit> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pending tasks
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingBatch {
    cache: PreSubmitCache,
    execution_path: String,
    answer: Value,
    value: Value,
}

impl PendingBatch {
    async fn settle(self) -> Result<(), MarkingError> {
        let tasks = self.value.deferred_tasks();
        let outputs = join_all(tasks.iter().map(|d| d.task())).await;
        let mut resolved = HashMap::with_capacity(tasks.len());
        for (task, output) in tasks.iter().zip(outputs) {
            resolved.insert(task.id(), output.map_err(MarkingError::PreSubmit)?);
        }
        let value = self.value.resolve_deferred(&resolved);
        tracing::debug!(
            path = %self.execution_path,
            tasks = tasks.len(),
            "settled pre-submit tasks"
        );
        self.cache.insert(&self.execution_path, &self.answer, value);
        Ok(())
    }
}

/// Asynchronous `pre_submit` work that must finish before marking can.
///
/// Settling stores the resolved values in the pre-submit cache; marking is
/// then re-run and finds them there.
#[derive(Debug)]
pub struct PendingTasks {
    id: Uuid,
    batches: Vec<PendingBatch>,
}

impl PendingTasks {
    fn new(cache: PreSubmitCache, execution_path: &str, answer: &Value, value: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            batches: vec![PendingBatch {
                cache,
                execution_path: execution_path.to_string(),
                answer: answer.clone(),
                value,
            }],
        }
    }

    /// Merge several pending sets so they can be awaited together.
    pub fn combine(pending: impl IntoIterator<Item = PendingTasks>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batches: pending.into_iter().flat_map(|p| p.batches).collect(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Execution paths waiting on tasks.
    pub fn execution_paths(&self) -> Vec<&str> {
        self.batches
            .iter()
            .map(|b| b.execution_path.as_str())
            .collect()
    }

    /// Await every task and cache the results.
    pub async fn settle(self) -> Result<(), MarkingError> {
        join_all(self.batches.into_iter().map(PendingBatch::settle))
            .await
            .into_iter()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledNote {
    name: String,
    tree: Tree,
    dependencies: Vec<String>,
    uses_pre_submit: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

/// A marking script compiled against a scope, ready to run.
#[derive(Debug)]
pub struct ScriptRunner {
    notes: Vec<CompiledNote>,
    order: Vec<usize>,
    pre_submit: Option<usize>,
    pre_submit_order: Vec<usize>,
}

impl ScriptRunner {
    /// Compile every note and fix the evaluation order.
    pub fn compile(script: &MarkingScript, scope: &dyn Scope) -> Result<Self, MarkingError> {
        let index_of: BTreeMap<&str, usize> = script
            .notes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect();

        let mut notes = Vec::with_capacity(script.notes.len());
        for note in &script.notes {
            let tree = scope
                .compile(&note.expr)
                .map_err(|source| MarkingError::NoteCompile {
                    name: note.name.clone(),
                    source,
                })?;
            let free: BTreeSet<String> = scope
                .find_free_variables(&tree)
                .into_iter()
                .map(|v| v.to_lowercase())
                .collect();
            let dependencies = free
                .iter()
                .filter(|v| v.as_str() != PRE_SUBMIT_NOTE && index_of.contains_key(v.as_str()))
                .cloned()
                .collect();
            notes.push(CompiledNote {
                name: note.name.clone(),
                tree,
                dependencies,
                uses_pre_submit: free.contains(PRE_SUBMIT_NOTE),
            });
        }

        let mut state = vec![Visit::Unvisited; notes.len()];
        let mut order = Vec::with_capacity(notes.len());
        let mut stack = Vec::new();
        for i in 0..notes.len() {
            visit(i, &notes, &index_of, &mut state, &mut order, &mut stack)?;
        }

        let pre_submit = index_of.get(PRE_SUBMIT_NOTE).copied();
        let pre_submit_order = match pre_submit {
            Some(idx) => {
                let mut needed = BTreeSet::new();
                collect_dependencies(idx, &notes, &index_of, &mut needed);
                order
                    .iter()
                    .copied()
                    .filter(|i| needed.contains(i))
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(Self {
            notes,
            order,
            pre_submit,
            pre_submit_order,
        })
    }

    pub fn has_note(&self, name: &str) -> bool {
        self.notes.iter().any(|n| n.name == name)
    }

    /// Note names in evaluation order.
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.notes[i].name.as_str())
            .collect()
    }

    /// Run the script for one answer.
    ///
    /// If the script has a `pre_submit` note and nothing is cached for this
    /// `execution_path` and answer, the note is evaluated first. Should its
    /// value contain deferred tasks, the run stops and returns them.
    pub fn run(
        &self,
        scope: &dyn Scope,
        params: &MarkingParams,
        execution_path: &str,
        cache: &PreSubmitCache,
    ) -> ScriptRun {
        let base = params.bindings();
        let mut outcome = ScriptOutcome::default();
        let mut bindings = base.clone();

        if let Some(idx) = self.pre_submit {
            let name = self.notes[idx].name.as_str();
            let result = match cache.lookup(execution_path, &params.student_answer) {
                Some(cached) => NoteResult::evaluated(name, cached),
                None => {
                    let mut inputs = ScriptOutcome::default();
                    let mut pre_bindings = base;
                    for &i in &self.pre_submit_order {
                        let r = self.evaluate_note(scope, i, &pre_bindings, &inputs);
                        if r.error.is_none() {
                            pre_bindings.insert(r.name.clone(), r.value.clone());
                        }
                        inputs.push(r);
                    }
                    let result = self.evaluate_note(scope, idx, &pre_bindings, &inputs);
                    if result.error.is_none() {
                        if result.value.deferred_tasks().is_empty() {
                            cache.insert(execution_path, &params.student_answer, result.value.clone());
                        } else {
                            tracing::debug!(path = execution_path, "marking waits on pre-submit tasks");
                            return ScriptRun::Pending(PendingTasks::new(
                                cache.clone(),
                                execution_path,
                                &params.student_answer,
                                result.value,
                            ));
                        }
                    }
                    result
                }
            };
            if result.error.is_none() {
                bindings.insert(PRE_SUBMIT_NOTE.to_string(), result.value.clone());
            }
            outcome.push(result);
        }

        for &i in &self.order {
            if Some(i) == self.pre_submit {
                continue;
            }
            let result = self.evaluate_note(scope, i, &bindings, &outcome);
            if result.error.is_none() {
                bindings.insert(result.name.clone(), result.value.clone());
            }
            outcome.push(result);
        }

        ScriptRun::Complete(outcome)
    }

    fn evaluate_note(
        &self,
        scope: &dyn Scope,
        idx: usize,
        bindings: &Bindings,
        done: &ScriptOutcome,
    ) -> NoteResult {
        let note = &self.notes[idx];
        let failed_dependency = note
            .dependencies
            .iter()
            .map(String::as_str)
            .chain(note.uses_pre_submit.then_some(PRE_SUBMIT_NOTE))
            .find(|d| done.get(d).is_some_and(|r| r.error.is_some()));
        if let Some(dependency) = failed_dependency {
            return NoteResult::failed(
                &note.name,
                EvalError::DependencyFailed {
                    note: note.name.clone(),
                    dependency: dependency.to_string(),
                },
            );
        }

        match scope.evaluate(&note.tree, bindings) {
            Ok(value) => {
                tracing::debug!(note = %note.name, "evaluated note");
                NoteResult::evaluated(&note.name, value)
            }
            Err(e) => {
                tracing::debug!(note = %note.name, "note failed: {e}");
                NoteResult::failed(&note.name, e)
            }
        }
    }
}

fn visit(
    idx: usize,
    notes: &[CompiledNote],
    index_of: &BTreeMap<&str, usize>,
    state: &mut [Visit],
    order: &mut Vec<usize>,
    stack: &mut Vec<usize>,
) -> Result<(), MarkingError> {
    match state[idx] {
        Visit::Done => return Ok(()),
        Visit::InProgress => {
            let start = stack.iter().position(|&s| s == idx).unwrap_or(0);
            let cycle = stack[start..]
                .iter()
                .chain(std::iter::once(&idx))
                .map(|&s| notes[s].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(MarkingError::CircularNotes(cycle));
        }
        Visit::Unvisited => {}
    }
    state[idx] = Visit::InProgress;
    stack.push(idx);
    for dep in &notes[idx].dependencies {
        if let Some(&d) = index_of.get(dep.as_str()) {
            visit(d, notes, index_of, state, order, stack)?;
        }
    }
    stack.pop();
    state[idx] = Visit::Done;
    order.push(idx);
    Ok(())
}

fn collect_dependencies(
    idx: usize,
    notes: &[CompiledNote],
    index_of: &BTreeMap<&str, usize>,
    needed: &mut BTreeSet<usize>,
) {
    for dep in &notes[idx].dependencies {
        if let Some(&d) = index_of.get(dep.as_str()) {
            if needed.insert(d) {
                collect_dependencies(d, notes, index_of, needed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::Credit;
    use crate::mock::MockScope;
    use crate::value::Deferred;

    const SCRIPT: &str = "\
interpreted_answer (The student's answer):
  studentAnswer

mark:
  check(interpreted_answer)
";

    fn scope() -> MockScope {
        MockScope::new().define("check(interpreted_answer)", &["interpreted_answer"], |b| {
            let ok = b.get("interpreted_answer") == Some(&Value::from("x+2"));
            Ok(if ok {
                vec![FeedbackOp::correct("Your answer is correct.")].into()
            } else {
                vec![FeedbackOp::incorrect("Your answer is incorrect.")].into()
            })
        })
    }

    fn params(answer: &str) -> MarkingParams {
        MarkingParams::new(Value::from(answer), Value::Dict(BTreeMap::new()), 1.0)
    }

    fn complete(run: ScriptRun) -> ScriptOutcome {
        match run {
            ScriptRun::Complete(outcome) => outcome,
            ScriptRun::Pending(_) => panic!("expected a complete run"),
        }
    }

    #[test]
    fn test_parse_notes() {
        let script = MarkingScript::parse(SCRIPT).unwrap();
        assert_eq!(script.notes().len(), 2);
        let first = &script.notes()[0];
        assert_eq!(first.name, "interpreted_answer");
        assert_eq!(first.description.as_deref(), Some("The student's answer"));
        assert_eq!(first.expr, "studentAnswer");
        assert_eq!(script.get("MARK").unwrap().expr, "check(interpreted_answer)");
    }

    #[test]
    fn test_parse_multiline_expression() {
        let script = MarkingScript::parse("mark:\n  a\n  + b\n").unwrap();
        assert_eq!(script.notes()[0].expr, "a\n  + b");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            MarkingScript::parse("mark check()"),
            Err(MarkingError::InvalidNote(_))
        ));
        assert!(matches!(
            MarkingScript::parse("mark (unclosed: x"),
            Err(MarkingError::InvalidNote(_))
        ));
        assert!(matches!(
            MarkingScript::parse("mark:"),
            Err(MarkingError::InvalidNote(_))
        ));
        assert!(matches!(
            MarkingScript::parse("1abc: x"),
            Err(MarkingError::InvalidNote(_))
        ));
        assert!(matches!(
            MarkingScript::parse("a: 1\n\nA: 2"),
            Err(MarkingError::InvalidNote(_))
        ));
    }

    #[test]
    fn test_extend_renames_overridden_base_notes() {
        let base = MarkingScript::parse("mark: base_check\n\nhelper: 1").unwrap();
        let own = MarkingScript::parse("mark: base_mark").unwrap();
        let merged = own.extend(&base);
        let names: Vec<_> = merged.notes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["base_mark", "helper", "mark"]);
    }

    #[test]
    fn test_run_in_dependency_order() {
        let script = MarkingScript::parse("mark:\n  check(interpreted_answer)\n\ninterpreted_answer:\n  studentAnswer").unwrap();
        let runner = ScriptRunner::compile(&script, &scope()).unwrap();
        assert_eq!(runner.evaluation_order(), vec!["interpreted_answer", "mark"]);

        let outcome = complete(runner.run(&scope(), &params("x+2"), "p0", &PreSubmitCache::new()));
        let mark = outcome.get("mark").unwrap();
        assert!(mark.is_valid);
        assert_eq!(mark.feedback, vec![FeedbackOp::correct("Your answer is correct.")]);
    }

    #[test]
    fn test_cycle_detected() {
        let scope = MockScope::new()
            .define("b + 1", &["b"], |_| Ok(Value::Nothing))
            .define("a + 1", &["a"], |_| Ok(Value::Nothing));
        let script = MarkingScript::parse("a: b + 1\n\nb: a + 1").unwrap();
        let err = ScriptRunner::compile(&script, &scope).unwrap_err();
        match err {
            MarkingError::CircularNotes(cycle) => assert_eq!(cycle, "a -> b -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_expression_fails_compile() {
        let script = MarkingScript::parse("mark: nonsense(").unwrap();
        let err = ScriptRunner::compile(&script, &MockScope::new()).unwrap_err();
        assert!(matches!(err, MarkingError::NoteCompile { ref name, .. } if name == "mark"));
    }

    #[test]
    fn test_failed_note_skips_dependents_only() {
        let scope = MockScope::new()
            .define("explode()", &[], |_| Err(EvalError::Failed("boom".into())))
            .define("use(broken)", &["broken"], |_| Ok(Value::from(1.0)));
        let script =
            MarkingScript::parse("broken: explode()\n\ndependent: use(broken)\n\nother: 5").unwrap();
        let runner = ScriptRunner::compile(&script, &scope).unwrap();
        let outcome = complete(runner.run(&scope, &params(""), "p0", &PreSubmitCache::new()));

        assert_eq!(
            outcome.get("broken").unwrap().error,
            Some(EvalError::Failed("boom".into()))
        );
        assert!(matches!(
            outcome.get("dependent").unwrap().error,
            Some(EvalError::DependencyFailed { .. })
        ));
        assert_eq!(outcome.get("other").unwrap().value, Value::from(5.0));
        assert_eq!(outcome.errors().count(), 2);
    }

    #[test]
    fn test_invalid_end_marks_note_invalid() {
        let scope = MockScope::new().define("reject()", &[], |_| {
            Ok(vec![FeedbackOp::warning("Not a number."), FeedbackOp::invalid()].into())
        });
        let script = MarkingScript::parse("mark: reject()").unwrap();
        let runner = ScriptRunner::compile(&script, &scope).unwrap();
        let outcome = complete(runner.run(&scope, &params("abc"), "p0", &PreSubmitCache::new()));
        assert!(!outcome.get("mark").unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_pre_submit_waits_then_uses_cache() {
        let scope = MockScope::new()
            .define("remote_check(studentAnswer)", &["studentAnswer"], |b| {
                let answer = b.get("studentAnswer").cloned().unwrap_or_default();
                Ok(Value::List(vec![Value::Deferred(Deferred::new(async move {
                    Ok(Value::Bool(answer == Value::from("42")))
                }))]))
            })
            .define("grade(pre_submit)", &["pre_submit"], |b| {
                let passed = b.get("pre_submit") == Some(&Value::List(vec![Value::Bool(true)]));
                Ok(vec![FeedbackOp::set_credit(
                    if passed { Credit::ONE } else { Credit::ZERO },
                    None,
                    "",
                )]
                .into())
            });
        let script =
            MarkingScript::parse("pre_submit: remote_check(studentAnswer)\n\nmark: grade(pre_submit)")
                .unwrap();
        let runner = ScriptRunner::compile(&script, &scope).unwrap();
        let cache = PreSubmitCache::new();

        let pending = match runner.run(&scope, &params("42"), "p0", &cache) {
            ScriptRun::Pending(p) => p,
            ScriptRun::Complete(_) => panic!("expected pending tasks"),
        };
        assert_eq!(pending.execution_paths(), vec!["p0"]);
        pending.settle().await.unwrap();
        assert_eq!(cache.len(), 1);

        let outcome = complete(runner.run(&scope, &params("42"), "p0", &cache));
        assert_eq!(
            outcome.get("mark").unwrap().feedback,
            vec![FeedbackOp::set_credit(Credit::ONE, None, "")]
        );

        // A different execution path does not share the cached value.
        assert!(matches!(
            runner.run(&scope, &params("42"), "p0/adaptive", &cache),
            ScriptRun::Pending(_)
        ));
    }

    #[test]
    fn test_cache_is_append_only() {
        let cache = PreSubmitCache::new();
        let answer = Value::from("a");
        cache.insert("p0", &answer, Value::from(1.0));
        cache.insert("p0", &answer, Value::from(2.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("p0", &answer), Some(Value::from(1.0)));
        assert_eq!(cache.lookup("p0", &Value::from("b")), None);

        let shared = cache.clone();
        shared.insert("p1", &answer, Value::from(3.0));
        assert_eq!(cache.len(), 2);
    }
}
