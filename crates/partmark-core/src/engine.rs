//! The part tree and its submission cycle.
//!
//! A [`Part`] is built once from a [`PartDefinition`] and a scope. Building
//! compiles every script and composes the part's `mark` and `score`
//! operations with any configured overrides. Submitting marks the staged
//! answer, waits for pre-submit tasks when needed, applies the result to the
//! part (and its gaps), scores it, and tells the question and display.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::adaptive::MarkingOutcome;
use crate::alternatives::{scale_ratio, AlternativeSelector};
use crate::credit::Credit;
use crate::error::MarkingError;
use crate::feedback::{FeedbackLedger, FeedbackOp};
use crate::model::{MarkingResult, PartDefinition, PartProgram, PartSettings};
use crate::overrides::{Handler, OverrideChain};
use crate::scorer::{PartScorer, ScoreBreakdown, ScoreInputs};
use crate::script::{PendingTasks, PreSubmitCache};
use crate::traits::{DisplaySink, PartSnapshot, Question, Scope, Storage, SubmissionRecord};
use crate::value::Value;

/// Input to a part's `mark` operation.
#[derive(Clone)]
pub struct MarkRequest {
    pub path: String,
    pub answer: Value,
    pub question: Arc<dyn Question>,
}

/// Output of a part's `mark` operation.
pub type MarkResponse = Result<MarkingOutcome, MarkingError>;

/// Override chains for one part.
#[derive(Default, Clone)]
pub struct PartOverrides {
    pub mark: OverrideChain<MarkRequest, MarkResponse>,
    pub score: OverrideChain<ScoreInputs, ScoreBreakdown>,
}

/// Override chains keyed by part path.
#[derive(Default, Clone)]
pub struct Overrides {
    parts: BTreeMap<String, PartOverrides>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(mut self, path: &str, chain: OverrideChain<MarkRequest, MarkResponse>) -> Self {
        self.parts.entry(path.to_string()).or_default().mark = chain;
        self
    }

    pub fn score(mut self, path: &str, chain: OverrideChain<ScoreInputs, ScoreBreakdown>) -> Self {
        self.parts.entry(path.to_string()).or_default().score = chain;
        self
    }
}

/// Mutable state of a part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartState {
    pub credit: Credit,
    pub score: f64,
    pub answered: bool,
    pub staged_answer: Option<Value>,
    pub interpreted_answer: Option<Value>,
    pub steps_shown: bool,
    pub revealed: bool,
    /// Marking is suspended on pre-submit tasks.
    pub waiting: bool,
}

/// What one synchronous submission attempt did.
#[derive(Debug)]
pub enum SubmitStatus {
    /// Marked and applied.
    Done,
    /// Settle these tasks, then submit again.
    Waiting(PendingTasks),
}

/// A gradable part of a question.
pub struct Part {
    path: String,
    marks: f64,
    settings: PartSettings,
    is_gap: bool,
    cache: PreSubmitCache,
    mark_handler: Handler<MarkRequest, MarkResponse>,
    score_handler: Handler<ScoreInputs, ScoreBreakdown>,
    steps: Vec<Part>,
    gaps: Vec<Part>,
    state: PartState,
    last_result: Option<MarkingResult>,
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("path", &self.path)
            .field("marks", &self.marks)
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("gaps", &self.gaps)
            .finish_non_exhaustive()
    }
}

impl Part {
    pub fn new(definition: &PartDefinition, scope: &dyn Scope) -> Result<Self, MarkingError> {
        Self::with_overrides(definition, scope, &Overrides::default())
    }

    pub fn with_overrides(
        definition: &PartDefinition,
        scope: &dyn Scope,
        overrides: &Overrides,
    ) -> Result<Self, MarkingError> {
        Self::build(definition, scope, overrides, false)
    }

    fn build(
        definition: &PartDefinition,
        scope: &dyn Scope,
        overrides: &Overrides,
        is_gap: bool,
    ) -> Result<Self, MarkingError> {
        let steps = definition
            .steps
            .iter()
            .map(|d| Self::build(d, scope, overrides, false))
            .collect::<Result<Vec<_>, _>>()?;
        let gaps = definition
            .gaps
            .iter()
            .map(|d| Self::build(d, scope, overrides, true))
            .collect::<Result<Vec<_>, _>>()?;
        let cache = PreSubmitCache::new();

        let base_mark: Handler<MarkRequest, MarkResponse> = if definition.is_gapfill() {
            let marks = definition.marks;
            let gap_handlers: Vec<GapHandler> = gaps
                .iter()
                .map(|g| GapHandler {
                    path: g.path.clone(),
                    marks: g.marks,
                    handler: Arc::clone(&g.mark_handler),
                })
                .collect();
            Arc::new(move |request: &MarkRequest| mark_gaps(request, marks, &gap_handlers))
        } else {
            let primary = PartProgram::compile(definition, scope)?;
            let alternatives = definition
                .alternatives
                .iter()
                .map(|d| PartProgram::compile(d, scope))
                .collect::<Result<Vec<_>, _>>()?;
            let cache = cache.clone();
            Arc::new(move |request: &MarkRequest| {
                AlternativeSelector::new(request.question.as_ref()).select(
                    &primary,
                    &alternatives,
                    &request.answer,
                    &cache,
                )
            })
        };
        let base_score: Handler<ScoreInputs, ScoreBreakdown> = Arc::new(PartScorer::score);

        let (mark_handler, score_handler) = match overrides.parts.get(&definition.path) {
            Some(o) => (o.mark.compose(base_mark), o.score.compose(base_score)),
            None => (base_mark, base_score),
        };

        Ok(Self {
            path: definition.path.clone(),
            marks: definition.marks,
            settings: definition.settings.clone(),
            is_gap,
            cache,
            mark_handler,
            score_handler,
            steps,
            gaps,
            state: PartState::default(),
            last_result: None,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn marks(&self) -> f64 {
        self.marks
    }

    pub fn state(&self) -> &PartState {
        &self.state
    }

    pub fn steps(&self) -> &[Part] {
        &self.steps
    }

    pub fn gaps(&self) -> &[Part] {
        &self.gaps
    }

    pub fn is_gap(&self) -> bool {
        self.is_gap
    }

    pub fn pre_submit_cache(&self) -> &PreSubmitCache {
        &self.cache
    }

    /// The result of the last marking, if any.
    pub fn last_result(&self) -> Option<&MarkingResult> {
        self.last_result.as_ref()
    }

    pub fn snapshot(&self) -> PartSnapshot {
        PartSnapshot {
            path: self.path.clone(),
            answered: self.state.answered,
            interpreted_answer: self.state.interpreted_answer.clone(),
            credit: self.state.credit,
            score: self.state.score,
        }
    }

    /// This part or a nested gap or step with the given path.
    pub fn find(&self, path: &str) -> Option<&Part> {
        if self.path == path {
            return Some(self);
        }
        self.gaps
            .iter()
            .chain(&self.steps)
            .find_map(|p| p.find(path))
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Part> {
        if self.path == path {
            return Some(self);
        }
        self.gaps
            .iter_mut()
            .chain(self.steps.iter_mut())
            .find_map(|p| p.find_mut(path))
    }

    // -----------------------------------------------------------------------
    // Student actions
    // -----------------------------------------------------------------------

    pub fn stage_answer(&mut self, answer: impl Into<Value>) {
        self.state.staged_answer = Some(answer.into());
    }

    /// Show the steps. Rescores if the part has been marked.
    pub fn show_steps(&mut self) {
        self.state.steps_shown = true;
        self.rescore(None);
    }

    /// Reveal the answer to this part, its gaps and its steps. The score
    /// becomes zero.
    pub fn reveal(&mut self) {
        self.state.revealed = true;
        for child in self.gaps.iter_mut().chain(self.steps.iter_mut()) {
            child.reveal();
        }
        self.rescore(None);
    }

    /// The answer that would be submitted now, if there is one.
    pub fn current_answer(&self) -> Option<Value> {
        if !self.gaps.is_empty() {
            let answers: Vec<Value> = self
                .gaps
                .iter()
                .map(|g| g.current_answer().unwrap_or_default())
                .collect();
            return answers
                .iter()
                .any(|a| !a.is_nothing())
                .then_some(Value::List(answers));
        }
        match &self.state.staged_answer {
            None | Some(Value::Nothing) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(answer) => Some(answer.clone()),
        }
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Mark the current answer once.
    ///
    /// Any marking fault is caught here: the part ends up with zero credit,
    /// not answered, and the fault recorded as a diagnostic.
    pub fn submit_once(
        &mut self,
        question: &Arc<dyn Question>,
        display: &dyn DisplaySink,
    ) -> SubmitStatus {
        let Some(answer) = self.current_answer() else {
            self.state.waiting = false;
            self.apply_result(MarkingResult::unanswered(&self.path), None, question, display);
            return SubmitStatus::Done;
        };

        let request = MarkRequest {
            path: self.path.clone(),
            answer,
            question: Arc::clone(question),
        };
        let result = match (self.mark_handler)(&request) {
            Ok(MarkingOutcome::Ready(result)) => result,
            Ok(MarkingOutcome::Pending(tasks)) => {
                self.state.waiting = true;
                return SubmitStatus::Waiting(tasks);
            }
            Err(e) => caught_fault(&self.path, &e),
        };
        self.state.waiting = false;
        self.apply_result(result, None, question, display);
        SubmitStatus::Done
    }

    /// Submit, waiting for any pre-submit tasks, then record the submission.
    ///
    /// When the steps are shown, steps with staged answers are submitted
    /// first so their scores count. A storage failure is logged and does not
    /// change the outcome.
    pub async fn submit(
        &mut self,
        question: &Arc<dyn Question>,
        display: &dyn DisplaySink,
        storage: &dyn Storage,
    ) -> MarkingResult {
        if self.state.steps_shown {
            for step in &mut self.steps {
                if step.current_answer().is_some() {
                    step.submit_until_done(question, display).await;
                }
            }
        }
        self.submit_until_done(question, display).await;

        let record = SubmissionRecord {
            path: self.path.clone(),
            answer: self.current_answer(),
            answered: self.state.answered,
            credit: self.state.credit,
            score: self.state.score,
            pre_submit_cache: self.cache.entries(),
        };
        if let Err(e) = storage.record_answer_submitted(&record).await {
            tracing::warn!("failed to record submission for part '{}': {e:#}", self.path);
        }

        self.last_result
            .clone()
            .unwrap_or_else(|| MarkingResult::unanswered(&self.path))
    }

    async fn submit_until_done(&mut self, question: &Arc<dyn Question>, display: &dyn DisplaySink) {
        loop {
            match self.submit_once(question, display) {
                SubmitStatus::Done => return,
                SubmitStatus::Waiting(tasks) => {
                    tracing::debug!("part '{}' waiting on pre-submit tasks {}", self.path, tasks.id());
                    if let Err(e) = tasks.settle().await {
                        self.state.waiting = false;
                        let result = caught_fault(&self.path, &e);
                        self.apply_result(result, None, question, display);
                        return;
                    }
                }
            }
        }
    }

    /// Restore saved state for this part and everything under it.
    pub fn resume<'a>(&'a mut self, storage: &'a dyn Storage) -> BoxFuture<'a, ()> {
        async move {
            match storage.load_part_state(&self.path).await {
                Ok(Some(saved)) => {
                    self.state.answered = saved.answered;
                    if self.gaps.is_empty() {
                        self.state.staged_answer = saved.staged_answer;
                    }
                    self.cache.restore(saved.pre_submit_cache);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("could not load saved state for part '{}': {e:#}", self.path),
            }
            for child in self.gaps.iter_mut().chain(self.steps.iter_mut()) {
                child.resume(storage).await;
            }
        }
        .boxed()
    }

    // -----------------------------------------------------------------------
    // Applying results
    // -----------------------------------------------------------------------

    /// `inherited_steps_penalty` is set for a gap whose parent shows its steps.
    fn apply_result(
        &mut self,
        mut result: MarkingResult,
        inherited_steps_penalty: Option<f64>,
        question: &Arc<dyn Question>,
        display: &dyn DisplaySink,
    ) {
        self.state.answered = result.answered;
        self.state.credit = if result.answered || !self.gaps.is_empty() {
            result.credit()
        } else {
            Credit::ZERO
        };
        self.state.interpreted_answer = result.interpreted_answer.clone();
        for warning in &result.warnings {
            display.warning(&self.path, warning);
        }

        let gap_results = std::mem::take(&mut result.gap_results);
        let parent_penalty = self.state.steps_shown.then_some(self.settings.steps_penalty);
        let parent_marks = self.marks;
        for (gap, gap_result) in self.gaps.iter_mut().zip(gap_results.iter().cloned()) {
            let share = parent_penalty
                .map(|p| PartScorer::gap_steps_penalty(p, gap.marks, parent_marks));
            gap.apply_result(gap_result, share, question, display);
        }
        result.gap_results = gap_results;

        let breakdown = self.compute_score(&result, inherited_steps_penalty);
        for comment in &breakdown.comments {
            result.add_comment(comment.clone());
        }
        if !self.is_gap && result.answered {
            result.add_comment(PartScorer::total_comment(breakdown.score));
        }

        self.last_result = Some(result);
        display.score_changed(&self.path, self.state.score, self.marks);
        question.notify_score_changed(&self.path);
    }

    fn compute_score(
        &mut self,
        result: &MarkingResult,
        inherited_steps_penalty: Option<f64>,
    ) -> ScoreBreakdown {
        let inputs = ScoreInputs {
            marks: self.marks,
            credit: self.state.credit,
            adaptive_marking_used: result.adaptive_marking_used,
            adaptive_penalty: self.settings.adaptive_penalty,
            steps_shown: self.state.steps_shown || inherited_steps_penalty.is_some(),
            steps_penalty: inherited_steps_penalty.unwrap_or(self.settings.steps_penalty),
            step_scores: self.steps.iter().map(|s| s.state.score).collect(),
            revealed: self.state.revealed,
            min_marks: self.settings.min_marks,
            max_marks: self.settings.max_marks,
        };
        let breakdown = (self.score_handler)(&inputs);
        self.state.score = breakdown.score;
        breakdown
    }

    /// Recompute the score from the last result after steps or reveal change.
    fn rescore(&mut self, inherited_steps_penalty: Option<f64>) {
        let Some(result) = self.last_result.take() else {
            if self.state.revealed {
                self.state.score = 0.0;
            }
            return;
        };
        self.compute_score(&result, inherited_steps_penalty);
        self.last_result = Some(result);
    }
}

/// Log a fault caught while marking `path` and turn it into a zero-credit
/// result.
fn caught_fault(path: &str, error: &MarkingError) -> MarkingResult {
    if error.is_programming_error() {
        tracing::error!("marking part '{path}' failed: {error}");
    } else {
        tracing::warn!("marking part '{path}' was interrupted: {error}");
    }
    MarkingResult::failed(path, error)
}

struct GapHandler {
    path: String,
    marks: f64,
    handler: Handler<MarkRequest, MarkResponse>,
}

/// Mark every gap and fold their feedback into the gap-fill part's ledger,
/// each gap inside a lift worth its share of the part's marks.
fn mark_gaps(request: &MarkRequest, marks: f64, gaps: &[GapHandler]) -> MarkResponse {
    let answers = request.answer.as_list().unwrap_or_default();
    let mut results = Vec::with_capacity(gaps.len());
    let mut pending = Vec::new();

    for (i, gap) in gaps.iter().enumerate() {
        let answer = answers.get(i).cloned().unwrap_or_default();
        if answer.is_nothing() {
            results.push(MarkingResult::unanswered(&gap.path));
            continue;
        }
        let gap_request = MarkRequest {
            path: gap.path.clone(),
            answer,
            question: Arc::clone(&request.question),
        };
        match (gap.handler)(&gap_request) {
            Ok(MarkingOutcome::Ready(result)) => results.push(result),
            Ok(MarkingOutcome::Pending(tasks)) => pending.push(tasks),
            Err(e) => results.push(caught_fault(&gap.path, &e)),
        }
    }

    if !pending.is_empty() {
        return Ok(MarkingOutcome::Pending(PendingTasks::combine(pending)));
    }

    let mut ops = Vec::new();
    for (i, (gap, result)) in gaps.iter().zip(&results).enumerate() {
        if gaps.len() > 1 {
            ops.push(FeedbackOp::feedback(&format!("Gap {}", i + 1)));
        }
        let scale = if marks == 0.0 {
            Credit::ZERO
        } else {
            scale_ratio(gap.marks, marks)
        };
        // An invalid gap earns nothing; only its comments carry over.
        let gap_ops = result
            .finalized
            .ops
            .iter()
            .filter(|op| result.finalized.valid || matches!(op, FeedbackOp::Feedback { .. }))
            .cloned();
        ops.extend(FeedbackOp::concat(gap_ops, scale));
    }

    let finalized = FeedbackLedger::new(marks).replay(&ops)?;
    let mut result = MarkingResult::from_finalized(&request.path, finalized);
    result.answered = results.iter().all(|r| r.answered);
    // Each gap's interpreted answer, or its raw answer if it has none.
    result.interpreted_answer = Some(Value::List(
        results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.interpreted_answer
                    .clone()
                    .unwrap_or_else(|| answers.get(i).cloned().unwrap_or_default())
            })
            .collect(),
    ));
    result.diagnostics = results
        .iter()
        .flat_map(|r| r.diagnostics.iter().cloned())
        .collect();
    result.gap_results = results;
    Ok(MarkingOutcome::Ready(result))
}
