//! Adaptive marking (error carried forward).
//!
//! A part can be marked a second time against a scope in which some question
//! variables are replaced by the student's answers to earlier parts, so a
//! student who got an earlier part wrong can still earn credit for working
//! correctly from their own value.

use std::sync::Arc;

use crate::credit::Credit;
use crate::error::MarkingError;
use crate::feedback::{FeedbackLedger, FinalizedResult};
use crate::model::{MarkingResult, PartProgram, ReplacementStrategy};
use crate::script::{MarkingParams, PendingTasks, PreSubmitCache, ScriptRun};
use crate::traits::{Bindings, Question, Scope};
use crate::value::Value;

/// Comment prepended when the replaced variables were used.
pub const ADAPTIVE_MARKING_COMMENT: &str =
    "This part was marked using your answers to previous parts.";

/// Suffix of the execution path used for the replacement pass.
pub const ADAPTIVE_PATH_SUFFIX: &str = "adaptive";

/// A marking run either finished or waiting on pre-submit tasks.
#[derive(Debug)]
pub enum MarkingOutcome {
    Ready(MarkingResult),
    Pending(PendingTasks),
}

impl MarkingOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, MarkingOutcome::Pending(_))
    }
}

/// Marks a part, trying variable replacements according to its strategy.
pub struct AdaptiveMarker<'a> {
    question: &'a dyn Question,
}

impl<'a> AdaptiveMarker<'a> {
    pub fn new(question: &'a dyn Question) -> Self {
        Self { question }
    }

    /// Mark `answer` for `program` along `execution_path`.
    pub fn mark(
        &self,
        program: &PartProgram,
        answer: &Value,
        execution_path: &str,
        cache: &PreSubmitCache,
    ) -> Result<MarkingOutcome, MarkingError> {
        let scope = self.question.scope();

        if program.replacements.is_empty() {
            return self.mark_against_scope(program, scope.as_ref(), answer, execution_path, cache);
        }

        let adaptive_path = format!("{execution_path}/{ADAPTIVE_PATH_SUFFIX}");
        match program.strategy {
            ReplacementStrategy::OriginalFirst => {
                let original = match self.mark_against_scope(
                    program,
                    scope.as_ref(),
                    answer,
                    execution_path,
                    cache,
                )? {
                    MarkingOutcome::Ready(result) => result,
                    pending => return Ok(pending),
                };
                if original.answered && original.credit() == Credit::ONE {
                    return Ok(MarkingOutcome::Ready(original));
                }
                Ok(self.try_replacement(program, answer, &adaptive_path, cache, original))
            }
            ReplacementStrategy::AlwaysReplace => {
                let failure = match self.replacement_scope(program) {
                    Ok(replaced) => match self.mark_against_scope(
                        program,
                        replaced.as_ref(),
                        answer,
                        &adaptive_path,
                        cache,
                    ) {
                        Ok(MarkingOutcome::Ready(result)) => {
                            return Ok(MarkingOutcome::Ready(used_replacements(result)));
                        }
                        Ok(pending) => return Ok(pending),
                        Err(e) => e,
                    },
                    Err(e) => e,
                };
                let mut original = match self.mark_against_scope(
                    program,
                    scope.as_ref(),
                    answer,
                    execution_path,
                    cache,
                )? {
                    MarkingOutcome::Ready(result) => result,
                    pending => return Ok(pending),
                };
                note_replacement_failure(&mut original, &failure);
                Ok(MarkingOutcome::Ready(original))
            }
        }
    }

    /// Original-first: mark against the replaced variables and keep that
    /// result only if it is valid and strictly better.
    fn try_replacement(
        &self,
        program: &PartProgram,
        answer: &Value,
        adaptive_path: &str,
        cache: &PreSubmitCache,
        mut original: MarkingResult,
    ) -> MarkingOutcome {
        let replaced = match self.replacement_scope(program) {
            Ok(scope) => scope,
            Err(e) => {
                note_replacement_failure(&mut original, &e);
                return MarkingOutcome::Ready(original);
            }
        };

        match self.mark_against_scope(program, replaced.as_ref(), answer, adaptive_path, cache) {
            Ok(MarkingOutcome::Ready(result)) => {
                if result.answered && result.credit() > original.credit() {
                    tracing::info!(
                        "part '{}' marked using answers to previous parts",
                        program.path
                    );
                    MarkingOutcome::Ready(used_replacements(result))
                } else {
                    MarkingOutcome::Ready(original)
                }
            }
            Ok(pending) => pending,
            Err(e) => {
                note_replacement_failure(&mut original, &e);
                MarkingOutcome::Ready(original)
            }
        }
    }

    /// The question scope with every rule's variable replaced by the
    /// interpreted answer to its source part.
    ///
    /// Unanswered sources are skipped, unless the rule says the source must
    /// be answered first.
    pub fn replacement_scope(&self, program: &PartProgram) -> Result<Arc<dyn Scope>, MarkingError> {
        let mut bindings = Bindings::new();
        for rule in &program.replacements {
            let source = self
                .question
                .get_part(&rule.source_part_path)
                .ok_or_else(|| MarkingError::PartNotFound(rule.source_part_path.clone()))?;
            match source.interpreted_answer {
                Some(value) if source.answered => {
                    bindings.insert(rule.variable.clone(), value);
                }
                _ if rule.must_go_first => {
                    return Err(MarkingError::SourcePartUnanswered {
                        part: rule.source_part_path.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(self.question.scope().with_additional_bindings(bindings))
    }

    /// Run the script against `scope` and replay its `mark` note.
    ///
    /// A `mark` note that fails to evaluate gives an invalid, zero-credit
    /// result with a warning; a script without a `mark` note is a fault.
    pub fn mark_against_scope(
        &self,
        program: &PartProgram,
        scope: &dyn Scope,
        answer: &Value,
        execution_path: &str,
        cache: &PreSubmitCache,
    ) -> Result<MarkingOutcome, MarkingError> {
        let params = MarkingParams::new(answer.clone(), program.settings.clone(), program.marks);
        let outcome = match program.script.run(scope, &params, execution_path, cache) {
            ScriptRun::Complete(outcome) => outcome,
            ScriptRun::Pending(pending) => return Ok(MarkingOutcome::Pending(pending)),
        };

        let mark = outcome
            .get("mark")
            .ok_or_else(|| MarkingError::MissingNote("mark".into()))?;

        let ops = match &mark.error {
            Some(e) => Err(e.clone()),
            None => mark.value.feedback_ops(),
        };

        let mut result = match ops {
            Ok(ops) => {
                let finalized = FeedbackLedger::new(program.marks).replay(&ops)?;
                MarkingResult::from_finalized(execution_path, finalized)
            }
            Err(e) => {
                let mut result =
                    MarkingResult::from_finalized(execution_path, FinalizedResult::invalid());
                result
                    .warnings
                    .push(format!("There was an error marking this part: {e}"));
                result
            }
        };

        for (name, error) in outcome.errors() {
            result.diagnostics.push(format!("note '{name}': {error}"));
        }
        result.interpreted_answer = outcome
            .get("interpreted_answer")
            .filter(|n| n.error.is_none())
            .map(|n| n.value.clone());
        result.note_values = outcome.values();
        Ok(MarkingOutcome::Ready(result))
    }
}

fn used_replacements(mut result: MarkingResult) -> MarkingResult {
    result.adaptive_marking_used = true;
    result.prepend_comment(ADAPTIVE_MARKING_COMMENT);
    result
}

fn note_replacement_failure(result: &mut MarkingResult, error: &MarkingError) {
    match error {
        MarkingError::SourcePartUnanswered { .. } => result.add_comment(error.to_string()),
        other => {
            tracing::warn!(
                "marking '{}' with replaced variables failed: {other}",
                result.execution_path
            );
            result
                .warnings
                .push(format!("Marking with your answers to previous parts failed: {other}"));
        }
    }
}
