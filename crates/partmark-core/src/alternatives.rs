//! Alternative answers.
//!
//! A part may list alternative answers, each with its own marking script and
//! mark value. Every alternative is marked alongside the part itself; the one
//! earning the most credit (scaled by its marks relative to the part's) wins,
//! and only if it beats the part's own credit.

use crate::adaptive::{AdaptiveMarker, MarkingOutcome};
use crate::credit::Credit;
use crate::error::MarkingError;
use crate::feedback::{FeedbackLedger, FeedbackOp};
use crate::model::{MarkingResult, PartProgram};
use crate::script::{PendingTasks, PreSubmitCache};
use crate::traits::Question;
use crate::value::Value;

/// Execution path of the `index`th alternative of the part at `path`.
pub fn alternative_path(path: &str, index: usize) -> String {
    format!("{path}/alternative-{index}")
}

/// Factor converting an alternative's credit into the primary part's credit.
///
/// A primary worth no marks takes alternative credit as it is.
pub fn scale_ratio(alternative_marks: f64, primary_marks: f64) -> Credit {
    if primary_marks == 0.0 {
        return Credit::ONE;
    }
    Credit::from_float(alternative_marks)
        .checked_div(Credit::from_float(primary_marks))
        .unwrap_or(Credit::ONE)
}

/// Picks between a part and its alternatives.
pub struct AlternativeSelector<'a> {
    marker: AdaptiveMarker<'a>,
}

impl<'a> AlternativeSelector<'a> {
    pub fn new(question: &'a dyn Question) -> Self {
        Self {
            marker: AdaptiveMarker::new(question),
        }
    }

    /// Mark `answer` against `primary` and every alternative.
    ///
    /// If any of them is waiting on pre-submit tasks, the tasks of all of
    /// them are returned together. An alternative that fails to mark is
    /// skipped; the primary failing is an error.
    pub fn select(
        &self,
        primary: &PartProgram,
        alternatives: &[PartProgram],
        answer: &Value,
        cache: &PreSubmitCache,
    ) -> Result<MarkingOutcome, MarkingError> {
        let mut pending = Vec::new();

        let primary_result = match self.marker.mark(primary, answer, &primary.path, cache)? {
            MarkingOutcome::Ready(result) => Some(result),
            MarkingOutcome::Pending(tasks) => {
                pending.push(tasks);
                None
            }
        };

        let mut candidates = Vec::with_capacity(alternatives.len());
        for (index, alternative) in alternatives.iter().enumerate() {
            let path = alternative_path(&primary.path, index);
            match self.marker.mark(alternative, answer, &path, cache) {
                Ok(MarkingOutcome::Ready(result)) => candidates.push((index, result)),
                Ok(MarkingOutcome::Pending(tasks)) => pending.push(tasks),
                Err(e) => {
                    tracing::warn!("alternative {index} of part '{}' failed to mark: {e}", primary.path);
                }
            }
        }

        let primary_result = match primary_result {
            Some(result) if pending.is_empty() => result,
            _ => return Ok(MarkingOutcome::Pending(PendingTasks::combine(pending))),
        };

        let mut best_credit = primary_result.credit();
        let mut best: Option<(usize, MarkingResult, Credit)> = None;
        for (index, result) in candidates {
            let credit = result.credit();
            if !result.answered || credit.is_zero() {
                continue;
            }
            let scaled = credit * scale_ratio(alternatives[index].marks, primary.marks);
            if scaled > best_credit {
                best_credit = scaled;
                best = Some((index, result, scaled));
            }
        }

        match best {
            None => Ok(MarkingOutcome::Ready(primary_result)),
            Some((index, result, scaled)) => {
                tracing::info!(
                    "part '{}' marked using alternative {index} ({scaled} credit)",
                    primary.path
                );
                let selected = use_alternative(primary, &alternatives[index], index, result, scaled)?;
                Ok(MarkingOutcome::Ready(selected))
            }
        }
    }
}

/// Rewrite an alternative's result as the primary part's result: a single
/// `set_credit` worth the scaled credit, carrying the alternative's message.
///
/// With full feedback the alternative's own transcript follows as comments.
/// Its marks annotations were computed against the alternative's marks, which
/// the scaled credit turns into the same number of the primary's marks.
fn use_alternative(
    primary: &PartProgram,
    alternative: &PartProgram,
    index: usize,
    result: MarkingResult,
    scaled: Credit,
) -> Result<MarkingResult, MarkingError> {
    let settings = alternative.alternative.clone().unwrap_or_default();
    let mut ops = vec![FeedbackOp::SetCredit {
        value: scaled,
        reason: Some("alternative".into()),
        message: settings.feedback_message.clone(),
    }];
    if settings.show_full_feedback {
        ops.extend(result.feedback_messages.iter().map(|entry| FeedbackOp::Feedback {
            text: entry.render(),
            reason: entry.reason.clone(),
        }));
    }
    let finalized = FeedbackLedger::new(primary.marks).replay(&ops)?;

    let mut selected = MarkingResult::from_finalized(&result.execution_path, finalized);
    selected.warnings.extend(result.warnings);
    selected.note_values = result.note_values;
    selected.interpreted_answer = result.interpreted_answer;
    selected.adaptive_marking_used = result.adaptive_marking_used;
    selected.diagnostics = result.diagnostics;
    selected.alternative_used = Some(index);
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockScope, StaticQuestion};
    use crate::model::{AlternativeSettings, PartDefinition};
    use crate::script::MarkingScript;
    use crate::value::Deferred;

    /// `mark: credit_for_<n>` gives `value` credit when the answer is `n`.
    fn scope() -> MockScope {
        let mut scope = MockScope::new();
        for n in ["1", "2", "3"] {
            let expected = Value::from(n);
            scope = scope.define(&format!("credit_for_{n}"), &["studentAnswer"], move |b| {
                Ok(if b.get("studentAnswer") == Some(&expected) {
                    vec![FeedbackOp::correct("matched")].into()
                } else {
                    vec![FeedbackOp::incorrect("no match")].into()
                })
            });
        }
        scope
            .define("half_for_2", &["studentAnswer"], |b| {
                let credit = if b.get("studentAnswer") == Some(&Value::from("2")) { 0.5 } else { 0.0 };
                Ok(vec![FeedbackOp::set_credit(credit, None, "")].into())
            })
            .define("reject", &[], |_| Ok(vec![FeedbackOp::invalid()].into()))
            .define("slow", &[], |_| {
                Ok(Value::Deferred(Deferred::ready(Value::Bool(true))))
            })
    }

    fn program(path: &str, marks: f64, script: &str, settings: Option<AlternativeSettings>) -> PartProgram {
        let mut def = PartDefinition::new(path, marks, MarkingScript::parse(script).unwrap());
        def.alternative = settings;
        PartProgram::compile(&def, &scope()).unwrap()
    }

    fn alt(marks: f64, script: &str, message: &str, full: bool) -> PartProgram {
        program(
            "alt",
            marks,
            script,
            Some(AlternativeSettings {
                feedback_message: message.into(),
                show_full_feedback: full,
            }),
        )
    }

    fn select(primary: &PartProgram, alternatives: &[PartProgram], answer: &str) -> MarkingOutcome {
        let question = StaticQuestion::new(Arc::new(scope()));
        AlternativeSelector::new(&question)
            .select(primary, alternatives, &Value::from(answer), &PreSubmitCache::new())
            .unwrap()
    }

    fn ready(outcome: MarkingOutcome) -> MarkingResult {
        match outcome {
            MarkingOutcome::Ready(result) => result,
            MarkingOutcome::Pending(_) => panic!("expected a ready result"),
        }
    }

    #[test]
    fn scaled_alternative_summary_feedback() {
        let primary = program("p0", 1.0, "mark: credit_for_1", None);
        let alternatives = [alt(0.5, "mark: credit_for_2", "You wrote 2.", false)];
        let result = ready(select(&primary, &alternatives, "2"));

        assert_eq!(result.alternative_used, Some(0));
        assert_eq!(result.credit(), Credit::new(1, 2));
        assert_eq!(result.execution_path, "p0/alternative-0");
        assert_eq!(result.rendered_feedback(), vec!["You wrote 2. (+0.5 marks)"]);
        assert_eq!(
            result.finalized.ops,
            vec![FeedbackOp::set_credit(Credit::new(1, 2), Some("alternative"), "You wrote 2.")]
        );
    }

    #[test]
    fn full_feedback_keeps_alternative_transcript() {
        let primary = program("p0", 2.0, "mark: credit_for_1", None);
        let alternatives = [alt(1.0, "mark: credit_for_2", "You wrote 2.", true)];
        let result = ready(select(&primary, &alternatives, "2"));

        assert_eq!(result.credit(), Credit::new(1, 2));
        assert_eq!(
            result.rendered_feedback(),
            vec!["You wrote 2. (+1 mark)".to_string(), "matched (+1 mark)".to_string()]
        );
        assert_eq!(result.finalized.ops.len(), 2);
        assert_eq!(
            result.finalized.ops[0],
            FeedbackOp::set_credit(Credit::new(1, 2), Some("alternative"), "You wrote 2.")
        );
        assert!(matches!(
            &result.finalized.ops[1],
            FeedbackOp::Feedback { text, .. } if text == "matched (+1 mark)"
        ));
        // Replaying the rewritten ops gives back the same credit.
        let replayed = FeedbackLedger::new(2).replay(&result.finalized.ops).unwrap();
        assert_eq!(replayed.credit, Credit::new(1, 2));
    }

    #[test]
    fn primary_wins_when_not_beaten() {
        let primary = program("p0", 1.0, "mark: credit_for_1", None);
        let alternatives = [alt(1.0, "mark: credit_for_2", "", false)];
        let result = ready(select(&primary, &alternatives, "1"));
        assert_eq!(result.alternative_used, None);
        assert_eq!(result.credit(), Credit::ONE);
    }

    #[test]
    fn first_declared_alternative_wins_ties() {
        let primary = program("p0", 1.0, "mark: credit_for_1", None);
        let alternatives = [
            alt(0.5, "mark: credit_for_2", "first", false),
            alt(1.0, "mark: half_for_2", "second", false),
        ];
        let result = ready(select(&primary, &alternatives, "2"));
        assert_eq!(result.alternative_used, Some(0));
    }

    #[test]
    fn zero_credit_and_invalid_alternatives_are_skipped() {
        let primary = program("p0", 1.0, "mark: credit_for_1", None);
        let alternatives = [
            alt(1.0, "mark: credit_for_3", "zero", false),
            alt(1.0, "mark: reject", "invalid", false),
        ];
        let result = ready(select(&primary, &alternatives, "2"));
        assert_eq!(result.alternative_used, None);
        assert_eq!(result.credit(), Credit::ZERO);
    }

    #[test]
    fn zero_mark_primary_takes_alternative_credit_unscaled() {
        let primary = program("p0", 0.0, "mark: credit_for_1", None);
        let alternatives = [alt(3.0, "mark: half_for_2", "", false)];
        let result = ready(select(&primary, &alternatives, "2"));
        assert_eq!(result.credit(), Credit::new(1, 2));
    }

    #[test]
    fn pending_alternative_makes_whole_selection_pending() {
        let primary = program("p0", 1.0, "mark: credit_for_1", None);
        let alternatives = [alt(1.0, "pre_submit: slow\n\nmark: credit_for_2", "", false)];
        match select(&primary, &alternatives, "2") {
            MarkingOutcome::Pending(tasks) => {
                assert_eq!(tasks.execution_paths(), vec!["p0/alternative-0"]);
            }
            MarkingOutcome::Ready(_) => panic!("expected pending tasks"),
        }
    }

    #[test]
    fn ratio_is_monotonic_in_alternative_marks() {
        assert!(scale_ratio(0.5, 1.0) < scale_ratio(1.0, 1.0));
        assert_eq!(scale_ratio(1.0, 3.0), Credit::new(1, 3));
        assert_eq!(scale_ratio(2.0, 0.0), Credit::ONE);
    }

    #[test]
    fn invalid_primary_does_not_block_alternatives() {
        let scope = scope().define("shaky", &["studentAnswer"], |_| {
            Ok(vec![FeedbackOp::correct("ok"), FeedbackOp::invalid()].into())
        });
        let def = PartDefinition::new("p0", 1.0, MarkingScript::parse("mark: shaky").unwrap());
        let primary = PartProgram::compile(&def, &scope).unwrap();
        let alternatives = [alt(0.5, "mark: credit_for_2", "You wrote 2.", false)];

        let question = StaticQuestion::new(Arc::new(scope));
        let outcome = AlternativeSelector::new(&question)
            .select(&primary, &alternatives, &Value::from("2"), &PreSubmitCache::new())
            .unwrap();
        let result = ready(outcome);
        assert_eq!(result.alternative_used, Some(0));
        assert!(result.answered);
        assert_eq!(result.credit(), Credit::new(1, 2));
    }
}

