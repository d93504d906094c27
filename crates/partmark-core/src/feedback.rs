//! Feedback operations and the ledger that replays them.
//!
//! A marking script produces an ordered list of [`FeedbackOp`]s. The
//! [`FeedbackLedger`] replays that list with exact [`Credit`] arithmetic,
//! handling lifts (scoped credit contexts) and early termination, and
//! annotates every credit-changing message with the marks it gained or lost.

use serde::{Deserialize, Serialize};

use crate::credit::{format_marks, pluralise_marks, Credit};
use crate::error::MarkingError;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One step in a part's feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FeedbackOp {
    /// Set the running credit to `value` (scaled by the active lift).
    SetCredit {
        value: Credit,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        message: String,
    },
    /// Add `delta` (scaled by the active lift).
    AddCredit {
        delta: Credit,
        #[serde(default)]
        message: String,
    },
    /// Subtract `delta` (scaled by the active lift).
    SubCredit {
        delta: Credit,
        #[serde(default)]
        message: String,
    },
    /// Multiply the running credit by `factor`. Not scaled.
    MultiplyCredit {
        factor: Credit,
        #[serde(default)]
        message: String,
    },
    /// A message for the student that does not affect credit.
    Warning { text: String },
    /// A comment shown in the feedback transcript.
    Feedback {
        text: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Open a lift: credit set inside counts `scale` times towards the outer credit.
    StartLift { scale: Credit },
    /// Close the innermost lift.
    EndLift,
    /// Stop processing. `invalid` marks the whole answer invalid.
    End {
        #[serde(default)]
        invalid: bool,
    },
}

impl FeedbackOp {
    pub fn set_credit(value: impl Into<Credit>, reason: Option<&str>, message: &str) -> Self {
        FeedbackOp::SetCredit {
            value: value.into(),
            reason: reason.map(str::to_string),
            message: message.to_string(),
        }
    }

    /// Full credit with reason `correct`.
    pub fn correct(message: &str) -> Self {
        Self::set_credit(Credit::ONE, Some("correct"), message)
    }

    /// Zero credit with reason `incorrect`.
    pub fn incorrect(message: &str) -> Self {
        Self::set_credit(Credit::ZERO, Some("incorrect"), message)
    }

    pub fn add_credit(delta: impl Into<Credit>, message: &str) -> Self {
        FeedbackOp::AddCredit {
            delta: delta.into(),
            message: message.to_string(),
        }
    }

    pub fn sub_credit(delta: impl Into<Credit>, message: &str) -> Self {
        FeedbackOp::SubCredit {
            delta: delta.into(),
            message: message.to_string(),
        }
    }

    pub fn multiply_credit(factor: impl Into<Credit>, message: &str) -> Self {
        FeedbackOp::MultiplyCredit {
            factor: factor.into(),
            message: message.to_string(),
        }
    }

    pub fn warning(text: &str) -> Self {
        FeedbackOp::Warning {
            text: text.to_string(),
        }
    }

    pub fn feedback(text: &str) -> Self {
        FeedbackOp::Feedback {
            text: text.to_string(),
            reason: None,
        }
    }

    pub fn end() -> Self {
        FeedbackOp::End { invalid: false }
    }

    /// Stop marking and flag the answer as invalid.
    pub fn invalid() -> Self {
        FeedbackOp::End { invalid: true }
    }

    /// Wrap `ops` in a lift of the given scale.
    pub fn concat(ops: impl IntoIterator<Item = FeedbackOp>, scale: impl Into<Credit>) -> Vec<Self> {
        let mut out = vec![FeedbackOp::StartLift {
            scale: scale.into(),
        }];
        out.extend(ops);
        out.push(FeedbackOp::EndLift);
        out
    }

    /// Short name used in transcripts.
    pub fn name(&self) -> &'static str {
        match self {
            FeedbackOp::SetCredit { .. } => "set_credit",
            FeedbackOp::AddCredit { .. } => "add_credit",
            FeedbackOp::SubCredit { .. } => "sub_credit",
            FeedbackOp::MultiplyCredit { .. } => "multiply_credit",
            FeedbackOp::Warning { .. } => "warning",
            FeedbackOp::Feedback { .. } => "feedback",
            FeedbackOp::StartLift { .. } => "start_lift",
            FeedbackOp::EndLift => "end_lift",
            FeedbackOp::End { .. } => "end",
        }
    }

    /// True for `End { invalid: true }`.
    pub fn is_invalid_end(&self) -> bool {
        matches!(self, FeedbackOp::End { invalid: true })
    }
}

// ---------------------------------------------------------------------------
// Finalized output
// ---------------------------------------------------------------------------

/// Whether a transcript entry came from a credit operation or is a plain comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    CreditChange,
    Comment,
}

/// One line of the feedback transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub kind: EntryKind,
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Change in overall credit caused by this entry, after lift scaling.
    pub credit_change: Credit,
    /// Overall credit once this entry was applied, unclamped.
    pub credit_after: Credit,
    /// Marks gained or lost, as shown to the student.
    #[serde(default)]
    pub marks_change: Option<f64>,
}

impl FeedbackEntry {
    /// A comment that is not tied to any credit change.
    pub fn comment(message: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Comment,
            message: message.into(),
            reason: None,
            credit_change: Credit::ZERO,
            credit_after: Credit::ZERO,
            marks_change: None,
        }
    }

    /// The message with its marks annotation, if any.
    pub fn render(&self) -> String {
        match self.marks_change {
            Some(change) => {
                let sign = if change < 0.0 { "-" } else { "+" };
                let annotation = format!(
                    "{sign}{} {}",
                    format_marks(change.abs()),
                    pluralise_marks(change)
                );
                if self.message.is_empty() {
                    format!("({annotation})")
                } else {
                    format!("{} ({annotation})", self.message)
                }
            }
            None => self.message.clone(),
        }
    }
}

/// The result of replaying a list of feedback operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedResult {
    /// False if an `End { invalid: true }` stopped marking at the top level.
    pub valid: bool,
    /// Final credit, exact and unclamped. Always zero when not valid.
    pub credit: Credit,
    /// The ops that were actually applied, in order.
    pub ops: Vec<FeedbackOp>,
    pub entries: Vec<FeedbackEntry>,
    pub warnings: Vec<String>,
}

impl FinalizedResult {
    /// An invalid result with no credit.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            credit: Credit::ZERO,
            ops: Vec::new(),
            entries: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Credit clamped to `[0, 1]`.
    pub fn clamped_credit(&self) -> Credit {
        self.credit.clamp_unit()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Replays feedback operations for a part worth `marks`.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackLedger {
    marks: Credit,
}

#[derive(Debug, Clone, Copy)]
struct LiftFrame {
    saved_credit: Credit,
    saved_scale: Credit,
}

impl FeedbackLedger {
    pub fn new(marks: impl Into<Credit>) -> Self {
        Self {
            marks: marks.into(),
        }
    }

    pub fn marks(&self) -> Credit {
        self.marks
    }

    /// Replay `ops` from zero credit.
    ///
    /// A nested lift's effective scale is the product of every enclosing
    /// lift's scale. `End` inside a lift only ends that lift; at the top level
    /// it ends marking.
    pub fn replay(&self, ops: &[FeedbackOp]) -> Result<FinalizedResult, MarkingError> {
        let mut acc = Credit::ZERO;
        let mut scale = Credit::ONE;
        let mut frames: Vec<LiftFrame> = Vec::new();
        let mut valid = true;
        let mut applied = Vec::with_capacity(ops.len());
        let mut entries = Vec::new();
        let mut warnings = Vec::new();

        let total = |frames: &[LiftFrame], acc: Credit| -> Credit {
            frames.iter().map(|f| f.saved_credit).sum::<Credit>() + acc
        };

        let mut i = 0;
        while i < ops.len() {
            let op = &ops[i];
            match op {
                FeedbackOp::SetCredit {
                    value,
                    reason,
                    message,
                } => {
                    let new = scale * *value;
                    let change = new - acc;
                    acc = new;
                    entries.push(credit_entry(
                        message,
                        reason.clone(),
                        change,
                        total(&frames, acc),
                    ));
                }
                FeedbackOp::AddCredit { delta, message } => {
                    let change = scale * *delta;
                    acc = acc + change;
                    entries.push(credit_entry(message, None, change, total(&frames, acc)));
                }
                FeedbackOp::SubCredit { delta, message } => {
                    let change = -(scale * *delta);
                    acc = acc + change;
                    entries.push(credit_entry(message, None, change, total(&frames, acc)));
                }
                FeedbackOp::MultiplyCredit { factor, message } => {
                    let new = acc * *factor;
                    let change = new - acc;
                    acc = new;
                    entries.push(credit_entry(message, None, change, total(&frames, acc)));
                }
                FeedbackOp::Warning { text } => warnings.push(text.clone()),
                FeedbackOp::Feedback { text, reason } => {
                    entries.push(FeedbackEntry {
                        kind: EntryKind::Comment,
                        message: text.clone(),
                        reason: reason.clone(),
                        credit_change: Credit::ZERO,
                        credit_after: total(&frames, acc),
                        marks_change: None,
                    });
                }
                FeedbackOp::StartLift { scale: s } => {
                    frames.push(LiftFrame {
                        saved_credit: acc,
                        saved_scale: scale,
                    });
                    acc = Credit::ZERO;
                    scale = scale * *s;
                }
                FeedbackOp::EndLift => {
                    let frame = frames
                        .pop()
                        .ok_or(MarkingError::UnmatchedEndLift { index: i })?;
                    acc = frame.saved_credit + acc;
                    scale = frame.saved_scale;
                }
                FeedbackOp::End { invalid } => {
                    if frames.is_empty() {
                        if *invalid {
                            valid = false;
                            acc = Credit::ZERO;
                        }
                        break;
                    }
                    i = skip_to_end_lift(ops, i);
                    continue;
                }
            }
            applied.push(op.clone());
            i += 1;
        }

        if !frames.is_empty() {
            return Err(MarkingError::UnbalancedLift { open: frames.len() });
        }

        annotate_marks(&mut entries, self.marks);
        tracing::debug!(
            ops = ops.len(),
            applied = applied.len(),
            credit = %acc,
            valid,
            "replayed feedback"
        );

        Ok(FinalizedResult {
            valid,
            credit: acc,
            ops: applied,
            entries,
            warnings,
        })
    }
}

fn credit_entry(
    message: &str,
    reason: Option<String>,
    change: Credit,
    after: Credit,
) -> FeedbackEntry {
    FeedbackEntry {
        kind: EntryKind::CreditChange,
        message: message.to_string(),
        reason,
        credit_change: change,
        credit_after: after,
        marks_change: None,
    }
}

/// Index of the `EndLift` closing the lift that contains `from`, or
/// `ops.len()` if there is none.
fn skip_to_end_lift(ops: &[FeedbackOp], from: usize) -> usize {
    let mut depth = 0usize;
    for (j, op) in ops.iter().enumerate().skip(from + 1) {
        match op {
            FeedbackOp::StartLift { .. } => depth += 1,
            FeedbackOp::EndLift if depth == 0 => return j,
            FeedbackOp::EndLift => depth -= 1,
            _ => {}
        }
    }
    ops.len()
}

/// Attach a marks change to every entry that moved the credit, measured on the
/// clamped running total so the shown changes add up to the final score.
fn annotate_marks(entries: &mut [FeedbackEntry], marks: Credit) {
    let mut shown = Credit::ZERO;
    for entry in entries.iter_mut() {
        if entry.kind != EntryKind::CreditChange || entry.credit_change.is_zero() {
            continue;
        }
        let now = entry.credit_after.clamp_unit();
        entry.marks_change = Some(((now - shown) * marks).to_f64());
        shown = now;
    }
}
