//! Marking error types.
//!
//! [`EvalError`] is what a scope reports when an expression cannot be
//! compiled or evaluated; it is recorded against the note that produced it.
//! [`MarkingError`] covers structural faults in a marking run, which are
//! caught once at the submission boundary and turned into a zero-credit
//! result with a diagnostic.

use thiserror::Error;

/// A failure evaluating a single expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A name was referenced that is neither a note nor a scope variable.
    #[error("undefined name '{0}'")]
    UndefinedName(String),

    /// The expression could not be compiled.
    #[error("could not compile '{expr}': {message}")]
    Compile { expr: String, message: String },

    /// Evaluation failed at runtime.
    #[error("{0}")]
    Failed(String),

    /// A value was expected to be a list of feedback operations.
    #[error("expected a list of feedback operations, got {0}")]
    NotFeedback(String),

    /// The note was skipped because one of its dependencies failed.
    #[error("note '{dependency}' failed, so '{note}' could not be evaluated")]
    DependencyFailed { note: String, dependency: String },
}

/// A structural fault in a marking run.
#[derive(Debug, Error)]
pub enum MarkingError {
    /// Lifts were still open when the ops ran out.
    #[error("unbalanced feedback: {open} lift(s) still open at the end of marking")]
    UnbalancedLift { open: usize },

    /// An `end_lift` had no matching `start_lift`.
    #[error("end_lift at operation {index} has no matching start_lift")]
    UnmatchedEndLift { index: usize },

    /// A required note is absent from the marking script.
    #[error("marking script has no '{0}' note")]
    MissingNote(String),

    /// A note definition could not be parsed.
    #[error("invalid note definition: {0}")]
    InvalidNote(String),

    /// Notes reference each other in a cycle.
    #[error("circular reference between notes: {0}")]
    CircularNotes(String),

    /// A note's expression did not compile against the scope.
    #[error("note '{name}' failed to compile: {source}")]
    NoteCompile {
        name: String,
        #[source]
        source: EvalError,
    },

    /// A `must_go_first` replacement source has not been answered.
    #[error("You must answer {part} first.")]
    SourcePartUnanswered { part: String },

    /// A replacement rule names a part the question does not have.
    #[error("part '{0}' not found")]
    PartNotFound(String),

    /// Settling deferred pre-submit tasks failed.
    #[error("pre-submit tasks failed: {0}")]
    PreSubmit(#[source] EvalError),
}

impl MarkingError {
    /// Returns `true` for faults in the marking program itself rather than
    /// anything the student did or a collaborator failing. Programming errors
    /// are logged at error level and tagged as such in diagnostics.
    pub fn is_programming_error(&self) -> bool {
        !matches!(
            self,
            MarkingError::SourcePartUnanswered { .. } | MarkingError::PreSubmit(_)
        )
    }
}
