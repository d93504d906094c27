//! Core data model types for partmark.
//!
//! Part definitions describe what to mark and how; a [`PartProgram`] is a
//! definition compiled against a scope; a [`MarkingResult`] is what one
//! marking run produced.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::credit::Credit;
use crate::error::MarkingError;
use crate::feedback::{FeedbackEntry, FinalizedResult};
use crate::script::{MarkingScript, ScriptRunner};
use crate::traits::Scope;
use crate::value::Value;

/// Warning given when a part is submitted with nothing staged.
pub const NO_ANSWER_WARNING: &str = "No answer submitted";

/// Comment given when a part is submitted with nothing staged.
pub const NOT_ANSWERED_COMMENT: &str = "You did not answer this question.";

// ---------------------------------------------------------------------------
// Adaptive marking settings
// ---------------------------------------------------------------------------

/// How answers to earlier parts are substituted into this part's marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplacementStrategy {
    /// Mark against the question's own variables; try the replacements only
    /// if that does not give full credit.
    #[default]
    #[serde(alias = "originalfirst")]
    OriginalFirst,
    /// Always mark against the replaced variables.
    #[serde(alias = "alwaysreplace")]
    AlwaysReplace,
}

impl fmt::Display for ReplacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementStrategy::OriginalFirst => write!(f, "original-first"),
            ReplacementStrategy::AlwaysReplace => write!(f, "always-replace"),
        }
    }
}

impl FromStr for ReplacementStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "originalfirst" => Ok(ReplacementStrategy::OriginalFirst),
            "alwaysreplace" => Ok(ReplacementStrategy::AlwaysReplace),
            other => Err(format!("unknown replacement strategy: {other}")),
        }
    }
}

/// Replace question variable `variable` with the interpreted answer to the
/// part at `source_part_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableReplacementRule {
    pub variable: String,
    #[serde(rename = "part")]
    pub source_part_path: String,
    /// Refuse to use replacements until the source part is answered.
    #[serde(default)]
    pub must_go_first: bool,
}

impl VariableReplacementRule {
    pub fn new(variable: &str, source_part_path: &str, must_go_first: bool) -> Self {
        Self {
            variable: variable.to_string(),
            source_part_path: source_part_path.to_string(),
            must_go_first,
        }
    }
}

/// Settings that only apply when a part is used as an alternative answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeSettings {
    /// Shown when this alternative is the one that gets used.
    #[serde(default)]
    pub feedback_message: String,
    /// Show the alternative's own feedback rather than a one-line summary.
    #[serde(default)]
    pub show_full_feedback: bool,
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Per-part marking settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartSettings {
    pub strategy: ReplacementStrategy,
    /// Marks taken off when the replaced variables were used.
    pub adaptive_penalty: f64,
    /// Marks taken off when the steps are shown.
    pub steps_penalty: f64,
    pub min_marks: Option<f64>,
    pub max_marks: Option<f64>,
    /// Free-form values passed to the marking script as `settings`.
    pub values: BTreeMap<String, Value>,
}

impl PartSettings {
    pub fn to_value(&self) -> Value {
        Value::Dict(self.values.clone())
    }
}

/// A part as defined by the question author.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDefinition {
    pub path: String,
    pub marks: f64,
    /// The marking script. Gap-fill parts may omit it.
    pub script: Option<MarkingScript>,
    pub settings: PartSettings,
    pub replacements: Vec<VariableReplacementRule>,
    pub alternatives: Vec<PartDefinition>,
    /// Present on definitions that are alternatives of another part.
    pub alternative: Option<AlternativeSettings>,
    pub steps: Vec<PartDefinition>,
    pub gaps: Vec<PartDefinition>,
}

impl PartDefinition {
    pub fn new(path: &str, marks: f64, script: MarkingScript) -> Self {
        Self {
            path: path.to_string(),
            marks,
            script: Some(script),
            settings: PartSettings::default(),
            replacements: Vec::new(),
            alternatives: Vec::new(),
            alternative: None,
            steps: Vec::new(),
            gaps: Vec::new(),
        }
    }

    /// A part marked only through its gaps.
    pub fn gapfill(path: &str, marks: f64, gaps: Vec<PartDefinition>) -> Self {
        Self {
            script: None,
            gaps,
            ..Self::new(path, marks, MarkingScript::default())
        }
    }

    pub fn with_settings(mut self, settings: PartSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_replacement(mut self, rule: VariableReplacementRule) -> Self {
        self.replacements.push(rule);
        self
    }

    pub fn with_alternative(mut self, mut alternative: PartDefinition, settings: AlternativeSettings) -> Self {
        alternative.alternative = Some(settings);
        self.alternatives.push(alternative);
        self
    }

    pub fn with_step(mut self, step: PartDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn is_gapfill(&self) -> bool {
        !self.gaps.is_empty()
    }

    /// This part and every nested step, gap and alternative, depth first.
    pub fn walk(&self) -> Vec<&PartDefinition> {
        let mut out = vec![self];
        for child in self.gaps.iter().chain(&self.steps).chain(&self.alternatives) {
            out.extend(child.walk());
        }
        out
    }
}

/// A question as loaded from a question file.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parts: Vec<PartDefinition>,
}

impl QuestionDefinition {
    /// Every part definition in the question, nested ones included.
    pub fn all_parts(&self) -> Vec<&PartDefinition> {
        self.parts.iter().flat_map(PartDefinition::walk).collect()
    }

    pub fn find_part(&self, path: &str) -> Option<&PartDefinition> {
        self.all_parts().into_iter().find(|p| p.path == path)
    }
}

/// A part definition with its script compiled, as used by the markers.
#[derive(Debug, Clone)]
pub struct PartProgram {
    pub path: String,
    pub marks: f64,
    pub settings: Value,
    pub script: Arc<ScriptRunner>,
    pub replacements: Vec<VariableReplacementRule>,
    pub strategy: ReplacementStrategy,
    pub alternative: Option<AlternativeSettings>,
}

impl PartProgram {
    pub fn compile(definition: &PartDefinition, scope: &dyn Scope) -> Result<Self, MarkingError> {
        let script = definition
            .script
            .as_ref()
            .ok_or_else(|| MarkingError::MissingNote("mark".into()))?;
        Ok(Self {
            path: definition.path.clone(),
            marks: definition.marks,
            settings: definition.settings.to_value(),
            script: Arc::new(ScriptRunner::compile(script, scope)?),
            replacements: definition.replacements.clone(),
            strategy: definition.settings.strategy,
            alternative: definition.alternative.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Everything one marking run produced for a part.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkingResult {
    /// Where in the part tree this result was computed, e.g. `p0/alternative-1/adaptive`.
    pub execution_path: String,
    /// Messages for the student that are not part of the feedback transcript.
    pub warnings: Vec<String>,
    pub feedback_messages: Vec<FeedbackEntry>,
    pub finalized: FinalizedResult,
    pub note_values: BTreeMap<String, Value>,
    pub interpreted_answer: Option<Value>,
    pub adaptive_marking_used: bool,
    pub answered: bool,
    /// Index of the alternative answer that was used, if any.
    pub alternative_used: Option<usize>,
    /// Details for the question author; never shown to the student.
    pub diagnostics: Vec<String>,
    /// Per-gap results for a gap-fill part.
    pub gap_results: Vec<MarkingResult>,
}

impl MarkingResult {
    pub fn from_finalized(execution_path: &str, finalized: FinalizedResult) -> Self {
        Self {
            execution_path: execution_path.to_string(),
            warnings: finalized.warnings.clone(),
            feedback_messages: finalized.entries.clone(),
            answered: finalized.valid,
            finalized,
            note_values: BTreeMap::new(),
            interpreted_answer: None,
            adaptive_marking_used: false,
            alternative_used: None,
            diagnostics: Vec::new(),
            gap_results: Vec::new(),
        }
    }

    /// The result for a part submitted with no answer.
    pub fn unanswered(execution_path: &str) -> Self {
        let mut result = Self::from_finalized(execution_path, FinalizedResult::invalid());
        result.warnings.push(NO_ANSWER_WARNING.to_string());
        result.add_comment(NOT_ANSWERED_COMMENT);
        result
    }

    /// Zero credit, not answered, with the error kept as a diagnostic.
    pub fn failed(execution_path: &str, error: &MarkingError) -> Self {
        let mut result = Self::from_finalized(execution_path, FinalizedResult::invalid());
        let kind = if error.is_programming_error() {
            "marking script fault"
        } else {
            "marking interrupted"
        };
        result.diagnostics.push(format!("{kind}: {error:#}"));
        result
    }

    /// Credit earned, clamped to `[0, 1]`. Zero for an invalid ledger.
    ///
    /// A gap-fill part that is not answered still carries the credit its
    /// valid gaps earned.
    pub fn credit(&self) -> Credit {
        self.finalized.clamped_credit()
    }

    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.feedback_messages.push(FeedbackEntry::comment(text));
    }

    pub fn prepend_comment(&mut self, text: impl Into<String>) {
        self.feedback_messages.insert(0, FeedbackEntry::comment(text));
    }

    /// Rendered feedback lines, marks annotations included.
    pub fn rendered_feedback(&self) -> Vec<String> {
        self.feedback_messages.iter().map(FeedbackEntry::render).collect()
    }
}
