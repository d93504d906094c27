//! Turning credit into a score.

use crate::credit::{format_marks, pluralise_marks, Credit};

/// Everything the score of a part depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInputs {
    pub marks: f64,
    pub credit: Credit,
    pub adaptive_marking_used: bool,
    pub adaptive_penalty: f64,
    pub steps_shown: bool,
    /// Marks lost to shown steps. For a gap this is its share of the parent's penalty.
    pub steps_penalty: f64,
    /// Scores of this part's steps, counted only when the steps are shown.
    pub step_scores: Vec<f64>,
    pub revealed: bool,
    pub min_marks: Option<f64>,
    pub max_marks: Option<f64>,
}

impl ScoreInputs {
    /// Inputs for a plain part with no penalties or steps.
    pub fn new(marks: f64, credit: Credit) -> Self {
        Self {
            marks,
            credit,
            adaptive_marking_used: false,
            adaptive_penalty: 0.0,
            steps_shown: false,
            steps_penalty: 0.0,
            step_scores: Vec::new(),
            revealed: false,
            min_marks: None,
            max_marks: None,
        }
    }
}

/// A computed score and the comments explaining it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub available_marks: f64,
    pub score: f64,
    pub comments: Vec<String>,
}

/// Computes the marks awarded for a part.
pub struct PartScorer;

impl PartScorer {
    /// Marks available after penalties, within `[0, marks]`.
    pub fn available_marks(inputs: &ScoreInputs) -> Credit {
        let marks = Credit::from_float(inputs.marks);
        let mut available = marks;
        if inputs.adaptive_marking_used {
            available = available - Credit::from_float(inputs.adaptive_penalty);
        }
        if inputs.steps_shown {
            available = available - Credit::from_float(inputs.steps_penalty);
        }
        available.clamp(Credit::ZERO, marks.max(Credit::ZERO))
    }

    pub fn score(inputs: &ScoreInputs) -> ScoreBreakdown {
        let available = Self::available_marks(inputs);
        let mut comments = Vec::new();

        if inputs.revealed {
            return ScoreBreakdown {
                available_marks: available.to_f64(),
                score: 0.0,
                comments,
            };
        }

        let credit = inputs.credit.clamp_unit();
        let mut score = available * credit;

        if inputs.steps_shown {
            if inputs.steps_penalty > 0.0 {
                comments.push(format!(
                    "You revealed the steps. The maximum you can score for this part is {} {}.",
                    format_marks(available.to_f64()),
                    pluralise_marks(available.to_f64())
                ));
            } else {
                comments.push("You revealed the steps.".to_string());
            }

            let steps: Credit = inputs
                .step_scores
                .iter()
                .map(|s| Credit::from_float(*s))
                .sum();
            if credit == Credit::ONE {
                if !steps.is_zero() {
                    comments.push(
                        "Because you received full marks for the part, your answers to the steps aren't counted."
                            .to_string(),
                    );
                }
            } else if !steps.is_zero() {
                comments.push(format!(
                    "You were awarded {} {} for your answers to the steps.",
                    format_marks(steps.to_f64()),
                    pluralise_marks(steps.to_f64())
                ));
                score = (score + steps).min(available);
            }
        }

        let mut score = score.to_f64();
        if let Some(min) = inputs.min_marks {
            if score < min {
                score = min;
                comments.push(format!(
                    "You have been awarded the minimum score of {} {} for this part.",
                    format_marks(min),
                    pluralise_marks(min)
                ));
            }
        }
        if let Some(max) = inputs.max_marks {
            if score > max {
                score = max;
                comments.push(format!(
                    "You have been awarded the maximum score of {} {} for this part.",
                    format_marks(max),
                    pluralise_marks(max)
                ));
            }
        }

        ScoreBreakdown {
            available_marks: available.to_f64(),
            score,
            comments,
        }
    }

    /// A gap's share of its parent's steps penalty.
    pub fn gap_steps_penalty(parent_penalty: f64, gap_marks: f64, parent_marks: f64) -> f64 {
        if parent_marks <= 0.0 {
            0.0
        } else {
            parent_penalty * gap_marks / parent_marks
        }
    }

    /// "You scored N marks for this part."
    pub fn total_comment(score: f64) -> String {
        format!(
            "You scored {} {} for this part.",
            format_marks(score),
            pluralise_marks(score)
        )
    }
}
