//! Marking reports with JSON persistence and markdown rendering.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::{format_marks, Credit};
use crate::engine::Part;
use crate::feedback::FeedbackEntry;
use crate::model::MarkingResult;

/// A marking report for one or more parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkingReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    /// What was marked, e.g. a question id or an ops file.
    pub source: String,
    pub parts: Vec<PartReport>,
}

/// How one part was marked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartReport {
    pub path: String,
    pub marks: f64,
    pub score: f64,
    pub credit: Credit,
    pub answered: bool,
    pub adaptive_marking_used: bool,
    #[serde(default)]
    pub alternative_used: Option<usize>,
    /// Rendered feedback lines.
    pub feedback: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
    /// The full transcript, with credit changes.
    #[serde(default)]
    pub entries: Vec<FeedbackEntry>,
}

impl PartReport {
    pub fn from_result(result: &MarkingResult, marks: f64, score: f64) -> Self {
        Self {
            path: result.execution_path.clone(),
            marks,
            score,
            credit: result.credit(),
            answered: result.answered,
            adaptive_marking_used: result.adaptive_marking_used,
            alternative_used: result.alternative_used,
            feedback: result.rendered_feedback(),
            warnings: result.warnings.clone(),
            diagnostics: result.diagnostics.clone(),
            entries: result.feedback_messages.clone(),
        }
    }

    /// Report on a part's last marking, or an empty report if it was never
    /// submitted.
    pub fn from_part(part: &Part) -> Self {
        let state = part.state();
        match part.last_result() {
            Some(result) => Self {
                path: part.path().to_string(),
                credit: state.credit,
                ..Self::from_result(result, part.marks(), state.score)
            },
            None => Self {
                path: part.path().to_string(),
                marks: part.marks(),
                score: state.score,
                credit: state.credit,
                answered: state.answered,
                adaptive_marking_used: false,
                alternative_used: None,
                feedback: Vec::new(),
                warnings: Vec::new(),
                diagnostics: Vec::new(),
                entries: Vec::new(),
            },
        }
    }
}

impl MarkingReport {
    pub fn new(source: impl Into<String>, parts: Vec<PartReport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            source: source.into(),
            parts,
        }
    }

    pub fn total_score(&self) -> f64 {
        self.parts.iter().map(|p| p.score).sum()
    }

    pub fn total_marks(&self) -> f64 {
        self.parts.iter().map(|p| p.marks).sum()
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Save the report as `report-<timestamp>.json` under `dir`, returning
    /// the path written.
    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let timestamp = self.created_at.format("%Y-%m-%dT%H%M%S");
        let path = dir.join(format!("report-{timestamp}.json"));
        self.save_json(&path)?;
        Ok(path)
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: MarkingReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Format the report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("# Marking report: {}\n\n", self.source));
        md.push_str(&format!(
            "**Total:** {} / {} marks\n\n",
            format_marks(self.total_score()),
            format_marks(self.total_marks())
        ));

        md.push_str("| Part | Score | Marks | Credit | Answered |\n");
        md.push_str("|------|-------|-------|--------|----------|\n");
        for p in &self.parts {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                p.path,
                format_marks(p.score),
                format_marks(p.marks),
                p.credit,
                if p.answered { "yes" } else { "no" }
            ));
        }

        for p in &self.parts {
            if p.feedback.is_empty() && p.warnings.is_empty() {
                continue;
            }
            md.push_str(&format!("\n### {}\n\n", p.path));
            for line in &p.feedback {
                md.push_str(&format!("- {line}\n"));
            }
            for warning in &p.warnings {
                md.push_str(&format!("- **Warning:** {warning}\n"));
            }
        }

        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackLedger, FeedbackOp};

    fn sample_result() -> MarkingResult {
        let finalized = FeedbackLedger::new(2)
            .replay(&[
                FeedbackOp::set_credit(0.5, None, "Half right."),
                FeedbackOp::warning("Check your units."),
            ])
            .unwrap();
        MarkingResult::from_finalized("p0", finalized)
    }

    #[test]
    fn part_report_from_result() {
        let report = PartReport::from_result(&sample_result(), 2.0, 1.0);
        assert_eq!(report.credit, Credit::new(1, 2));
        assert_eq!(report.feedback, vec!["Half right. (+1 mark)"]);
        assert_eq!(report.warnings, vec!["Check your units."]);
    }

    #[test]
    fn json_roundtrip() {
        let report = MarkingReport::new(
            "quadratic",
            vec![PartReport::from_result(&sample_result(), 2.0, 1.0)],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        report.save_json(&path).unwrap();
        let loaded = MarkingReport::load_json(&path).unwrap();

        assert_eq!(loaded.id, report.id);
        assert_eq!(loaded.parts, report.parts);
    }

    #[test]
    fn save_to_dir_names_file_by_timestamp() {
        let report = MarkingReport::new("quadratic", vec![]);
        let dir = tempfile::tempdir().unwrap();

        let path = report.save_to_dir(&dir.path().join("results")).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("report-"));
        assert!(name.ends_with(".json"));
        assert_eq!(MarkingReport::load_json(&path).unwrap().id, report.id);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = MarkingReport::load_json(Path::new("/no/such/report.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read report"));
    }

    #[test]
    fn markdown_output() {
        let report = MarkingReport::new(
            "quadratic",
            vec![PartReport::from_result(&sample_result(), 2.0, 1.0)],
        );
        let md = report.to_markdown();
        assert!(md.contains("**Total:** 1 / 2 marks"));
        assert!(md.contains("| p0 | 1 | 2 | 1/2 | yes |"));
        assert!(md.contains("- Half right. (+1 mark)"));
        assert!(md.contains("**Warning:** Check your units."));
    }
}
