//! The `partmark replay` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use partmark_core::config::MarkingConfig;
use partmark_core::credit::{format_marks, Credit};
use partmark_core::feedback::{FeedbackLedger, FeedbackOp};
use partmark_core::model::MarkingResult;
use partmark_core::report::{MarkingReport, PartReport};
use partmark_core::scorer::{PartScorer, ScoreInputs};

#[derive(Deserialize)]
#[serde(untagged)]
enum OpsFile {
    List(Vec<FeedbackOp>),
    Table { ops: Vec<FeedbackOp> },
}

impl OpsFile {
    fn into_ops(self) -> Vec<FeedbackOp> {
        match self {
            OpsFile::List(ops) | OpsFile::Table { ops } => ops,
        }
    }
}

/// Read feedback operations from a `.json` list or a TOML file of `[[ops]]`.
fn read_ops(path: &Path) -> Result<Vec<FeedbackOp>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read ops file: {}", path.display()))?;
    let file: OpsFile = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse JSON: {}", path.display()))?
    } else {
        toml::from_str(&content)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?
    };
    Ok(file.into_ops())
}

pub fn execute(
    ops_path: PathBuf,
    marks: Option<f64>,
    format: String,
    output: Option<PathBuf>,
    save: bool,
    config: &MarkingConfig,
) -> Result<()> {
    let ops = read_ops(&ops_path)?;
    let marks = marks.unwrap_or(config.default_marks);
    tracing::debug!("replaying {} ops worth {marks} marks", ops.len());

    let finalized = FeedbackLedger::new(marks)
        .replay(&ops)
        .with_context(|| format!("failed to replay {}", ops_path.display()))?;
    let result = MarkingResult::from_finalized("replay", finalized);
    let credit = if result.answered {
        result.credit()
    } else {
        Credit::ZERO
    };
    let breakdown = PartScorer::score(&ScoreInputs::new(marks, credit));

    let report = MarkingReport::new(
        ops_path.display().to_string(),
        vec![PartReport::from_result(&result, marks, breakdown.score)],
    );

    match format.as_str() {
        "markdown" | "md" => println!("{}", report.to_markdown()),
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_transcript(&report.parts[0]),
    }

    let saved = match output {
        Some(path) => {
            report.save_json(&path)?;
            Some(path)
        }
        None if save => Some(report.save_to_dir(&config.output_dir)?),
        None => None,
    };
    if let Some(path) = saved {
        eprintln!("Report saved to {}", path.display());
    }

    Ok(())
}

fn print_transcript(part: &PartReport) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec!["#", "Feedback", "Marks", "Credit"]);

    for (i, entry) in part.entries.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&entry.message),
            Cell::new(
                entry
                    .marks_change
                    .map(|m| format!("{m:+}"))
                    .unwrap_or_default(),
            ),
            Cell::new(entry.credit_after),
        ]);
    }

    println!("{table}");
    for warning in &part.warnings {
        println!("WARNING: {warning}");
    }
    println!(
        "Credit: {} ({})",
        part.credit,
        if part.answered { "valid" } else { "invalid" }
    );
    println!(
        "Score: {} / {}",
        format_marks(part.score),
        format_marks(part.marks)
    );
}
