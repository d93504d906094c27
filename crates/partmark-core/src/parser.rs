//! TOML question file parser.
//!
//! Loads question definitions from TOML files and directories, and validates
//! them.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::alternatives::alternative_path;
use crate::config::MarkingConfig;
use crate::credit::format_marks;
use crate::model::{
    AlternativeSettings, PartDefinition, PartSettings, QuestionDefinition, ReplacementStrategy,
    VariableReplacementRule,
};
use crate::script::MarkingScript;
use crate::value::Value;

/// Intermediate TOML structure for parsing question files.
#[derive(Debug, Deserialize)]
struct TomlQuestionFile {
    question: TomlQuestionHeader,
    #[serde(default)]
    parts: Vec<TomlPart>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestionHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    /// Notes every part's script is built on.
    #[serde(default)]
    base_script: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlPart {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    marks: Option<f64>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    adaptive_penalty: f64,
    #[serde(default)]
    steps_penalty: f64,
    #[serde(default)]
    min_marks: Option<f64>,
    #[serde(default)]
    max_marks: Option<f64>,
    #[serde(default)]
    settings: toml::Table,
    #[serde(default)]
    replacements: Vec<VariableReplacementRule>,
    #[serde(default)]
    alternatives: Vec<TomlPart>,
    /// Only read on alternatives.
    #[serde(default)]
    feedback_message: String,
    #[serde(default)]
    show_full_feedback: bool,
    #[serde(default)]
    steps: Vec<TomlPart>,
    #[serde(default)]
    gaps: Vec<TomlPart>,
}

struct Defaults<'a> {
    marks: f64,
    strategy: ReplacementStrategy,
    base_script: Option<&'a MarkingScript>,
}

/// Parse a single TOML file into a `QuestionDefinition`.
pub fn parse_question(path: &Path, config: &MarkingConfig) -> Result<QuestionDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read question file: {}", path.display()))?;

    parse_question_str(&content, path, config)
}

/// Parse a TOML string into a `QuestionDefinition` (useful for testing).
pub fn parse_question_str(
    content: &str,
    source_path: &Path,
    config: &MarkingConfig,
) -> Result<QuestionDefinition> {
    let parsed: TomlQuestionFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let base_script = parsed
        .question
        .base_script
        .as_deref()
        .map(MarkingScript::parse)
        .transpose()
        .context("invalid base_script")?;
    let defaults = Defaults {
        marks: config.default_marks,
        strategy: config.default_strategy,
        base_script: base_script.as_ref(),
    };

    let parts = parsed
        .parts
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let path = p.path.clone().unwrap_or_else(|| format!("p{i}"));
            convert_part(p, path, &defaults)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(QuestionDefinition {
        id: parsed.question.id,
        name: parsed.question.name,
        description: parsed.question.description,
        parts,
    })
}

fn convert_part(part: TomlPart, path: String, defaults: &Defaults<'_>) -> Result<PartDefinition> {
    let script = part
        .script
        .as_deref()
        .map(|source| {
            let script = MarkingScript::parse(source)
                .with_context(|| format!("invalid marking script for part {path}"))?;
            Ok::<_, anyhow::Error>(match defaults.base_script {
                Some(base) => script.extend(base),
                None => script,
            })
        })
        .transpose()?;

    let strategy = part
        .strategy
        .map(|s| s.parse::<ReplacementStrategy>().map_err(|e| anyhow::anyhow!("{e}")))
        .transpose()
        .with_context(|| format!("invalid strategy for part {path}"))?
        .unwrap_or(defaults.strategy);

    let settings_json =
        serde_json::to_value(&part.settings).context("failed to convert part settings")?;
    let values = match Value::from_json(&settings_json) {
        Value::Dict(map) => map,
        _ => BTreeMap::new(),
    };

    let gaps = part
        .gaps
        .into_iter()
        .enumerate()
        .map(|(i, g)| {
            let gap_path = g.path.clone().unwrap_or_else(|| format!("{path}g{i}"));
            convert_part(g, gap_path, defaults)
        })
        .collect::<Result<Vec<_>>>()?;
    let steps = part
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let step_path = s.path.clone().unwrap_or_else(|| format!("{path}s{i}"));
            convert_part(s, step_path, defaults)
        })
        .collect::<Result<Vec<_>>>()?;
    let alternatives = part
        .alternatives
        .into_iter()
        .enumerate()
        .map(|(i, a)| {
            let settings = AlternativeSettings {
                feedback_message: a.feedback_message.clone(),
                show_full_feedback: a.show_full_feedback,
            };
            let mut alternative = convert_part(a, alternative_path(&path, i), defaults)?;
            alternative.alternative = Some(settings);
            Ok(alternative)
        })
        .collect::<Result<Vec<_>>>()?;

    // A gap-fill part is worth what its gaps are worth unless it says otherwise.
    let marks = match part.marks {
        Some(marks) => marks,
        None if !gaps.is_empty() => gaps.iter().map(|g| g.marks).sum(),
        None => defaults.marks,
    };

    Ok(PartDefinition {
        marks,
        script,
        settings: PartSettings {
            strategy,
            adaptive_penalty: part.adaptive_penalty,
            steps_penalty: part.steps_penalty,
            min_marks: part.min_marks,
            max_marks: part.max_marks,
            values,
        },
        replacements: part.replacements,
        alternatives,
        alternative: None,
        steps,
        gaps,
        path,
    })
}

/// Recursively load all `.toml` question files from a directory.
pub fn load_question_directory(dir: &Path, config: &MarkingConfig) -> Result<Vec<QuestionDefinition>> {
    let mut questions = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            questions.extend(load_question_directory(&path, config)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_question(&path, config) {
                Ok(question) => questions.push(question),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    questions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(questions)
}

/// A warning from question validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    /// The part path (if applicable).
    pub part_path: Option<String>,
    /// Warning message.
    pub message: String,
}

impl ValidationWarning {
    fn part(path: &str, message: impl Into<String>) -> Self {
        Self {
            part_path: Some(path.to_string()),
            message: message.into(),
        }
    }
}

/// Validate a question for common authoring mistakes.
pub fn validate_question(question: &QuestionDefinition) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let all = question.all_parts();

    if question.parts.is_empty() {
        warnings.push(ValidationWarning {
            part_path: None,
            message: "question has no parts".into(),
        });
    }

    let mut seen = HashSet::new();
    for part in &all {
        if !seen.insert(part.path.as_str()) {
            warnings.push(ValidationWarning::part(
                &part.path,
                format!("duplicate part path: {}", part.path),
            ));
        }
    }

    // Gap-fill parts are marked through their gaps.
    for part in all.iter().filter(|p| !p.is_gapfill()) {
        if part.script.as_ref().and_then(|s| s.get("mark")).is_none() {
            warnings.push(ValidationWarning::part(&part.path, "marking script has no 'mark' note"));
        }
    }

    let sources: HashSet<&str> = all
        .iter()
        .flat_map(|p| &p.replacements)
        .map(|r| r.source_part_path.as_str())
        .collect();
    for part in &all {
        for rule in &part.replacements {
            if rule.source_part_path == part.path {
                warnings.push(ValidationWarning::part(
                    &part.path,
                    format!("replacement for '{}' uses this part's own answer", rule.variable),
                ));
            } else if !seen.contains(rule.source_part_path.as_str()) {
                warnings.push(ValidationWarning::part(
                    &part.path,
                    format!(
                        "replacement for '{}' refers to unknown part '{}'",
                        rule.variable, rule.source_part_path
                    ),
                ));
            }
        }
        if sources.contains(part.path.as_str())
            && part.script.as_ref().and_then(|s| s.get("interpreted_answer")).is_none()
            && !part.is_gapfill()
        {
            warnings.push(ValidationWarning::part(
                &part.path,
                "part is used in a variable replacement but has no 'interpreted_answer' note",
            ));
        }
    }

    for part in &all {
        for alternative in &part.alternatives {
            if alternative.marks <= 0.0 && part.marks > 0.0 {
                warnings.push(ValidationWarning::part(
                    &alternative.path,
                    "alternative is worth no marks and can never be selected",
                ));
            }
        }

        if let (Some(min), Some(max)) = (part.settings.min_marks, part.settings.max_marks) {
            if min > max {
                warnings.push(ValidationWarning::part(
                    &part.path,
                    format!("min_marks ({min}) is greater than max_marks ({max})"),
                ));
            }
        }

        if part.is_gapfill() {
            let gap_total: f64 = part.gaps.iter().map(|g| g.marks).sum();
            if (part.marks - gap_total).abs() > 1e-9 {
                warnings.push(ValidationWarning::part(
                    &part.path,
                    format!(
                        "part is worth {} marks but its gaps add up to {}",
                        format_marks(part.marks),
                        format_marks(gap_total)
                    ),
                ));
            }
        }

        if part.settings.steps_penalty > part.marks {
            warnings.push(ValidationWarning::part(
                &part.path,
                format!(
                    "steps_penalty ({}) is more than the part is worth ({})",
                    part.settings.steps_penalty, part.marks
                ),
            ));
        }
    }

    warnings
}
