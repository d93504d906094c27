//! Marking configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::ReplacementStrategy;

/// Top-level partmark configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkingConfig {
    /// Strategy for parts that do not name one.
    #[serde(default)]
    pub default_strategy: ReplacementStrategy,
    /// Marks for parts that do not give any.
    #[serde(default = "default_marks")]
    pub default_marks: f64,
    /// Default `tracing` filter directive.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Output directory for marking reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_marks() -> f64 {
    1.0
}
fn default_log_filter() -> String {
    "partmark=info".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./partmark-results")
}

impl Default for MarkingConfig {
    fn default() -> Self {
        Self {
            default_strategy: ReplacementStrategy::default(),
            default_marks: default_marks(),
            log_filter: default_log_filter(),
            output_dir: default_output_dir(),
        }
    }
}

/// Expand `${VAR_NAME}` references in a string. Unset variables expand to
/// nothing.
pub fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut from = 0;
    while let Some(offset) = result[from..].find("${") {
        let start = from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let name = &result[start + 2..start + end];
        let value = std::env::var(name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        from = start + value.len();
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `partmark.toml` in the current directory
/// 2. `~/.config/partmark/config.toml`
///
/// Environment variable overrides: `PARTMARK_STRATEGY`, `PARTMARK_LOG`,
/// `PARTMARK_OUTPUT_DIR`.
pub fn load_config() -> Result<MarkingConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<MarkingConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("partmark.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|home| home.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => MarkingConfig::default(),
    };

    if let Ok(strategy) = std::env::var("PARTMARK_STRATEGY") {
        config.default_strategy = strategy
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("invalid PARTMARK_STRATEGY")?;
    }
    if let Ok(filter) = std::env::var("PARTMARK_LOG") {
        config.log_filter = filter;
    }
    if let Ok(dir) = std::env::var("PARTMARK_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }

    Ok(config)
}

/// Parse config text, expanding `${VAR}` references in string values.
pub fn parse_config(content: &str) -> Result<MarkingConfig> {
    let mut config: MarkingConfig = toml::from_str(content)?;
    config.log_filter = resolve_env_vars(&config.log_filter);
    config.output_dir = PathBuf::from(resolve_env_vars(&config.output_dir.to_string_lossy()));
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("partmark"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_PARTMARK_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_PARTMARK_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_PARTMARK_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_PARTMARK_UNSET_VAR}x"), "x");
        assert_eq!(resolve_env_vars("no close ${brace"), "no close ${brace");
        std::env::remove_var("_PARTMARK_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = MarkingConfig::default();
        assert_eq!(config.default_strategy, ReplacementStrategy::OriginalFirst);
        assert_eq!(config.default_marks, 1.0);
        assert_eq!(config.log_filter, "partmark=info");
        assert_eq!(config.output_dir, PathBuf::from("./partmark-results"));
    }

    #[test]
    fn parse_partial_config() {
        let config = parse_config(
            r#"
default_strategy = "always-replace"
default_marks = 2.5
"#,
        )
        .unwrap();
        assert_eq!(config.default_strategy, ReplacementStrategy::AlwaysReplace);
        assert_eq!(config.default_marks, 2.5);
        assert_eq!(config.log_filter, "partmark=info");
    }

    #[test]
    fn parse_config_expands_env_vars() {
        std::env::set_var("_PARTMARK_TEST_DIR", "/tmp/marks");
        let config = parse_config("output_dir = \"${_PARTMARK_TEST_DIR}/out\"\n").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/marks/out"));
        std::env::remove_var("_PARTMARK_TEST_DIR");
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partmark.toml");
        std::fs::write(&path, "default_marks = 3.0\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.default_marks, 3.0);
    }
}
