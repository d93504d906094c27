//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn partmark() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("partmark").unwrap()
}

#[test]
fn validate_sequences_question() {
    partmark()
        .arg("validate")
        .arg("--questions")
        .arg("../../questions/sequences.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("6 parts"))
        .stdout(predicate::str::contains("All questions valid"));
}

#[test]
fn validate_directory() {
    partmark()
        .arg("validate")
        .arg("--questions")
        .arg("../../questions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Arithmetic sequences"))
        .stdout(predicate::str::contains("Adding fractions"));
}

#[test]
fn validate_reports_warnings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        r#"
[question]
id = "bad"
name = "Bad"

[[parts]]
script = "interpreted_answer: studentAnswer"
min_marks = 3
max_marks = 1
"#,
    )
    .unwrap();

    partmark()
        .arg("validate")
        .arg("--questions")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[p0] WARNING"))
        .stdout(predicate::str::contains("2 warning(s) found"));
}

#[test]
fn validate_nonexistent_file() {
    partmark()
        .arg("validate")
        .arg("--questions")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn validate_with_missing_config_fails() {
    partmark()
        .arg("validate")
        .arg("--questions")
        .arg("../../questions")
        .arg("--config")
        .arg("no_such_config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn replay_toml_ops() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ops.toml");
    std::fs::write(
        &path,
        r#"
[[ops]]
op = "set_credit"
value = 0.5
message = "Half right."

[[ops]]
op = "add_credit"
delta = 0.25
message = "Units are correct."

[[ops]]
op = "warning"
text = "Check your rounding."
"#,
    )
    .unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&path)
        .arg("--marks")
        .arg("4")
        .assert()
        .success()
        .stdout(predicate::str::contains("Half right."))
        .stdout(predicate::str::contains("Credit: 3/4 (valid)"))
        .stdout(predicate::str::contains("Score: 3 / 4"))
        .stdout(predicate::str::contains("WARNING: Check your rounding."));
}

#[test]
fn replay_invalid_end_scores_zero() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ops.json");
    std::fs::write(
        &path,
        r#"[
            {"op": "set_credit", "value": 1, "message": "Looks right."},
            {"op": "end", "invalid": true},
            {"op": "add_credit", "delta": 1, "message": "never applied"}
        ]"#,
    )
    .unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Credit: 0 (invalid)"))
        .stdout(predicate::str::contains("Score: 0 / 1"))
        .stdout(predicate::str::contains("never applied").not());
}

#[test]
fn replay_json_format_and_output_file() {
    let dir = TempDir::new().unwrap();
    let ops = dir.path().join("ops.json");
    let report = dir.path().join("out").join("report.json");
    std::fs::write(
        &ops,
        r#"{"ops": [
            {"op": "start_lift", "scale": 0.5},
            {"op": "set_credit", "value": 1, "message": "Inner"},
            {"op": "end_lift"}
        ]}"#,
    )
    .unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&ops)
        .arg("--format")
        .arg("json")
        .arg("--output")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"source\""))
        .stdout(predicate::str::contains("\"credit\": 0.5"));

    assert!(report.exists());
}

#[test]
fn replay_markdown_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ops.json");
    std::fs::write(&path, r#"[{"op": "set_credit", "value": 1, "message": "Correct."}]"#).unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&path)
        .arg("--format")
        .arg("markdown")
        .assert()
        .success()
        .stdout(predicate::str::contains("# Marking report"))
        .stdout(predicate::str::contains("- Correct. (+1 mark)"));
}

#[test]
fn replay_unbalanced_lift_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ops.json");
    std::fs::write(&path, r#"[{"op": "start_lift", "scale": 1}]"#).unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("lift"));
}

#[test]
fn replay_uses_config_default_marks() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("partmark.toml");
    let ops = dir.path().join("ops.json");
    std::fs::write(&config, "default_marks = 5\n").unwrap();
    std::fs::write(&ops, r#"[{"op": "set_credit", "value": 0.2}]"#).unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&ops)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Score: 1 / 5"));
}

#[test]
fn replay_save_writes_under_output_dir() {
    let dir = TempDir::new().unwrap();
    let results = dir.path().join("results");
    let config = dir.path().join("partmark.toml");
    let ops = dir.path().join("ops.json");
    std::fs::write(&config, format!("output_dir = {:?}\n", results.display().to_string())).unwrap();
    std::fs::write(&ops, r#"[{"op": "set_credit", "value": 1}]"#).unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&ops)
        .arg("--config")
        .arg(&config)
        .arg("--save")
        .assert()
        .success()
        .stderr(predicate::str::contains("Report saved to"));

    let saved: Vec<_> = std::fs::read_dir(&results).unwrap().collect();
    assert_eq!(saved.len(), 1);
}

#[test]
fn replay_exact_fraction_credit_from_toml() {
    let dir = TempDir::new().unwrap();
    let ops = dir.path().join("ops.toml");
    std::fs::write(
        &ops,
        r#"
[[ops]]
op = "add_credit"
delta = "1/3"
message = "One third."

[[ops]]
op = "add_credit"
delta = "2/3"
message = "Two thirds."
"#,
    )
    .unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&ops)
        .arg("--marks")
        .arg("3")
        .assert()
        .success()
        .stdout(predicate::str::contains("Credit: 1 (valid)"))
        .stdout(predicate::str::contains("Score: 3 / 3"));
}

#[test]
fn replay_zero_denominator_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ops = dir.path().join("ops.json");
    std::fs::write(&ops, r#"[{"op": "set_credit", "value": "1/0"}]"#).unwrap();

    partmark()
        .arg("replay")
        .arg("--ops")
        .arg(&ops)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse JSON"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    partmark()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created partmark.toml"))
        .stdout(predicate::str::contains("Created questions/example.toml"));

    assert!(dir.path().join("partmark.toml").exists());
    assert!(dir.path().join("questions/example.toml").exists());

    partmark()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--questions")
        .arg("questions/example.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("All questions valid"));
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    partmark()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    partmark()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn help_output() {
    partmark()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exact-credit marking"));
}

#[test]
fn version_output() {
    partmark()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("partmark"));
}
