//! The `partmark init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("partmark.toml").exists() {
        println!("partmark.toml already exists, skipping.");
    } else {
        std::fs::write("partmark.toml", SAMPLE_CONFIG)?;
        println!("Created partmark.toml");
    }

    std::fs::create_dir_all("questions")?;
    let example_path = Path::new("questions/example.toml");
    if example_path.exists() {
        println!("questions/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_QUESTION)?;
        println!("Created questions/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit questions/example.toml");
    println!("  2. Run: partmark validate --questions questions/example.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# partmark configuration

# Strategy for parts that do not set one: "original-first" or "always-replace".
default_strategy = "original-first"
default_marks = 1.0
log_filter = "partmark=info"
output_dir = "./partmark-results"
"#;

const EXAMPLE_QUESTION: &str = r#"[question]
id = "example"
name = "Example question"
description = "Find a root, then use it."
base_script = """
interpreted_answer: studentAnswer
"""

[[parts]]
marks = 2
script = """
mark (is the root right?): check_root(studentAnswer)
"""

[[parts]]
marks = 2
strategy = "original-first"
adaptive_penalty = 1
script = """
mark: check_double(studentAnswer)
"""

[[parts.replacements]]
variable = "root"
part = "p0"

[[parts.alternatives]]
marks = 1
script = "mark: check_half(studentAnswer)"
feedback_message = "You halved the root instead of doubling it."
"#;
