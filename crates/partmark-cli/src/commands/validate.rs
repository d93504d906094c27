//! The `partmark validate` command.

use std::path::PathBuf;

use anyhow::Result;

use partmark_core::config::MarkingConfig;

pub fn execute(questions_path: PathBuf, config: &MarkingConfig) -> Result<()> {
    let questions = if questions_path.is_dir() {
        partmark_core::parser::load_question_directory(&questions_path, config)?
    } else {
        vec![partmark_core::parser::parse_question(&questions_path, config)?]
    };

    let mut total_warnings = 0;

    for question in &questions {
        let part_count = question.all_parts().len();
        println!("Question: {} ({part_count} parts)", question.name);

        let warnings = partmark_core::parser::validate_question(question);
        for w in &warnings {
            let prefix = w
                .part_path
                .as_ref()
                .map(|path| format!("  [{path}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All questions valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
