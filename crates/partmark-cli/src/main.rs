//! partmark CLI — replay feedback and validate question files.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "partmark", version, about = "Exact-credit marking for multi-part questions")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a list of feedback operations through the ledger
    Replay {
        /// Path to a .toml or .json file of feedback operations
        #[arg(long)]
        ops: PathBuf,

        /// Marks the part is worth (default: from config)
        #[arg(long)]
        marks: Option<f64>,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,

        /// Save the marking report as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Save the marking report under the configured output_dir
        #[arg(long, conflicts_with = "output")]
        save: bool,
    },

    /// Validate question TOML files
    Validate {
        /// Path to a question file or directory
        #[arg(long)]
        questions: PathBuf,
    },

    /// Create starter config and example question
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match partmark_core::config::load_config_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let result = match cli.command {
        Commands::Replay {
            ops,
            marks,
            format,
            output,
            save,
        } => commands::replay::execute(ops, marks, format, output, save, &config),
        Commands::Validate { questions } => commands::validate::execute(questions, &config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
