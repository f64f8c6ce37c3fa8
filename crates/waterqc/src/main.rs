use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waterqc_core::combine::combine_cleaned;
use waterqc_core::engine::QcEngine;
use waterqc_core::inject::inject_biosensor;

/// Water quality validation and fusion pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about = "Water quality validation and fusion pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the QC rules over every raw file in a directory, writing flagged
    /// and cleaned tables.
    Process {
        #[arg(long)]
        input_dir: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        /// Rule file, reloaded for every file so edits apply between runs.
        #[arg(long, default_value = "dq_rules.yaml")]
        config: PathBuf,
    },
    /// Combine cleaned sonde/biosensor pairs and build aligned outputs.
    Combine {
        #[arg(long)]
        cleaned_dir: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
    },
    /// Merge biosensor readings into a sonde export in place.
    Inject {
        #[arg(long)]
        primary: PathBuf,
        #[arg(long)]
        secondary: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Process {
            input_dir,
            output_dir,
            config,
        } => {
            let engine = QcEngine::new(config, input_dir, output_dir);
            let processed = engine.process_directory_once()?;
            if processed.is_empty() {
                warn!("no files processed");
            }
            for file in &processed {
                info!(
                    "wrote {} and {}",
                    file.flagged.display(),
                    file.cleaned.display()
                );
            }
        }
        Command::Combine {
            cleaned_dir,
            output_dir,
        } => {
            let outputs = combine_cleaned(&cleaned_dir, &output_dir)?;
            if outputs.is_empty() {
                warn!("no cleaned file pairs found in {}", cleaned_dir.display());
            }
            for path in &outputs {
                info!("wrote {}", path.display());
            }
        }
        Command::Inject { primary, secondary } => {
            let summary = inject_biosensor(&primary, secondary.as_deref())?;
            if summary.merged_rows == 0 {
                info!("no rows merged");
            } else {
                info!(
                    "merged {} of {} biosensor rows into {}",
                    summary.merged_rows,
                    summary.total_secondary_rows,
                    primary.display()
                );
            }
            info!("{}", serde_json::to_string(&summary)?);
        }
    }
    Ok(())
}
