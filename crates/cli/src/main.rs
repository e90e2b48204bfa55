//! rxscan CLI
//!
//! Command-line interface for reading scanned prescriptions: OCR, medicine
//! extraction, and RxNorm validation with drug details.
//!
//! Copyright (c) 2025 Michael A Wright

mod report;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use core_pipeline::{
    correct, ExtractionReport, ImageConditioner, Outcome, PipelineError, RawDocument,
};
use service_bridge::{BridgeConfig, PrescriptionPipeline};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuild host: ",
    env!("BUILT_HOST"),
    "\ncommit: ",
    env!("BUILT_GIT_COMMIT_HASH"),
    "\nbuilt: ",
    env!("BUILT_TIME_UTC"),
);

#[derive(Parser)]
#[command(name = "rxscan", version, long_version = LONG_VERSION)]
#[command(about = "Prescription reader: OCR -> medicine extraction -> RxNorm validation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on a prescription file or a directory of them
    Extract {
        /// Input file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the result files
        #[arg(short, long, default_value = "results")]
        output_dir: PathBuf,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Apply OCR character corrections to a text file
    Correct {
        /// Text file to correct
        #[arg(short, long)]
        input: PathBuf,

        /// Write the corrected text here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Condition an image for OCR and save the result
    Condition {
        /// Source image
        #[arg(short, long)]
        input: PathBuf,

        /// Destination image (format follows the extension)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn exit_code(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::InvalidInput => 2,
        Outcome::NoTextFound => 3,
        Outcome::NoMedicinesRecognized => 4,
        Outcome::ProcessingError => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    debug!(
        "rxscan {} ({}, {} profile, {})",
        built_info::PKG_VERSION,
        built_info::TARGET,
        built_info::PROFILE,
        built_info::RUSTC_VERSION
    );

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            input,
            output_dir,
            json,
        } => run_extract(&input, &output_dir, json).await,
        Commands::Correct { input, output } => run_correct(&input, output.as_deref()),
        Commands::Condition { input, output } => run_condition(&input, &output).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_extract(input: &Path, output_dir: &Path, json: bool) -> Result<ExitCode> {
    let config = BridgeConfig::from_env().context("Failed to load configuration")?;
    let pipeline = PrescriptionPipeline::from_config(&config)?;

    if !input.is_dir() {
        let code = match extract_one(&pipeline, input).await {
            Ok(report) => {
                emit(&report, output_dir, json)?;
                0
            }
            Err(e) => report_failure(input, &e),
        };
        return Ok(ExitCode::from(code));
    }

    let files = collect_inputs(&pipeline, input);
    if files.is_empty() {
        bail!("No supported documents found in {}", input.display());
    }
    info!(
        "Batch of {} documents started at {}",
        files.len(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let mut first_failure = None;
    let mut succeeded = 0;
    for path in &files {
        match extract_one(&pipeline, path).await {
            Ok(report) => {
                emit(&report, &batch_output_dir(input, output_dir, path), json)?;
                succeeded += 1;
            }
            Err(e) => {
                let code = report_failure(path, &e);
                first_failure.get_or_insert(code);
            }
        }
    }

    info!("Batch finished: {}/{} documents processed", succeeded, files.len());
    Ok(ExitCode::from(first_failure.unwrap_or(0)))
}

/// Per-document result directory, named after the file's path under the
/// batch root including its extension
fn batch_output_dir(root: &Path, output_dir: &Path, path: &Path) -> PathBuf {
    let relative = path.strip_prefix(root).unwrap_or(path);
    match relative.file_name() {
        Some(_) => output_dir.join(relative),
        None => output_dir.to_path_buf(),
    }
}

/// Supported files under `dir`, in a stable order
fn collect_inputs(pipeline: &PrescriptionPipeline, dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            let size = entry.metadata().map(|m| m.len() as usize).unwrap_or(0);
            match pipeline.intake().check(&name, size) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    false
                }
            }
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

async fn extract_one(
    pipeline: &PrescriptionPipeline,
    path: &Path,
) -> Result<ExtractionReport, PipelineError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let size = fs::metadata(path)
        .map_err(|e| PipelineError::UnreadableFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?
        .len() as usize;

    let kind = pipeline.intake().check(&name, size)?;
    let document = RawDocument {
        path: path.to_path_buf(),
        kind,
    };
    pipeline.process_file(&document).await
}

fn emit(report: &ExtractionReport, dir: &Path, json: bool) -> Result<()> {
    report::write_exports(dir, report)?;
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report::render(report));
        println!("\nResults saved to {}", dir.display());
    }
    Ok(())
}

fn report_failure(path: &Path, error: &PipelineError) -> u8 {
    let outcome = error.outcome();
    warn!("{}: {}", path.display(), error);
    eprintln!("{}: {}", path.display(), outcome.user_message());
    exit_code(outcome)
}

fn run_correct(input: &Path, output: Option<&Path>) -> Result<ExitCode> {
    let raw = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let corrected = correct(&raw);

    match output {
        Some(path) => {
            fs::write(path, &corrected)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Corrected text written to {}", path.display());
        }
        None => print!("{corrected}"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_condition(input: &Path, output: &Path) -> Result<ExitCode> {
    let conditioner = ImageConditioner::default();
    let source = input.to_path_buf();
    let conditioned = tokio::task::spawn_blocking(move || conditioner.condition(&source))
        .await
        .context("Conditioning task failed")??;

    println!(
        "{}x{} px, contrast {:.1}, brightness {:.1}, strategy {:?}, ~{} KB as JPEG",
        conditioned.width(),
        conditioned.height(),
        conditioned.stats.contrast,
        conditioned.stats.brightness,
        conditioned.strategy,
        conditioned.stats.encoded_size / 1024
    );

    conditioned
        .image
        .save(output)
        .with_context(|| format!("Failed to save {}", output.display()))?;
    println!("Saved {}", output.display());
    Ok(ExitCode::SUCCESS)
}
