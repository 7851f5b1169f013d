//! treegen - Syntax Tree and Visitor Generator
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treegen::config::{CliArgs, GenerateConfig};
use treegen::parallel::CancellationToken;
use treegen::progress::{print_header, print_summary, ProgressReporter};
use treegen::render::ClassListRenderer;
use treegen::{generate_all, load_descriptors, render_sequential, GenError};

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when some file failed but the run itself completed
fn run() -> Result<bool> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = GenerateConfig::from_args(args).context("Invalid configuration")?;

    let descriptors = load_descriptors(&config.descriptors_path)
        .context("Failed to load class descriptors")?;
    info!(classes = descriptors.len(), "Descriptors loaded");

    let output_dir = config
        .ensure_output_dir()
        .context("Failed to prepare output directory")?;

    if config.show_progress {
        print_header(
            &config.descriptors_path.display().to_string(),
            descriptors.len(),
            config.lanes,
            &output_dir.display().to_string(),
        );
    }

    if config.print_class_list {
        let list = render_sequential(&descriptors, &ClassListRenderer)
            .context("Failed to render class list")?;
        print!("{}", list);
    }

    // Setup signal handler for graceful shutdown
    let cancel = CancellationToken::new();
    let flag = cancel.flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing queued work...");
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let renders = config.renderers();
    let options = config.generate_options(cancel);

    let progress = config.show_progress.then(ProgressReporter::new);
    if let Some(ref p) = progress {
        let files: Vec<String> = renders.iter().map(|r| r.file_name()).collect();
        p.generating(&files, config.lanes);
    }

    let start = Instant::now();
    let results = generate_all(output_dir, &descriptors, &renders, &options);

    let mut reports = Vec::new();
    let mut failed = 0;
    let mut interrupted = false;

    for (render, result) in renders.iter().zip(results) {
        match result {
            Ok(report) => reports.push(report),
            Err(GenError::Interrupted) => {
                interrupted = true;
                failed += 1;
            }
            Err(e) => {
                failed += 1;
                error!(file = %render.file_name(), "{}", e);
            }
        }
    }

    if let Some(ref p) = progress {
        if interrupted {
            p.finish("Generation interrupted");
        } else {
            p.finish_and_clear();
        }
    }

    if config.show_progress {
        print_summary(&reports, failed, start.elapsed());
    }

    if interrupted {
        info!("Generation was interrupted before completion");
    }

    Ok(failed == 0)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("treegen=debug,warn")
    } else {
        EnvFilter::new("treegen=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
