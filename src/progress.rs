//! Progress reporting for generation runs
//!
//! A spinner while files are being generated, plus console-styled header
//! and summary.

use crate::generate::GenerateReport;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while traversals run
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Show which files are in flight
    pub fn generating(&self, files: &[String], lanes: usize) {
        self.bar.set_message(format!(
            "Generating {} | Lanes per file: {}",
            files.join(", "),
            lanes
        ));
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print one line per generated file and the totals
pub fn print_summary(reports: &[GenerateReport], failed: usize, duration: Duration) {
    let blocks: u64 = reports.iter().map(|r| r.blocks).sum();
    let bytes: u64 = reports.iter().map(|r| r.bytes).sum();
    let peak = reports.iter().map(|r| r.peak_active).max().unwrap_or(0);

    println!();
    if failed == 0 {
        println!("{}", style("Generation Complete").green().bold());
    } else {
        println!("{}", style("Generation Finished With Errors").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());

    for r in reports {
        println!(
            "  {} {} ({}, {} blocks, {:.1}ms)",
            style("Wrote:").bold(),
            r.path.display(),
            format_size(r.bytes, BINARY),
            format_number(r.blocks),
            r.duration.as_secs_f64() * 1000.0
        );
    }

    println!("  {} {}", style("Files:").bold(), reports.len());
    println!("  {} {}", style("Blocks:").bold(), format_number(blocks));
    println!("  {} {}", style("Total Size:").bold(), format_size(bytes, BINARY));
    println!("  {} {}", style("Peak Lanes:").bold(), peak);
    println!(
        "  {} {:.2}s",
        style("Duration:").bold(),
        duration.as_secs_f64()
    );
    if failed > 0 {
        println!("  {} {}", style("Failed Files:").yellow().bold(), failed);
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(descriptors: &str, classes: usize, lanes: usize, output: &str) {
    println!();
    println!(
        "{} {}",
        style("treegen").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} ({} classes)",
        style("Source:").bold(),
        descriptors,
        format_number(classes as u64)
    );
    println!("  {} {}", style("Lanes:").bold(), lanes);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
