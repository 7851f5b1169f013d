//! Configuration types for treegen
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation

use crate::error::ConfigError;
use crate::generate::GenerateOptions;
use crate::parallel::pool::MAX_LANES;
use crate::parallel::serializer::DEFAULT_CHANNEL_SIZE;
use crate::parallel::CancellationToken;
use crate::render::{Flavor, Render};
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Type names accepted for the generated parallel visitor
static TYPE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("Invalid type name regex"));

/// Generate syntax tree nodes and visitors from class descriptors
#[derive(Parser, Debug, Clone)]
#[command(
    name = "treegen",
    version,
    about = "Generate syntax tree nodes and visitors from class descriptors",
    long_about = "Reads a JSON list of class descriptors and writes node structs and visitor\n\
                  sources. Descriptors are rendered concurrently on a fixed set of lanes; every\n\
                  output file is written through a single writer so blocks never interleave.",
    after_help = "EXAMPLES:\n    \
        treegen grammar.json -o src/syntax\n    \
        treegen grammar.json -l 8 -f parallel-visitor --visitor-name ThreadedVisitor\n    \
        treegen grammar.json --print-class-list -f class-list --no-overwrite"
)]
pub struct CliArgs {
    /// Class descriptor file (JSON)
    #[arg(value_name = "DESCRIPTORS")]
    pub descriptors: PathBuf,

    /// Directory for generated files (created if missing)
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Number of lanes rendering in parallel
    #[arg(
        short = 'l',
        long,
        default_value_t = default_lanes(),
        value_name = "NUM"
    )]
    pub lanes: usize,

    /// Output flavor (can be repeated)
    #[arg(short = 'f', long = "flavor", value_enum, action = clap::ArgAction::Append)]
    pub flavors: Vec<Flavor>,

    /// Fail instead of replacing existing files
    #[arg(long)]
    pub no_overwrite: bool,

    /// Type name of the generated parallel visitor
    #[arg(long, default_value = "ParallelVisitor", value_name = "NAME")]
    pub visitor_name: String,

    /// Writer queue capacity in blocks
    #[arg(long, default_value_t = DEFAULT_CHANNEL_SIZE, value_name = "NUM")]
    pub channel_size: usize,

    /// Print the class list to stdout before generating
    #[arg(long)]
    pub print_class_list: bool,

    /// Quiet mode - suppress header and summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_lanes() -> usize {
    crate::parallel::pool::default_lanes()
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Descriptor file
    pub descriptors_path: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Lanes per traversal
    pub lanes: usize,

    /// Flavors to generate, deduplicated, in request order
    pub flavors: Vec<Flavor>,

    /// Refuse to replace existing files
    pub no_overwrite: bool,

    /// Generated parallel visitor type name
    pub visitor_name: String,

    /// Writer queue capacity
    pub channel_size: usize,

    /// Print the class list first
    pub print_class_list: bool,

    /// Show header and summary
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl GenerateConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.lanes == 0 || args.lanes > MAX_LANES {
            return Err(ConfigError::InvalidLaneCount {
                count: args.lanes,
                max: MAX_LANES,
            });
        }

        if !TYPE_NAME_REGEX.is_match(&args.visitor_name) {
            return Err(ConfigError::InvalidName {
                name: args.visitor_name.clone(),
                reason: "must be an UpperCamelCase identifier".to_string(),
            });
        }

        if args.output_dir.exists() && !args.output_dir.is_dir() {
            return Err(ConfigError::InvalidOutputDir {
                path: args.output_dir.clone(),
                reason: "exists but is not a directory".to_string(),
            });
        }

        let mut flavors = Vec::new();
        for flavor in args.flavors {
            if !flavors.contains(&flavor) {
                flavors.push(flavor);
            }
        }
        if flavors.is_empty() {
            flavors = Flavor::DEFAULT.to_vec();
        }

        // the parallel visitor's file follows its type name, which can land on
        // another flavor's fixed file name
        let mut claimed: Vec<(Flavor, String)> = Vec::new();
        for &flavor in &flavors {
            let file = flavor.renderer(&args.visitor_name).file_name();
            if let Some((other, _)) = claimed.iter().find(|(_, f)| *f == file) {
                return Err(ConfigError::InvalidName {
                    name: args.visitor_name.clone(),
                    reason: format!("flavors '{}' and '{}' would both write '{}'", other, flavor, file),
                });
            }
            claimed.push((flavor, file));
        }

        Ok(Self {
            descriptors_path: args.descriptors,
            output_dir: args.output_dir,
            lanes: args.lanes,
            flavors,
            no_overwrite: args.no_overwrite,
            visitor_name: args.visitor_name,
            channel_size: args.channel_size.max(1),
            print_class_list: args.print_class_list,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Create the output directory if it does not exist yet
    pub fn ensure_output_dir(&self) -> Result<&Path, ConfigError> {
        if !self.output_dir.exists() {
            std::fs::create_dir_all(&self.output_dir).map_err(|e| {
                ConfigError::InvalidOutputDir {
                    path: self.output_dir.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(self.output_dir.as_path())
    }

    /// One renderer per requested flavor
    pub fn renderers(&self) -> Vec<Arc<dyn Render>> {
        self.flavors
            .iter()
            .map(|f| f.renderer(&self.visitor_name))
            .collect()
    }

    pub fn generate_options(&self, cancel: CancellationToken) -> GenerateOptions {
        GenerateOptions {
            lanes: self.lanes,
            no_overwrite: self.no_overwrite,
            channel_size: self.channel_size,
            cancel,
        }
    }
}
