//! CLI argument parsing for testprof

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ProfilingConfig, SUMMARY_LIMIT};
use crate::stats::SortKey;

/// Profiling options accepted by a test binary running under the harness
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
#[command(next_help_heading = "Profiling")]
pub struct ProfilingArgs {
    /// Generate profiling information
    #[arg(long = "profile")]
    pub profile: bool,

    /// Only generate the combined profile file
    #[arg(long = "profile-combined-only")]
    pub combined_only: bool,

    /// Generate profiling graph (using gprof2dot and dot -Tsvg)
    #[arg(long = "profile-svg")]
    pub svg: bool,
}

impl ProfilingArgs {
    /// Profiling runs when either `--profile` or `--profile-svg` is given
    pub fn enabled(&self) -> bool {
        self.profile || self.svg
    }

    pub fn to_config(&self) -> ProfilingConfig {
        ProfilingConfig::default()
            .with_combined_only(self.combined_only)
            .with_svg(self.svg)
    }
}

#[derive(Parser, Debug)]
#[command(name = "testprof")]
#[command(version)]
#[command(about = "Inspect, merge and render testprof profile files", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the statistics table of a profile
    Show {
        /// Profile file (.prof)
        file: PathBuf,

        /// Sort order
        #[arg(long, value_enum, default_value = "cumulative")]
        sort: SortKey,

        /// Maximum number of rows
        #[arg(long, default_value_t = SUMMARY_LIMIT)]
        limit: usize,

        /// Keep directory prefixes in file names
        #[arg(long)]
        keep_dirs: bool,
    },

    /// Merge several profiles into one, in the order given
    Merge {
        /// Output file
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,

        /// Input profiles
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Render a profile to an SVG call graph
    Render {
        /// Profile file (.prof)
        file: PathBuf,

        /// Output image
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,

        /// Converter command reading callgrind on stdin
        #[arg(long, default_value = "gprof2dot -f callgrind")]
        converter: String,

        /// Renderer command reading the converter's output on stdin
        #[arg(long, default_value = "dot -Tsvg")]
        renderer: String,
    },

    /// Export a profile in callgrind format
    Callgrind {
        /// Profile file (.prof)
        file: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
    },
}
