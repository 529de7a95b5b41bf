//! Profiling session configuration

use std::path::{Path, PathBuf};

/// Directory that receives all profile output, relative to the working directory
pub const DEFAULT_OUTPUT_DIR: &str = "prof";
/// File name of the merged profile
pub const COMBINED_PROFILE: &str = "combined.prof";
/// File name of the rendered call graph
pub const COMBINED_SVG: &str = "combined.svg";
/// Extension of per-test profiles
pub const PROFILE_EXTENSION: &str = "prof";
/// Rows shown in the terminal summary
pub const SUMMARY_LIMIT: usize = 20;

/// Settings for one profiling session, fixed once the session starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingConfig {
    /// Share one profiler across all tests and only write the combined profile
    pub combined_only: bool,
    /// Render the combined profile to an SVG call graph
    pub svg: bool,
    pub output_dir: PathBuf,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            combined_only: false,
            svg: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl ProfilingConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_combined_only(mut self, combined_only: bool) -> Self {
        self.combined_only = combined_only;
        self
    }

    pub fn with_svg(mut self, svg: bool) -> Self {
        self.svg = svg;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<output_dir>/<name>.prof`
    pub fn profile_path(&self, sanitized_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", sanitized_name, PROFILE_EXTENSION))
    }

    pub fn combined_path(&self) -> PathBuf {
        self.output_dir.join(COMBINED_PROFILE)
    }

    pub fn svg_path(&self) -> PathBuf {
        self.output_dir.join(COMBINED_SVG)
    }
}
