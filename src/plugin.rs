//! Profiling session recorder
//!
//! [`ProfilingPlugin`] hooks into the harness lifecycle:
//!
//! - session start: create the output directory
//! - each test call: capture the whole downstream chain under a profiler,
//!   either a fresh one per test (dumped to `<dir>/<test>.prof`) or the one
//!   shared profiler in combined-only mode
//! - session finish: merge everything into `<dir>/combined.prof` and
//!   optionally render `<dir>/combined.svg`
//! - terminal summary: print the top entries of the combined profile
//!
//! The shared profiler is plain mutable state. That is only sound because the
//! harness runs tests sequentially on one thread.

use anyhow::Result;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::capture::Profiler;
use crate::config::{ProfilingConfig, SUMMARY_LIMIT};
use crate::error::ProfileError;
use crate::harness::{ExitStatus, HookPriority, Next, Plugin, TestItem, TestOutcome};
use crate::render::{GraphvizPipeline, Render};
use crate::sanitize::clean_filename;
use crate::stats::{SortKey, Stats};

/// Records per-test and combined profiles for a test session
pub struct ProfilingPlugin {
    config: ProfilingConfig,
    /// Per-test profiles in execution order
    profile_paths: Vec<PathBuf>,
    /// Present only in combined-only mode
    shared: Option<Profiler>,
    combined_path: Option<PathBuf>,
    svg_path: Option<PathBuf>,
    renderer: Box<dyn Render>,
}

impl ProfilingPlugin {
    pub fn new(config: ProfilingConfig) -> Self {
        let shared = config.combined_only.then(Profiler::new);
        Self {
            config,
            profile_paths: Vec::new(),
            shared,
            combined_path: None,
            svg_path: None,
            renderer: Box::new(GraphvizPipeline::default()),
        }
    }

    /// Replace the default gprof2dot/dot pipeline
    pub fn with_renderer(mut self, renderer: impl Render + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    /// Per-test profile files written so far, in execution order
    pub fn profile_paths(&self) -> &[PathBuf] {
        &self.profile_paths
    }

    /// The combined profile, once session finish has written it
    pub fn combined_path(&self) -> Option<&Path> {
        self.combined_path.as_deref()
    }

    /// The rendered call graph, once session finish has written it
    pub fn svg_path(&self) -> Option<&Path> {
        self.svg_path.as_deref()
    }

    fn combined_stats(&self) -> Result<Option<Stats>> {
        if let Some(shared) = &self.shared {
            return Ok(Some(shared.stats()));
        }
        if self.profile_paths.is_empty() {
            return Ok(None);
        }
        Ok(Some(Stats::merge_files(self.profile_paths.as_slice())?))
    }
}

impl Plugin for ProfilingPlugin {
    fn name(&self) -> &'static str {
        "profiling"
    }

    /// Outermost wrapper, so other plugins' overhead lands inside the profile
    fn priority(&self) -> HookPriority {
        HookPriority::TryFirst
    }

    fn session_start(&mut self) -> Result<()> {
        let dir = self.config.output_dir();
        match fs::create_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(ProfileError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                }
                .into())
            }
        }
        tracing::debug!(dir = %dir.display(), "profile output directory ready");
        Ok(())
    }

    fn call_test(&mut self, item: &TestItem, next: &mut Next<'_>) -> Result<TestOutcome> {
        let key = item.function_key();

        if let Some(shared) = self.shared.as_mut() {
            return shared.runcall(&key, next);
        }

        let mut profiler = Profiler::new();
        let outcome = profiler.runcall(&key, next)?;

        let path = self.config.profile_path(&clean_filename(&item.name));
        profiler.dump_stats(&path)?;
        tracing::debug!(test = %item.name, path = %path.display(), "saved test profile");
        self.profile_paths.push(path);
        Ok(outcome)
    }

    fn session_finish(&mut self, status: ExitStatus) -> Result<()> {
        let Some(combined) = self.combined_stats()? else {
            tracing::debug!(?status, "no tests were profiled");
            return Ok(());
        };

        let combined_path = self.config.combined_path();
        combined.dump(&combined_path)?;
        tracing::info!(
            path = %combined_path.display(),
            tests = self.profile_paths.len(),
            functions = combined.len(),
            "wrote combined profile"
        );
        self.combined_path = Some(combined_path);

        if self.config.svg {
            let svg_path = self.config.svg_path();
            self.renderer.render(&combined, &svg_path)?;
            self.svg_path = Some(svg_path);
        }
        Ok(())
    }

    fn terminal_summary(&mut self, out: &mut dyn Write) -> Result<()> {
        if let Some(path) = &self.combined_path {
            writeln!(out, "Profiling (from {}):", path.display())?;
            Stats::load(path)?
                .strip_dirs()
                .sort_stats(SortKey::Cumulative)
                .print_stats(out, Some(SUMMARY_LIMIT))?;
        }
        if let Some(path) = &self.svg_path {
            writeln!(out, "SVG profile in {}.", path.display())?;
        }
        Ok(())
    }
}
