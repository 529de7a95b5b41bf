//! Call graph rendering through external tools
//!
//! The default [`GraphvizPipeline`] is a two-stage process pipeline:
//!
//! ```text
//! callgrind export ─stdin─▶ gprof2dot -f callgrind ─stdout─▶ dot -Tsvg ─stdout─▶ <out>.svg
//! ```
//!
//! Both programs must be on `PATH`. A missing program or a failing stage is
//! an error; a partially written output file is left in place.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::callgrind::write_callgrind;
use crate::error::{ProfileError, Result};
use crate::stats::Stats;

/// Turns statistics into an image file
pub trait Render {
    fn render(&self, stats: &Stats, out: &Path) -> Result<()>;
}

/// A program plus its fixed arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace, e.g. `"gprof2dot -f callgrind"`
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    fn spawn(&self, stdin: Stdio, stdout: Stdio) -> Result<Child> {
        tracing::debug!(program = %self.program, args = ?self.args, "spawning render stage");
        Command::new(&self.program)
            .args(&self.args)
            .stdin(stdin)
            .stdout(stdout)
            .spawn()
            .map_err(|source| ProfileError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

/// gprof2dot piped into Graphviz `dot`
#[derive(Debug, Clone)]
pub struct GraphvizPipeline {
    pub converter: CommandSpec,
    pub renderer: CommandSpec,
}

impl Default for GraphvizPipeline {
    fn default() -> Self {
        Self {
            converter: CommandSpec::new("gprof2dot", ["-f", "callgrind"]),
            renderer: CommandSpec::new("dot", ["-Tsvg"]),
        }
    }
}

impl GraphvizPipeline {
    pub fn new(converter: CommandSpec, renderer: CommandSpec) -> Self {
        Self {
            converter,
            renderer,
        }
    }
}

impl Render for GraphvizPipeline {
    fn render(&self, stats: &Stats, out: &Path) -> Result<()> {
        let mut converter = self.converter.spawn(Stdio::piped(), Stdio::piped())?;
        let (Some(mut stdin), Some(graph)) = (converter.stdin.take(), converter.stdout.take())
        else {
            let _ = converter.kill();
            let _ = converter.wait();
            return Err(ProfileError::io(
                &self.converter.program,
                std::io::Error::other("converter stdio was not captured"),
            ));
        };

        let image = match File::create(out) {
            Ok(file) => file,
            Err(e) => {
                let _ = converter.kill();
                let _ = converter.wait();
                return Err(ProfileError::io(out, e));
            }
        };
        let mut renderer = match self.renderer.spawn(Stdio::from(graph), Stdio::from(image)) {
            Ok(child) => child,
            Err(e) => {
                let _ = converter.kill();
                let _ = converter.wait();
                return Err(e);
            }
        };

        let written = write_callgrind(stats, &mut stdin).and_then(|()| stdin.flush());
        drop(stdin);

        let converter_status = converter
            .wait()
            .map_err(|e| ProfileError::io(&self.converter.program, e))?;
        let renderer_status = renderer
            .wait()
            .map_err(|e| ProfileError::io(&self.renderer.program, e))?;

        // A dead renderer also takes the converter down with a broken pipe
        if !renderer_status.success() {
            return Err(ProfileError::PipelineFailed {
                stage: self.renderer.program.clone(),
                status: renderer_status,
            });
        }
        if !converter_status.success() {
            return Err(ProfileError::PipelineFailed {
                stage: self.converter.program.clone(),
                status: converter_status,
            });
        }
        written.map_err(|e| ProfileError::io(&self.converter.program, e))?;

        tracing::info!(path = %out.display(), "rendered call graph");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::FunctionKey;
    use tempfile::TempDir;

    fn stats() -> Stats {
        let mut profiler = crate::capture::Profiler::new();
        profiler.runcall(&FunctionKey::new("suite.rs", 1, "test_render"), || {});
        profiler.stats()
    }

    #[test]
    fn test_command_spec_parse() {
        let spec = CommandSpec::parse("gprof2dot -f callgrind").unwrap();
        assert_eq!(spec.program, "gprof2dot");
        assert_eq!(spec.args, vec!["-f", "callgrind"]);
        assert!(CommandSpec::parse("   ").is_none());
    }

    #[test]
    fn test_default_pipeline_programs() {
        let pipeline = GraphvizPipeline::default();
        assert_eq!(pipeline.converter.program, "gprof2dot");
        assert_eq!(pipeline.renderer, CommandSpec::new("dot", ["-Tsvg"]));
    }

    #[test]
    fn test_pipeline_passes_data_through() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("graph.svg");
        let pipeline = GraphvizPipeline::new(
            CommandSpec::new("cat", Vec::<String>::new()),
            CommandSpec::new("cat", Vec::<String>::new()),
        );
        pipeline.render(&stats(), &out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("# callgrind format"));
        assert!(text.contains("test_render"));
    }

    #[test]
    fn test_missing_converter_is_error() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("graph.svg");
        let pipeline = GraphvizPipeline::new(
            CommandSpec::new("testprof-no-such-converter", Vec::<String>::new()),
            CommandSpec::new("cat", Vec::<String>::new()),
        );
        let err = pipeline.render(&stats(), &out).unwrap_err();
        assert!(matches!(err, ProfileError::Spawn { ref program, .. } if program == "testprof-no-such-converter"));
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_renderer_is_error() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("graph.svg");
        let pipeline = GraphvizPipeline::new(
            CommandSpec::new("cat", Vec::<String>::new()),
            CommandSpec::new("testprof-no-such-renderer", Vec::<String>::new()),
        );
        let err = pipeline.render(&stats(), &out).unwrap_err();
        assert!(matches!(err, ProfileError::Spawn { .. }));
    }

    #[test]
    fn test_failing_stage_is_error() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("graph.svg");
        let pipeline = GraphvizPipeline::new(
            CommandSpec::new("cat", Vec::<String>::new()),
            CommandSpec::new("false", Vec::<String>::new()),
        );
        let err = pipeline.render(&stats(), &out).unwrap_err();
        assert!(
            matches!(err, ProfileError::PipelineFailed { ref stage, .. } if stage == "false"),
            "unexpected error: {err}"
        );
    }
}
