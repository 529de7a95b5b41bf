use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use testprof::callgrind::write_callgrind;
use testprof::cli::{Cli, Command};
use testprof::harness::init_tracing;
use testprof::render::{CommandSpec, GraphvizPipeline, Render};
use testprof::stats::{SortKey, Stats};

fn show(file: &Path, sort: SortKey, limit: usize, keep_dirs: bool) -> Result<()> {
    let mut stats = Stats::load(file)?;
    if !keep_dirs {
        stats.strip_dirs();
    }
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Profiling (from {}):", file.display())?;
    stats.sort_stats(sort).print_stats(&mut out, Some(limit))?;
    Ok(())
}

fn merge(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let merged = Stats::merge_files(inputs)?;
    merged.dump(output)?;
    println!(
        "Merged {} profiles ({} functions) into {}",
        inputs.len(),
        merged.len(),
        output.display()
    );
    Ok(())
}

fn render(file: &Path, output: &Path, converter: &str, renderer: &str) -> Result<()> {
    let converter = CommandSpec::parse(converter).context("--converter must not be empty")?;
    let renderer = CommandSpec::parse(renderer).context("--renderer must not be empty")?;
    let stats = Stats::load(file)?;
    GraphvizPipeline::new(converter, renderer).render(&stats, output)?;
    println!("SVG profile in {}.", output.display());
    Ok(())
}

fn callgrind(file: &Path, output: Option<&Path>) -> Result<()> {
    let stats = Stats::load(file)?;
    match output {
        Some(path) => {
            let out = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut out = BufWriter::new(out);
            write_callgrind(&stats, &mut out)?;
            out.flush()?;
        }
        None => {
            let stdout = io::stdout();
            write_callgrind(&stats, &mut stdout.lock())?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Show {
            file,
            sort,
            limit,
            keep_dirs,
        } => show(&file, sort, limit, keep_dirs),
        Command::Merge { output, inputs } => merge(&output, &inputs),
        Command::Render {
            file,
            output,
            converter,
            renderer,
        } => render(&file, &output, &converter, &renderer),
        Command::Callgrind { file, output } => callgrind(&file, output.as_deref()),
    }
}
