//! Call-graph profile statistics
//!
//! A [`Stats`] value is the unit that gets persisted to `.prof` files,
//! merged into the combined profile and printed in the terminal summary.
//! Entries are keyed by [`FunctionKey`] and carry call counts, self time,
//! cumulative time and the per-caller breakdown.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{ProfileError, Result};

/// Version written into every `.prof` document
pub const FORMAT_VERSION: u32 = 1;

/// Identifies a profiled function by source location and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub file: String,
    pub line: u32,
    pub name: String,
}

impl FunctionKey {
    pub fn new(file: impl Into<String>, line: u32, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            name: name.into(),
        }
    }

    /// Same key with the directory part of `file` removed
    pub fn strip_dirs(&self) -> Self {
        let file = Path::new(&self.file)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.clone());
        Self {
            file,
            line: self.line,
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.file, self.line, self.name)
    }
}

/// Call counts and timing (seconds) for a function or a caller edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    /// Every call, including recursive re-entries
    pub calls: u64,
    /// Calls that were not recursive re-entries
    pub primitive_calls: u64,
    /// Time spent in the function itself, excluding callees
    pub total_time: f64,
    /// Time spent in the function including callees
    pub cumulative_time: f64,
}

impl CallStats {
    pub fn add(&mut self, other: &CallStats) {
        self.calls += other.calls;
        self.primitive_calls += other.primitive_calls;
        self.total_time += other.total_time;
        self.cumulative_time += other.cumulative_time;
    }
}

/// Statistics for a single function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionStats {
    pub totals: CallStats,
    /// Calls into this function broken down by caller
    pub callers: BTreeMap<FunctionKey, CallStats>,
}

impl FunctionStats {
    fn add(&mut self, other: &FunctionStats) {
        self.totals.add(&other.totals);
        for (caller, edge) in &other.callers {
            self.callers.entry(caller.clone()).or_default().add(edge);
        }
    }
}

/// Ordering used when printing statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortKey {
    /// Cumulative time, descending
    Cumulative,
    /// Self time, descending
    Tottime,
    /// Call count, descending
    Calls,
    /// Function name, ascending
    Name,
    /// File name then line, ascending
    File,
}

impl SortKey {
    fn describe(self) -> &'static str {
        match self {
            SortKey::Cumulative => "cumulative time",
            SortKey::Tottime => "internal time",
            SortKey::Calls => "call count",
            SortKey::Name => "function name",
            SortKey::File => "file name",
        }
    }
}

/// Profile statistics for one or more captures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    entries: BTreeMap<FunctionKey, FunctionStats>,
    sort: Option<SortKey>,
}

/// On-disk layout of a `.prof` file
#[derive(Debug, Serialize, Deserialize)]
struct ProfileDocument {
    version: u32,
    functions: Vec<FunctionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionRecord {
    #[serde(flatten)]
    function: FunctionKey,
    #[serde(flatten)]
    stats: CallStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    callers: Vec<CallerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallerRecord {
    #[serde(flatten)]
    function: FunctionKey,
    #[serde(flatten)]
    stats: CallStats,
}

impl Stats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: BTreeMap<FunctionKey, FunctionStats>) -> Self {
        Self {
            entries,
            sort: None,
        }
    }

    /// Load statistics from a `.prof` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ProfileError::io(path, e))?;
        let doc: ProfileDocument =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                ProfileError::Decode {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        if doc.version != FORMAT_VERSION {
            return Err(ProfileError::UnsupportedVersion {
                path: path.to_path_buf(),
                expected: FORMAT_VERSION,
                found: doc.version,
            });
        }

        let mut stats = Stats::new();
        for record in doc.functions {
            let entry = stats.entries.entry(record.function).or_default();
            entry.totals.add(&record.stats);
            for caller in record.callers {
                entry
                    .callers
                    .entry(caller.function)
                    .or_default()
                    .add(&caller.stats);
            }
        }
        tracing::debug!(path = %path.display(), functions = stats.len(), "loaded profile");
        Ok(stats)
    }

    /// Write statistics to a `.prof` file, replacing any existing file
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let doc = ProfileDocument {
            version: FORMAT_VERSION,
            functions: self
                .entries
                .iter()
                .map(|(key, stats)| FunctionRecord {
                    function: key.clone(),
                    stats: stats.totals,
                    callers: stats
                        .callers
                        .iter()
                        .map(|(caller, edge)| CallerRecord {
                            function: caller.clone(),
                            stats: *edge,
                        })
                        .collect(),
                })
                .collect(),
        };

        let file = File::create(path).map_err(|e| ProfileError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &doc).map_err(|e| ProfileError::io(path, e.into()))?;
        writer.flush().map_err(|e| ProfileError::io(path, e))?;
        tracing::debug!(path = %path.display(), functions = self.len(), "wrote profile");
        Ok(())
    }

    /// Load the first file and fold every following file into it, in order
    pub fn merge_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let (first, rest) = paths.split_first().ok_or(ProfileError::NothingToMerge)?;
        let mut combined = Stats::load(first)?;
        for path in rest {
            combined.add(&Stats::load(path)?);
        }
        Ok(combined)
    }

    /// Merge another profile into this one
    pub fn add(&mut self, other: &Stats) -> &mut Self {
        for (key, stats) in &other.entries {
            self.entries.entry(key.clone()).or_default().add(stats);
        }
        self
    }

    /// Drop directory prefixes from file names, merging entries that collide
    pub fn strip_dirs(&mut self) -> &mut Self {
        let entries = std::mem::take(&mut self.entries);
        for (key, stats) in entries {
            let entry = self.entries.entry(key.strip_dirs()).or_default();
            entry.totals.add(&stats.totals);
            for (caller, edge) in stats.callers {
                entry.callers.entry(caller.strip_dirs()).or_default().add(&edge);
            }
        }
        self
    }

    /// Select the ordering used by [`Stats::sorted`] and [`Stats::print_stats`]
    pub fn sort_stats(&mut self, key: SortKey) -> &mut Self {
        self.sort = Some(key);
        self
    }

    /// Number of distinct functions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&FunctionStats> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FunctionKey, &FunctionStats)> {
        self.entries.iter()
    }

    /// Look up a function by name alone, returning the first match
    pub fn find_by_name(&self, name: &str) -> Option<(&FunctionKey, &FunctionStats)> {
        self.entries.iter().find(|(key, _)| key.name == name)
    }

    pub fn total_calls(&self) -> u64 {
        self.entries.values().map(|s| s.totals.calls).sum()
    }

    pub fn primitive_calls(&self) -> u64 {
        self.entries.values().map(|s| s.totals.primitive_calls).sum()
    }

    /// Sum of self time over all functions
    pub fn total_time(&self) -> f64 {
        self.entries
            .values()
            .fold(0.0, |acc, s| acc + s.totals.total_time)
    }

    /// Entries in the selected order (key order when unsorted)
    pub fn sorted(&self) -> Vec<(&FunctionKey, &FunctionStats)> {
        let mut rows: Vec<_> = self.entries.iter().collect();
        match self.sort {
            None => {}
            Some(SortKey::Cumulative) => rows.sort_by(|a, b| {
                b.1.totals
                    .cumulative_time
                    .total_cmp(&a.1.totals.cumulative_time)
            }),
            Some(SortKey::Tottime) => {
                rows.sort_by(|a, b| b.1.totals.total_time.total_cmp(&a.1.totals.total_time))
            }
            Some(SortKey::Calls) => rows.sort_by(|a, b| b.1.totals.calls.cmp(&a.1.totals.calls)),
            Some(SortKey::Name) => rows.sort_by(|a, b| a.0.name.cmp(&b.0.name)),
            // BTreeMap order is already file, line, name
            Some(SortKey::File) => {}
        }
        rows
    }

    /// Print the classic profile table, limited to `limit` rows
    pub fn print_stats(&self, out: &mut dyn Write, limit: Option<usize>) -> io::Result<()> {
        let total_calls = self.total_calls();
        let primitive_calls = self.primitive_calls();

        write!(out, "         {} function calls", total_calls)?;
        if total_calls != primitive_calls {
            write!(out, " ({} primitive calls)", primitive_calls)?;
        }
        writeln!(out, " in {:.3} seconds", self.total_time())?;
        writeln!(out)?;

        let rows = self.sorted();
        match self.sort {
            Some(key) => writeln!(out, "   Ordered by: {}", key.describe())?,
            None => writeln!(out, "   Random listing order was used")?,
        }

        let shown = limit.map_or(rows.len(), |n| n.min(rows.len()));
        if let Some(n) = limit {
            if n < rows.len() {
                writeln!(
                    out,
                    "   List reduced from {} to {} due to restriction <{}>",
                    rows.len(),
                    shown,
                    n
                )?;
            }
        }
        writeln!(out)?;

        if rows.is_empty() {
            return Ok(());
        }

        writeln!(
            out,
            "   ncalls  tottime  percall  cumtime  percall filename:lineno(function)"
        )?;
        for (key, stats) in rows.into_iter().take(shown) {
            let t = &stats.totals;
            let ncalls = if t.calls == t.primitive_calls {
                t.calls.to_string()
            } else {
                format!("{}/{}", t.calls, t.primitive_calls)
            };
            writeln!(
                out,
                "{:>9} {:>8.3} {} {:>8.3} {} {}",
                ncalls,
                t.total_time,
                per_call(t.total_time, t.calls),
                t.cumulative_time,
                per_call(t.cumulative_time, t.primitive_calls),
                key
            )?;
        }
        writeln!(out)?;
        writeln!(out)?;
        Ok(())
    }
}

fn per_call(time: f64, calls: u64) -> String {
    if calls == 0 {
        " ".repeat(8)
    } else {
        format!("{:>8.3}", time / calls as f64)
    }
}
