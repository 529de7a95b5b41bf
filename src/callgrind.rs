//! Callgrind export of profile statistics
//!
//! The callgrind text format is what the render pipeline hands to
//! `gprof2dot -f callgrind`. Costs are integer microseconds. Function names
//! carry their source location so that same-named functions in different
//! files stay distinct nodes in the graph.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::stats::{CallStats, FunctionKey, Stats};

/// Write `stats` in callgrind format
pub fn write_callgrind(stats: &Stats, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "# callgrind format")?;
    writeln!(out, "version: 1")?;
    writeln!(out, "creator: testprof {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "positions: line")?;
    writeln!(out, "events: Microseconds")?;
    writeln!(out)?;

    // Stats store edges on the callee; callgrind wants them on the caller
    let mut callees: BTreeMap<&FunctionKey, Vec<(&FunctionKey, &CallStats)>> = BTreeMap::new();
    for (callee, stats) in stats.iter() {
        for (caller, edge) in &stats.callers {
            callees.entry(caller).or_default().push((callee, edge));
        }
    }

    for (key, stats) in stats.iter() {
        writeln!(out, "fl={}", key.file)?;
        writeln!(out, "fn={}", key)?;
        writeln!(out, "{} {}", key.line, micros(stats.totals.total_time))?;

        for (callee, edge) in callees.get(key).into_iter().flatten() {
            writeln!(out, "cfl={}", callee.file)?;
            writeln!(out, "cfn={}", callee)?;
            writeln!(out, "calls={} {}", edge.calls, callee.line)?;
            writeln!(out, "{} {}", key.line, micros(edge.cumulative_time))?;
        }
        writeln!(out)?;
    }

    let total: u64 = stats.iter().map(|(_, s)| micros(s.totals.total_time)).sum();
    writeln!(out, "totals: {}", total)?;
    Ok(())
}

fn micros(seconds: f64) -> u64 {
    (seconds * 1_000_000.0).round().max(0.0) as u64
}
