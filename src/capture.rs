//! Instrumentation-based call-graph capture
//!
//! A [`Profiler`] accumulates call counts and timings while it is active on
//! the current thread. [`Profiler::runcall`] activates it around a closure;
//! code inside marks functions with [`profile_scope!`](crate::profile_scope)
//! or [`scope`]. Scopes opened while no profiler is active cost one
//! thread-local lookup and record nothing.
//!
//! Profilers nest: scopes always record into the innermost active profiler.
//! Activation is per thread, so a profiler never observes work done on
//! other threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::stats::{CallStats, FunctionKey, FunctionStats, Stats};

thread_local! {
    static ACTIVE: RefCell<Vec<Recorder>> = const { RefCell::new(Vec::new()) };
}

/// Open a profiling scope for the enclosing block
///
/// # Example
/// ```
/// use testprof::capture::Profiler;
/// use testprof::stats::FunctionKey;
///
/// fn parse(input: &str) -> usize {
///     testprof::profile_scope!("parse");
///     input.len()
/// }
///
/// let mut profiler = Profiler::new();
/// let key = FunctionKey::new("suite.rs", 1, "test_parse");
/// let len = profiler.runcall(&key, || parse("abc"));
/// assert_eq!(len, 3);
/// assert_eq!(profiler.stats().find_by_name("parse").unwrap().1.totals.calls, 1);
/// ```
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _testprof_scope = $crate::capture::scope(file!(), line!(), $name);
    };
}

/// Per-function accumulator while capturing
#[derive(Debug, Default)]
struct RawEntry {
    calls: u64,
    primitive_calls: u64,
    total_time: Duration,
    cumulative_time: Duration,
    callers: HashMap<FunctionKey, RawEdge>,
    /// Frames of this function currently on the stack
    depth: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct RawEdge {
    calls: u64,
    primitive_calls: u64,
    total_time: Duration,
    cumulative_time: Duration,
}

#[derive(Debug)]
struct Frame {
    key: FunctionKey,
    start: Instant,
    child_time: Duration,
    primitive: bool,
}

/// Captured state of one profiler
#[derive(Debug, Default)]
struct Recorder {
    entries: HashMap<FunctionKey, RawEntry>,
    stack: Vec<Frame>,
}

impl Recorder {
    fn enter(&mut self, key: FunctionKey) {
        let caller = self.stack.last().map(|f| f.key.clone());
        let entry = self.entries.entry(key.clone()).or_default();
        let primitive = entry.depth == 0;
        entry.calls += 1;
        entry.depth += 1;
        if primitive {
            entry.primitive_calls += 1;
        }
        if let Some(caller) = caller {
            let edge = entry.callers.entry(caller).or_default();
            edge.calls += 1;
            if primitive {
                edge.primitive_calls += 1;
            }
        }
        self.stack.push(Frame {
            key,
            start: Instant::now(),
            child_time: Duration::ZERO,
            primitive,
        });
    }

    fn exit(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let elapsed = frame.start.elapsed();
        let self_time = elapsed.saturating_sub(frame.child_time);
        let caller = self.stack.last().map(|f| f.key.clone());

        if let Some(entry) = self.entries.get_mut(&frame.key) {
            entry.depth = entry.depth.saturating_sub(1);
            entry.total_time += self_time;
            if frame.primitive {
                entry.cumulative_time += elapsed;
            }
            let edge = match &caller {
                Some(c) => entry.callers.get_mut(c),
                None => None,
            };
            if let Some(edge) = edge {
                edge.total_time += self_time;
                if frame.primitive {
                    edge.cumulative_time += elapsed;
                }
            }
        }

        if let Some(parent) = self.stack.last_mut() {
            parent.child_time += elapsed;
        }
    }

    /// Close frames left open above `depth`
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            self.exit();
        }
    }

    fn stats(&self) -> Stats {
        let entries = self
            .entries
            .iter()
            .map(|(key, raw)| {
                let callers = raw
                    .callers
                    .iter()
                    .map(|(caller, edge)| {
                        (
                            caller.clone(),
                            CallStats {
                                calls: edge.calls,
                                primitive_calls: edge.primitive_calls,
                                total_time: edge.total_time.as_secs_f64(),
                                cumulative_time: edge.cumulative_time.as_secs_f64(),
                            },
                        )
                    })
                    .collect();
                let stats = FunctionStats {
                    totals: CallStats {
                        calls: raw.calls,
                        primitive_calls: raw.primitive_calls,
                        total_time: raw.total_time.as_secs_f64(),
                        cumulative_time: raw.cumulative_time.as_secs_f64(),
                    },
                    callers,
                };
                (key.clone(), stats)
            })
            .collect();
        Stats::from_entries(entries)
    }
}

/// Records calls made inside [`Profiler::runcall`]
#[derive(Debug, Default)]
pub struct Profiler {
    recorder: Recorder,
    runs: u64,
}

impl Profiler {
    /// Create an idle profiler with no data
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with this profiler active, recording `key` as the outermost call
    ///
    /// The profiler is deactivated again when `f` returns or unwinds.
    pub fn runcall<F, R>(&mut self, key: &FunctionKey, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.runs += 1;
        let recorder = std::mem::take(&mut self.recorder);
        let depth = recorder.stack.len();
        ACTIVE.with(|active| active.borrow_mut().push(recorder));
        let _restore = Restore {
            slot: &mut self.recorder,
            depth,
        };
        let _frame = scope(&key.file, key.line, &key.name);
        f()
    }

    /// Number of completed or in-progress [`Profiler::runcall`] invocations
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Snapshot the captured data
    pub fn stats(&self) -> Stats {
        self.recorder.stats()
    }

    /// Write the captured data to a `.prof` file
    pub fn dump_stats(&self, path: impl AsRef<Path>) -> Result<()> {
        self.stats().dump(path)
    }
}

/// Moves the recorder back out of the active stack
struct Restore<'a> {
    slot: &'a mut Recorder,
    depth: usize,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        let recorder = ACTIVE.with(|active| active.borrow_mut().pop());
        if let Some(mut recorder) = recorder {
            recorder.unwind_to(self.depth);
            *self.slot = recorder;
        }
    }
}

/// Guard returned by [`scope`]; records the call when dropped
#[must_use = "the scope ends when the guard is dropped"]
pub struct ScopeGuard {
    armed: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.armed {
            ACTIVE.with(|active| {
                if let Some(recorder) = active.borrow_mut().last_mut() {
                    recorder.exit();
                }
            });
        }
    }
}

/// Enter the function `name` defined at `file:line`
///
/// Records into the innermost active profiler on this thread, if any.
pub fn scope(file: &str, line: u32, name: &str) -> ScopeGuard {
    let armed = ACTIVE.with(|active| match active.borrow_mut().last_mut() {
        Some(recorder) => {
            recorder.enter(FunctionKey::new(file, line, name));
            true
        }
        None => false,
    });
    ScopeGuard {
        armed,
        _not_send: PhantomData,
    }
}

/// Whether a profiler is active on the current thread
pub fn is_active() -> bool {
    ACTIVE.with(|active| !active.borrow().is_empty())
}
