//! Minimal test harness with lifecycle plugins
//!
//! Use it from a test target declared with `harness = false`:
//!
//! ```no_run
//! use testprof::harness::{Harness, Trial};
//!
//! fn main() {
//!     let trials = vec![Trial::test("adds", || {
//!         assert_eq!(1 + 1, 2);
//!         Ok(())
//!     })];
//!     Harness::from_args().run(trials).exit();
//! }
//! ```
//!
//! Tests run one at a time on the calling thread. Plugins observe a fixed set
//! of events: session start, the wrap around each test call, session finish
//! and the terminal summary. Plugins are free to keep mutable state between
//! events because nothing runs concurrently; a parallel runner would need one
//! profiler per worker and a merge at the end.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe, Location};
use tracing_subscriber::EnvFilter;

use crate::cli::ProfilingArgs;
use crate::plugin::ProfilingPlugin;
use crate::stats::FunctionKey;

/// Ordering of a plugin's `call_test` wrapper relative to other plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookPriority {
    /// Outermost wrapper, sees every other plugin's work
    TryFirst,
    Normal,
    /// Innermost wrapper, closest to the test body
    TryLast,
}

/// How the session ended, passed to `session_finish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    TestsFailed,
    NoTestsCollected,
}

/// Result of one test call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(Option<String>),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

/// Identity of a test, as seen by plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestItem {
    pub name: String,
    pub file: &'static str,
    pub line: u32,
}

impl TestItem {
    /// Key under which the test call itself is profiled
    pub fn function_key(&self) -> FunctionKey {
        FunctionKey::new(self.file, self.line, self.name.as_str())
    }
}

/// Downstream part of the `call_test` chain
pub type Next<'a> = dyn FnMut() -> Result<TestOutcome> + 'a;

/// Listener for harness lifecycle events
///
/// Every hook defaults to doing nothing. An error from any hook aborts the
/// session.
pub trait Plugin {
    fn name(&self) -> &'static str;

    fn priority(&self) -> HookPriority {
        HookPriority::Normal
    }

    fn session_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Wrap one test call; must invoke `next` to run the rest of the chain
    fn call_test(&mut self, item: &TestItem, next: &mut Next<'_>) -> Result<TestOutcome> {
        let _ = item;
        next()
    }

    fn session_finish(&mut self, status: ExitStatus) -> Result<()> {
        let _ = status;
        Ok(())
    }

    fn terminal_summary(&mut self, out: &mut dyn Write) -> Result<()> {
        let _ = out;
        Ok(())
    }
}

/// Failure reported by a test body
#[derive(Debug, Clone, Default)]
pub struct Failed {
    msg: Option<String>,
}

impl Failed {
    pub fn without_message() -> Self {
        Self { msg: None }
    }

    pub fn message(&self) -> Option<&str> {
        self.msg.as_deref()
    }
}

impl<M: std::fmt::Display> From<M> for Failed {
    fn from(msg: M) -> Self {
        Self {
            msg: Some(msg.to_string()),
        }
    }
}

type TestBody = Box<dyn FnOnce() -> std::result::Result<(), Failed>>;

/// A named test and its body
pub struct Trial {
    item: TestItem,
    body: TestBody,
}

impl Trial {
    /// Create a test; the caller's location becomes its profile location
    #[track_caller]
    pub fn test<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> std::result::Result<(), Failed> + 'static,
    {
        let location = Location::caller();
        Self {
            item: TestItem {
                name: name.into(),
                file: location.file(),
                line: location.line(),
            },
            body: Box::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.item.name
    }
}

/// Arguments understood by a harness test binary
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Test binary driven by the testprof harness")]
pub struct HarnessArgs {
    /// Only run tests whose name contains FILTER
    pub filter: Option<String>,

    /// Require FILTER to match the whole test name
    #[arg(long)]
    pub exact: bool,

    /// Enable debug tracing output on stderr
    #[arg(long)]
    pub debug: bool,

    /// Accepted for libtest compatibility; output is never captured
    #[arg(long, hide = true)]
    pub nocapture: bool,

    /// Accepted for libtest compatibility; tests always run on one thread
    #[arg(long, hide = true, value_name = "N")]
    pub test_threads: Option<usize>,

    #[command(flatten)]
    pub profiling: ProfilingArgs,
}

impl HarnessArgs {
    fn selects(&self, name: &str) -> bool {
        match &self.filter {
            None => true,
            Some(filter) if self.exact => name == filter,
            Some(filter) => name.contains(filter.as_str()),
        }
    }
}

/// Counts for a finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conclusion {
    pub passed: u64,
    pub failed: u64,
    pub filtered_out: u64,
}

impl Conclusion {
    pub fn has_failed(&self) -> bool {
        self.failed > 0
    }

    /// Exit the process, with code 101 if any test failed
    pub fn exit(self) -> ! {
        std::process::exit(if self.has_failed() { 101 } else { 0 })
    }
}

/// Runs trials through registered plugins
pub struct Harness {
    args: HarnessArgs,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Harness {
    /// Build a harness from parsed arguments, registering built-in plugins
    pub fn new(args: HarnessArgs) -> Self {
        let mut harness = Self {
            args,
            plugins: Vec::new(),
        };
        harness.configure();
        harness
    }

    /// Parse `std::env::args` and initialise tracing when `--debug` is given
    pub fn from_args() -> Self {
        let args = HarnessArgs::parse();
        init_tracing(args.debug);
        Self::new(args)
    }

    fn configure(&mut self) {
        if self.args.profiling.enabled() {
            let config = self.args.profiling.to_config();
            tracing::debug!(?config, "profiling enabled");
            self.register(ProfilingPlugin::new(config));
        }
    }

    /// Add a plugin; plugins keep registration order within a priority
    pub fn register(&mut self, plugin: impl Plugin + 'static) -> &mut Self {
        self.plugins.push(Box::new(plugin));
        self.plugins.sort_by_key(|p| p.priority());
        self
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run all trials, writing progress to stdout
    ///
    /// A plugin error is printed and counted as a failed session.
    pub fn run(&mut self, trials: Vec<Trial>) -> Conclusion {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        match self.run_with_output(trials, &mut out) {
            Ok(conclusion) => conclusion,
            Err(err) => {
                let _ = writeln!(out);
                let _ = writeln!(out, "error: {:#}", err);
                Conclusion {
                    failed: 1,
                    ..Conclusion::default()
                }
            }
        }
    }

    /// Run all trials, writing progress to `out`
    pub fn run_with_output(
        &mut self,
        trials: Vec<Trial>,
        out: &mut dyn Write,
    ) -> Result<Conclusion> {
        let total = trials.len() as u64;
        let selected: Vec<Trial> = trials
            .into_iter()
            .filter(|t| self.args.selects(t.name()))
            .collect();
        let mut conclusion = Conclusion {
            filtered_out: total - selected.len() as u64,
            ..Conclusion::default()
        };

        for plugin in &mut self.plugins {
            plugin
                .session_start()
                .with_context(|| format!("{} plugin failed at session start", plugin.name()))?;
        }

        writeln!(out)?;
        writeln!(
            out,
            "running {} test{}",
            selected.len(),
            if selected.len() == 1 { "" } else { "s" }
        )?;
        for trial in selected {
            let name = trial.item.name.clone();
            write!(out, "test {} ... ", name)?;
            out.flush()?;

            match run_trial(&mut self.plugins, trial)? {
                TestOutcome::Passed => {
                    conclusion.passed += 1;
                    writeln!(out, "ok")?;
                }
                TestOutcome::Failed(msg) => {
                    conclusion.failed += 1;
                    writeln!(out, "FAILED")?;
                    if let Some(msg) = msg {
                        writeln!(out, "---- {} ----", name)?;
                        writeln!(out, "{}", msg)?;
                    }
                }
            }
        }

        let status = if conclusion.passed + conclusion.failed == 0 {
            ExitStatus::NoTestsCollected
        } else if conclusion.has_failed() {
            ExitStatus::TestsFailed
        } else {
            ExitStatus::Ok
        };
        for plugin in &mut self.plugins {
            plugin
                .session_finish(status)
                .with_context(|| format!("{} plugin failed at session finish", plugin.name()))?;
        }

        writeln!(out)?;
        writeln!(
            out,
            "test result: {}. {} passed; {} failed; {} filtered out",
            if conclusion.has_failed() { "FAILED" } else { "ok" },
            conclusion.passed,
            conclusion.failed,
            conclusion.filtered_out
        )?;
        writeln!(out)?;

        for plugin in &mut self.plugins {
            plugin
                .terminal_summary(out)
                .with_context(|| format!("{} plugin failed in terminal summary", plugin.name()))?;
        }

        Ok(conclusion)
    }
}

fn run_trial(plugins: &mut [Box<dyn Plugin>], trial: Trial) -> Result<TestOutcome> {
    let Trial { item, body } = trial;
    let mut body = Some(body);
    let mut call_body = || -> Result<TestOutcome> {
        let body = body
            .take()
            .with_context(|| format!("test {} was called more than once", item.name))?;
        Ok(call_guarded(body))
    };
    call_chain(plugins, &item, &mut call_body)
}

/// First plugin is the outermost wrapper
fn call_chain(
    plugins: &mut [Box<dyn Plugin>],
    item: &TestItem,
    body: &mut Next<'_>,
) -> Result<TestOutcome> {
    match plugins.split_first_mut() {
        None => body(),
        Some((first, rest)) => {
            let mut next = || call_chain(&mut *rest, item, &mut *body);
            first.call_test(item, &mut next)
        }
    }
}

fn call_guarded(body: TestBody) -> TestOutcome {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => TestOutcome::Passed,
        Ok(Err(failed)) => TestOutcome::Failed(failed.msg),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "test panicked".to_string());
            TestOutcome::Failed(Some(msg))
        }
    }
}

/// Initialize tracing subscriber for debug output
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing(debug: bool) {
    if debug {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recording {
        name: &'static str,
        priority: HookPriority,
        log: Log,
    }

    impl Plugin for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> HookPriority {
            self.priority
        }

        fn session_start(&mut self) -> Result<()> {
            self.log.borrow_mut().push(format!("{}:start", self.name));
            Ok(())
        }

        fn call_test(&mut self, item: &TestItem, next: &mut Next<'_>) -> Result<TestOutcome> {
            self.log
                .borrow_mut()
                .push(format!("{}:enter:{}", self.name, item.name));
            let outcome = next();
            self.log
                .borrow_mut()
                .push(format!("{}:exit:{}", self.name, item.name));
            outcome
        }

        fn session_finish(&mut self, status: ExitStatus) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("{}:finish:{:?}", self.name, status));
            Ok(())
        }

        fn terminal_summary(&mut self, out: &mut dyn Write) -> Result<()> {
            writeln!(out, "summary from {}", self.name)?;
            Ok(())
        }
    }

    fn recording(name: &'static str, priority: HookPriority, log: &Log) -> Recording {
        Recording {
            name,
            priority,
            log: Rc::clone(log),
        }
    }

    fn run(harness: &mut Harness, trials: Vec<Trial>) -> (Conclusion, String) {
        let mut out = Vec::new();
        let conclusion = harness.run_with_output(trials, &mut out).unwrap();
        (conclusion, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_passing_and_failing_trials() {
        let mut harness = Harness::new(HarnessArgs::default());
        let (conclusion, out) = run(
            &mut harness,
            vec![
                Trial::test("passes", || Ok(())),
                Trial::test("fails", || Err("expected 1, got 2".into())),
                Trial::test("panics", || panic!("kaboom")),
            ],
        );

        assert_eq!(conclusion.passed, 1);
        assert_eq!(conclusion.failed, 2);
        assert!(out.contains("test passes ... ok"));
        assert!(out.contains("test fails ... FAILED"));
        assert!(out.contains("expected 1, got 2"));
        assert!(out.contains("kaboom"));
        assert!(out.contains("test result: FAILED. 1 passed; 2 failed; 0 filtered out"));
    }

    #[test]
    fn test_filter() {
        let mut harness = Harness::new(HarnessArgs {
            filter: Some("parse".to_string()),
            ..HarnessArgs::default()
        });
        let (conclusion, _) = run(
            &mut harness,
            vec![
                Trial::test("parse_ok", || Ok(())),
                Trial::test("render_ok", || Ok(())),
            ],
        );
        assert_eq!(conclusion.passed, 1);
        assert_eq!(conclusion.filtered_out, 1);
    }

    #[test]
    fn test_exact_filter() {
        let args = HarnessArgs {
            filter: Some("parse".to_string()),
            exact: true,
            ..HarnessArgs::default()
        };
        assert!(args.selects("parse"));
        assert!(!args.selects("parse_ok"));
    }

    #[test]
    fn test_try_first_plugin_is_outermost() {
        let log: Log = Rc::default();
        let mut harness = Harness::new(HarnessArgs::default());
        harness.register(recording("normal", HookPriority::Normal, &log));
        harness.register(recording("last", HookPriority::TryLast, &log));
        harness.register(recording("first", HookPriority::TryFirst, &log));
        assert_eq!(harness.plugin_names(), vec!["first", "normal", "last"]);

        let (_, out) = run(&mut harness, vec![Trial::test("t", || Ok(()))]);

        let log = log.borrow();
        let calls: Vec<_> = log.iter().filter(|l| l.contains(":t")).cloned().collect();
        assert_eq!(
            calls,
            vec![
                "first:enter:t",
                "normal:enter:t",
                "last:enter:t",
                "last:exit:t",
                "normal:exit:t",
                "first:exit:t",
            ]
        );
        assert_eq!(log.first().unwrap(), "first:start");
        assert_eq!(log.last().unwrap(), "last:finish:Ok");
        assert!(out.contains("summary from first"));
    }

    #[test]
    fn test_finish_runs_after_failures() {
        let log: Log = Rc::default();
        let mut harness = Harness::new(HarnessArgs::default());
        harness.register(recording("p", HookPriority::Normal, &log));
        run(&mut harness, vec![Trial::test("bad", || Err(Failed::without_message()))]);
        assert!(log.borrow().contains(&"p:finish:TestsFailed".to_string()));
    }

    #[test]
    fn test_no_tests_status() {
        let log: Log = Rc::default();
        let mut harness = Harness::new(HarnessArgs::default());
        harness.register(recording("p", HookPriority::Normal, &log));
        let (conclusion, out) = run(&mut harness, Vec::new());
        assert!(!conclusion.has_failed());
        assert!(out.contains("running 0 tests"));
        assert!(log.borrow().contains(&"p:finish:NoTestsCollected".to_string()));
    }

    #[test]
    fn test_running_line_pluralizes() {
        let mut harness = Harness::new(HarnessArgs::default());
        let (_, out) = run(&mut harness, vec![Trial::test("only", || Ok(()))]);
        assert!(out.lines().any(|l| l == "running 1 test"));

        let mut harness = Harness::new(HarnessArgs::default());
        let (_, out) = run(
            &mut harness,
            vec![Trial::test("a", || Ok(())), Trial::test("b", || Ok(()))],
        );
        assert!(out.lines().any(|l| l == "running 2 tests"));
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing(true);
        init_tracing(true);
        init_tracing(false);
    }

    struct Broken;

    impl Plugin for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn session_start(&mut self) -> Result<()> {
            anyhow::bail!("no output directory")
        }
    }

    #[test]
    fn test_plugin_error_aborts_session() {
        let mut harness = Harness::new(HarnessArgs::default());
        harness.register(Broken);
        let mut out = Vec::new();
        let err = harness
            .run_with_output(vec![Trial::test("t", || Ok(()))], &mut out)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no output directory"));
        assert!(!String::from_utf8(out).unwrap().contains("test t"));
    }

    struct CallsTwice;

    impl Plugin for CallsTwice {
        fn name(&self) -> &'static str {
            "twice"
        }

        fn call_test(&mut self, _item: &TestItem, next: &mut Next<'_>) -> Result<TestOutcome> {
            next()?;
            next()
        }
    }

    #[test]
    fn test_body_runs_once() {
        let mut harness = Harness::new(HarnessArgs::default());
        harness.register(CallsTwice);
        let mut out = Vec::new();
        let err = harness
            .run_with_output(vec![Trial::test("once", || Ok(()))], &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("called more than once"));
    }

    #[test]
    fn test_trial_records_caller_location() {
        let trial = Trial::test("located", || Ok(()));
        assert!(trial.item.file.ends_with("harness.rs"));
        assert!(trial.item.line > 0);
        assert_eq!(trial.item.function_key().name, "located");
    }

    #[test]
    fn test_profiling_registered_only_when_enabled() {
        assert!(Harness::new(HarnessArgs::default()).plugin_names().is_empty());

        let mut args = HarnessArgs::default();
        args.profiling.svg = true;
        assert_eq!(Harness::new(args).plugin_names(), vec!["profiling"]);

        let mut args = HarnessArgs::default();
        args.profiling.combined_only = true;
        assert!(Harness::new(args).plugin_names().is_empty());
    }

    #[test]
    fn test_harness_args_parse() {
        let args = HarnessArgs::parse_from(["suite", "parse", "--exact", "--profile"]);
        assert_eq!(args.filter.as_deref(), Some("parse"));
        assert!(args.exact);
        assert!(args.profiling.profile);
    }
}
