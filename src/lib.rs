//! testprof - per-test call-graph profiling for Rust test harnesses
//!
//! This library provides a small libtest-style harness with lifecycle
//! plugins, an instrumentation profiler that captures each test call, and
//! tooling to merge, print and render the resulting `.prof` files.

pub mod callgrind;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod harness;
pub mod plugin;
pub mod render;
pub mod sanitize;
pub mod stats;
