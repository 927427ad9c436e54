#![forbid(unsafe_code)]
//! Test harness for the rustc JVM codegen backend
//!
//! Each directory under `tests/binary/` is a small Cargo project. The harness
//! cleans it, builds it for the JVM target, runs the produced jar and compares
//! what it printed against an optional `java_output.expected` baseline. When a
//! step fails, a `*.generated` file with the captured output is left in the
//! test directory for debugging.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod cli;
pub mod config;
pub mod version;

pub use cli::test_interfaces::{
    CommandResult, CommandSpec, DirectoryDiscovery, ProcessInvoker, TestDiscovery, TestError, ToolInvoker,
};
pub use cli::test_runner::{
    ConsoleReporter, Stage, StageOutcome, TestCase, TestReporter, TestSummary, VerifyResult, command_stages,
    normalize_name, outputs_match, run_single_test, run_tests,
};
pub use config::HarnessConfig;
