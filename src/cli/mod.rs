//! CLI module for the JVM codegen test harness
//!
//! Running `tester` with no arguments runs the whole binary test suite found under `tests/binary/`. The optional
//! flags only override defaults from [`HarnessConfig`].
//!
//! ## Modules
//!
//! - `test_interfaces` - Discovery and tool invocation boundaries
//! - `test_runner` - Stage runner, reporter and aggregation
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod test_interfaces;
pub mod test_runner;

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use crate::config::HarnessConfig;
use crate::version::TESTER_VERSION;
use test_interfaces::{DirectoryDiscovery, ProcessInvoker, TestError};
use test_runner::ConsoleReporter;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<TestError> for CliError {
    fn from(err: TestError) -> Self {
        // Render through miette so help text and error codes show up
        Self::failure(format!("{:?}", miette::Report::new(err)))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Test harness for the rustc JVM codegen backend
#[derive(Parser, Debug)]
#[command(name = "tester")]
#[command(version = TESTER_VERSION)]
#[command(about = "Build, run and check every test under tests/binary", long_about = None)]
pub struct Cli {
    /// Directory whose subdirectories are tests
    #[arg(long = "tests-dir", value_name = "DIR")]
    pub tests_dir: Option<PathBuf>,

    /// Build toolchain executable
    #[arg(long = "cargo", value_name = "PROGRAM")]
    pub cargo: Option<String>,

    /// Java runtime executable
    #[arg(long = "java", value_name = "PROGRAM")]
    pub java: Option<String>,

    /// Kill any external command running longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Print the path of every failure artifact written
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply the flags on top of the default configuration.
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new().with_timeout(self.timeout.map(Duration::from_secs));
        if let Some(dir) = &self.tests_dir {
            config = config.with_tests_dir(dir);
        }
        if let Some(cargo) = &self.cargo {
            config = config.with_build_tool(cargo);
        }
        if let Some(java) = &self.java {
            config = config.with_runtime(java);
        }
        config
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Run the suite and map the aggregate result to an exit code.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config = cli.config();
    let mut invoker = ProcessInvoker::new(config.timeout);
    let mut reporter = ConsoleReporter::new(cli.verbose);

    let summary = test_runner::run_tests(&config, &DirectoryDiscovery, &mut invoker, &mut reporter)?;

    if summary.success {
        Ok(ExitCode::SUCCESS)
    } else {
        // Summary already printed
        Err(CliError::new("", ExitCode::FAILURE))
    }
}

// ============================================================================
// Tests
// ============================================================================
