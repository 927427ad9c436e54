//! Test runner implementation
//!
//! Every test directory goes through the same four stages:
//!
//! 1. **Clean**: `cargo clean` in the test directory
//! 2. **Build**: `cargo build --target <target spec>` in the test directory
//! 3. **Run**: `java -jar target/<target>/debug/<name>.jar`
//! 4. **Verify**: compare the trimmed stdout of the run against `java_output.expected`, if present
//!
//! The first failing stage ends the test. Its captured output is written to a stage-specific `*.generated` file in
//! the test directory, and the test counts as failed. A failing test never stops the rest of the suite.
//!
//! ## TestReporter Trait
//!
//! Progress output goes through the `TestReporter` trait, so the runner can be driven silently in tests and the
//! console format lives in one place.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::test_interfaces::{CommandResult, CommandSpec, TestDiscovery, TestError, ToolInvoker};
use crate::config::HarnessConfig;

// ============================================================================
// Test Case
// ============================================================================

/// One test: a project directory under the tests root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    dir: PathBuf,
    /// Basename exactly as on disk, used to build paths
    file_name: OsString,
    raw_name: String,
    display_name: String,
}

impl TestCase {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let file_name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let raw_name = file_name.to_string_lossy().into_owned();
        let display_name = normalize_name(&raw_name);
        Self {
            dir,
            file_name,
            raw_name,
            display_name,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory basename, e.g. `add_numbers` (lossy for non-UTF-8 names; display only)
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Human-friendly name, e.g. `Add numbers`
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Where the build stage is expected to leave the runnable archive.
    pub fn archive_path(&self, config: &HarnessConfig) -> PathBuf {
        let mut archive = self.file_name.clone();
        archive.push(".");
        archive.push(&config.artifact_ext);
        self.dir.join("target").join(&config.target_name).join("debug").join(archive)
    }

    pub fn expected_output_path(&self, config: &HarnessConfig) -> PathBuf {
        self.dir.join(&config.expected_file)
    }
}

/// Turn a directory name into a display name: underscores become spaces, the first letter is uppercased and the rest
/// lowercased.
pub fn normalize_name(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => {
            let rest = chars.as_str().to_lowercase();
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

/// Compare actual program output against a baseline, ignoring surrounding whitespace.
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    expected.trim() == actual.trim()
}

// ============================================================================
// Stages
// ============================================================================

/// A step of the per-test protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clean,
    Build,
    Run,
    Verify,
}

impl Stage {
    /// File written into the test directory when this stage fails.
    pub const fn artifact_file(self) -> &'static str {
        match self {
            Stage::Clean => "cargo-clean-fail.generated",
            Stage::Build => "cargo-build-fail.generated",
            Stage::Run => "java-fail.generated",
            Stage::Verify => "output-diff.generated",
        }
    }

    /// Short label for progress messages, e.g. `cargo build`.
    pub fn label(self, config: &HarnessConfig) -> String {
        match self {
            Stage::Clean => format!("{} clean", config.build_tool),
            Stage::Build => format!("{} build", config.build_tool),
            Stage::Run => config.runtime.clone(),
            Stage::Verify => "output comparison".to_string(),
        }
    }
}

/// The command stages of `test` with their commands, in execution order.
pub fn command_stages(test: &TestCase, config: &HarnessConfig) -> [(Stage, CommandSpec); 3] {
    [
        (
            Stage::Clean,
            CommandSpec::new(&config.build_tool).arg("clean").current_dir(test.dir()),
        ),
        (
            Stage::Build,
            CommandSpec::new(&config.build_tool)
                .arg("build")
                .arg("--target")
                .arg(&config.target_spec)
                .current_dir(test.dir()),
        ),
        (
            Stage::Run,
            CommandSpec::new(&config.runtime).arg("-jar").arg(test.archive_path(config)),
        ),
    ]
}

/// Diagnostic payload written next to a failing test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: &'static str,
    pub contents: String,
}

impl Artifact {
    /// Captured streams of a failed command.
    pub fn command_failure(stage: Stage, result: &CommandResult) -> Self {
        Self {
            file_name: stage.artifact_file(),
            contents: format!("STDOUT:\n{}\n\nSTDERR:\n{}", result.stdout, result.stderr),
        }
    }

    /// Baseline vs. actual output. `expected` is the file content as read.
    pub fn output_diff(expected: &str, actual: &str) -> Self {
        Self {
            file_name: Stage::Verify.artifact_file(),
            contents: format!("Expected:\n{}\n\nGot:\n{}", expected, actual),
        }
    }
}

/// How the verify stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Matched,
    /// No baseline file; the test passes unverified
    NoBaseline,
    Mismatch,
    /// The baseline exists but could not be read
    Unreadable(String),
}

/// Result of the last stage a test reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub passed: bool,
    pub artifact: Option<Artifact>,
}

impl StageOutcome {
    fn passed(stage: Stage) -> Self {
        Self {
            stage,
            passed: true,
            artifact: None,
        }
    }

    fn failed(stage: Stage, artifact: Option<Artifact>) -> Self {
        Self {
            stage,
            passed: false,
            artifact,
        }
    }
}

// ============================================================================
// Test Reporter Trait
// ============================================================================

/// Trait for reporting progress of a harness run.
pub trait TestReporter {
    /// Called once before discovery
    fn on_run_start(&mut self) {}

    /// Called when discovery is complete
    fn on_collection_complete(&mut self, test_count: usize);

    /// Called when a test begins
    fn on_test_start(&mut self, test: &TestCase);

    /// Called before each command stage
    fn on_stage_start(&mut self, stage: Stage);

    /// Called when a command stage fails
    fn on_command_failed(&mut self, label: &str, result: &CommandResult, timeout: Option<Duration>);

    /// Called when the verify stage has a result
    fn on_verify(&mut self, result: &VerifyResult);

    /// Called after a failure artifact has been written
    fn on_artifact_written(&mut self, _path: &Path) {}

    /// Called when a test completes
    fn on_test_complete(&mut self, test: &TestCase, passed: bool);

    /// Called when all tests have completed
    fn on_run_complete(&mut self, summary: &TestSummary);
}

/// Summary of a harness run
#[derive(Debug, Clone, PartialEq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration: Duration,
    /// Logical AND of every test result; true for an empty run
    pub success: bool,
}

/// Default console reporter
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TestReporter for ConsoleReporter {
    fn on_run_start(&mut self) {
        println!("🧪 Tester for Rustc's JVM Codegen Backend started!");
        println!(" ");
    }

    fn on_collection_complete(&mut self, test_count: usize) {
        println!("|- 📦 Running {} binary build tests...", test_count);
    }

    fn on_test_start(&mut self, test: &TestCase) {
        println!("|-- Test '{}' ({})", test.raw_name(), test.display_name());
    }

    fn on_stage_start(&mut self, stage: Stage) {
        match stage {
            Stage::Clean => println!("|--- 🧼 Cleaning test folder..."),
            Stage::Build => println!("|--- ⚒️ Building with Cargo..."),
            Stage::Run => println!("|--- 🤖 Running with Java..."),
            Stage::Verify => {}
        }
    }

    fn on_command_failed(&mut self, label: &str, result: &CommandResult, timeout: Option<Duration>) {
        match timeout {
            Some(limit) if result.timed_out => {
                println!("|---- ❌ {} timed out after {}s", label, limit.as_secs_f64())
            }
            _ => println!("|---- ❌ {} exited with code {}", label, result.status),
        }
    }

    fn on_verify(&mut self, result: &VerifyResult) {
        match result {
            VerifyResult::Matched => println!("|--- ✅ Output matches expected output!"),
            VerifyResult::NoBaseline => println!("|--- ⚠️ Expected output file not found. Skipping comparison."),
            VerifyResult::Mismatch => println!("|---- ❌ java output did not match expected output"),
            VerifyResult::Unreadable(reason) => println!("|---- ❌ could not read expected output: {}", reason),
        }
    }

    fn on_artifact_written(&mut self, path: &Path) {
        if self.verbose {
            println!("|---- 📝 Wrote {}", path.display());
        }
    }

    fn on_test_complete(&mut self, _test: &TestCase, passed: bool) {
        if passed {
            println!("|--- ✅ Binary test passed!");
        }
    }

    fn on_run_complete(&mut self, summary: &TestSummary) {
        println!();
        if summary.success {
            println!("|-✅ All tests passed!");
        } else {
            println!("|- ❌ Some tests failed!");
        }
        println!(
            "|- {} passed, {} failed in {:.2}s",
            summary.passed,
            summary.failed,
            summary.duration.as_secs_f64()
        );
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Discover and run every test under `config.tests_dir`.
///
/// Test failures are folded into the returned summary. The only error is a command that could not be started at all,
/// which aborts the run.
pub fn run_tests(
    config: &HarnessConfig,
    discovery: &impl TestDiscovery,
    invoker: &mut impl ToolInvoker,
    reporter: &mut impl TestReporter,
) -> Result<TestSummary, TestError> {
    let start_time = Instant::now();
    reporter.on_run_start();

    let tests = discovery.discover(&config.tests_dir);
    reporter.on_collection_complete(tests.len());

    let mut passed = 0;
    let mut failed = 0;
    let mut success = true;

    for test in &tests {
        if run_single_test(test, config, invoker, reporter)? {
            passed += 1;
        } else {
            failed += 1;
            success = false;
        }
    }

    let summary = TestSummary {
        total: tests.len(),
        passed,
        failed,
        duration: start_time.elapsed(),
        success,
    };
    tracing::info!(
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        "run complete"
    );
    reporter.on_run_complete(&summary);
    Ok(summary)
}

/// Run the four stages for one test and report whether it passed.
///
/// Leaves at most one `*.generated` artifact in the test directory, overwriting any earlier one of the same name.
pub fn run_single_test(
    test: &TestCase,
    config: &HarnessConfig,
    invoker: &mut impl ToolInvoker,
    reporter: &mut impl TestReporter,
) -> Result<bool, TestError> {
    reporter.on_test_start(test);

    let outcome = run_stages(test, config, invoker, reporter)?;
    if let Some(artifact) = &outcome.artifact {
        match write_artifact(test, artifact) {
            Ok(path) => reporter.on_artifact_written(&path),
            // The test has already failed; a missing artifact does not change that
            Err(e) => tracing::warn!(test = test.raw_name(), error = %e, "could not write failure artifact"),
        }
    }

    tracing::debug!(
        test = test.raw_name(),
        stage = ?outcome.stage,
        passed = outcome.passed,
        "test finished"
    );
    reporter.on_test_complete(test, outcome.passed);
    Ok(outcome.passed)
}

fn run_stages(
    test: &TestCase,
    config: &HarnessConfig,
    invoker: &mut impl ToolInvoker,
    reporter: &mut impl TestReporter,
) -> Result<StageOutcome, TestError> {
    let mut run_stdout = String::new();

    for (stage, command) in command_stages(test, config) {
        reporter.on_stage_start(stage);

        let result = invoker.invoke(&command)?;
        if !result.success() {
            reporter.on_command_failed(&stage.label(config), &result, config.timeout);
            return Ok(StageOutcome::failed(stage, Some(Artifact::command_failure(stage, &result))));
        }

        if stage == Stage::Run {
            run_stdout = result.stdout;
        }
    }

    let (verify, outcome) = verify_output(test, config, &run_stdout);
    reporter.on_verify(&verify);
    Ok(outcome)
}

fn verify_output(test: &TestCase, config: &HarnessConfig, stdout: &str) -> (VerifyResult, StageOutcome) {
    let path = test.expected_output_path(config);
    if !path.exists() {
        return (VerifyResult::NoBaseline, StageOutcome::passed(Stage::Verify));
    }

    let expected = match fs::read_to_string(&path) {
        Ok(expected) => expected,
        Err(source) => {
            let err = TestError::BaselineRead { path, source };
            tracing::warn!(test = test.raw_name(), error = %err, "baseline unreadable");
            return (
                VerifyResult::Unreadable(err.to_string()),
                StageOutcome::failed(Stage::Verify, None),
            );
        }
    };

    let actual = stdout.trim();
    if outputs_match(&expected, actual) {
        (VerifyResult::Matched, StageOutcome::passed(Stage::Verify))
    } else {
        (
            VerifyResult::Mismatch,
            StageOutcome::failed(Stage::Verify, Some(Artifact::output_diff(&expected, actual))),
        )
    }
}

fn write_artifact(test: &TestCase, artifact: &Artifact) -> Result<PathBuf, TestError> {
    let path = test.dir().join(artifact.file_name);
    fs::write(&path, &artifact.contents).map_err(|source| TestError::ArtifactWrite {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
