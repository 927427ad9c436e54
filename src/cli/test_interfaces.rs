//! Test runner I/O boundary interfaces
//!
//! This module defines trait-based abstractions for the two places the harness touches the outside world:
//! - Test discovery (filesystem scan of the tests root)
//! - Tool invocation (spawning the build toolchain and the runtime, capturing their output)
//!
//! The stage runner only talks to these traits, so its sequencing and failure handling can be tested with scripted
//! implementations instead of real `cargo`/`java` processes. Default implementations do the real work.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use thiserror::Error;

use super::test_runner::TestCase;

/// Errors raised at the I/O boundary.
///
/// Only [`TestError::Spawn`] and [`TestError::Capture`] abort a run. The other variants are reported and reduced to a
/// failing test.
#[derive(Debug, Error, Diagnostic)]
pub enum TestError {
    #[error("failed to run `{program}`: {source}")]
    #[diagnostic(
        code(tester::spawn),
        help("make sure the build toolchain and the Java runtime are installed and on PATH")
    )]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to capture output of `{program}`: {source}")]
    #[diagnostic(code(tester::capture))]
    Capture {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    #[diagnostic(code(tester::artifact_write))]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    #[diagnostic(code(tester::baseline_read))]
    BaselineRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Test Discovery Interface
// ============================================================================

/// Enumerate the tests under a root directory.
pub trait TestDiscovery {
    /// Return one [`TestCase`] per test found under `root`.
    ///
    /// A missing root is not an error; it simply holds no tests.
    fn discover(&self, root: &Path) -> Vec<TestCase>;
}

/// Filesystem discovery: every immediate subdirectory of the root is a test.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryDiscovery;

impl TestDiscovery for DirectoryDiscovery {
    fn discover(&self, root: &Path) -> Vec<TestCase> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(root = %root.display(), error = %e, "tests root not readable, no tests");
                return Vec::new();
            }
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            // Follows symlinks, same as a plain `is_dir` check on the path
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }

        dirs.sort();
        dirs.into_iter()
            .map(|dir| {
                tracing::debug!(dir = %dir.display(), "discovered test");
                TestCase::new(dir)
            })
            .collect()
    }
}

// ============================================================================
// Tool Invocation Interface
// ============================================================================

/// A single external command: program, arguments and optional working directory.
///
/// Arguments are OS strings so paths built from non-UTF-8 directory names reach the child unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    /// `None` runs in the harness's own working directory
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Outcome of one external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code. A child killed by a signal reports the negated signal number on Unix, `-1` elsewhere.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when the child was killed after exceeding the configured timeout
    pub timed_out: bool,
}

impl CommandResult {
    /// A result for a command that exited normally with `status`.
    pub fn exited(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0 && !self.timed_out
    }
}

/// Run external commands and capture their output.
pub trait ToolInvoker {
    /// Run `command` to completion.
    ///
    /// A nonzero exit is a normal [`CommandResult`]; `Err` means the command could not be run at all.
    fn invoke(&mut self, command: &CommandSpec) -> Result<CommandResult, TestError>;
}

/// How long to keep collecting output after a timed-out command was killed.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Spawns real processes, blocking until each exits.
#[derive(Debug, Default, Clone)]
pub struct ProcessInvoker {
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ToolInvoker for ProcessInvoker {
    fn invoke(&mut self, command: &CommandSpec) -> Result<CommandResult, TestError> {
        tracing::debug!(
            command = %command,
            cwd = ?command.cwd,
            "running command"
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let spawn_err = |source| TestError::Spawn {
            program: command.program.clone(),
            source,
        };

        let Some(timeout) = self.timeout else {
            let output = cmd.output().map_err(spawn_err)?;
            return Ok(CommandResult {
                status: exit_code(output.status),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            });
        };

        // Own process group, so a timeout can take down everything the command started
        // (e.g. the rustc processes under `cargo build`)
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(spawn_err)?;
        wait_with_timeout(child, timeout).map_err(|source| TestError::Capture {
            program: command.program.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Chunk = (Stream, io::Result<Vec<u8>>);

/// Wait for `child`, killing its process tree once `timeout` has elapsed.
///
/// Both pipes are drained on helper threads that forward chunks over a channel, so a chatty child cannot block on a
/// full pipe while we poll. Collection stops at the deadline even if a stray grandchild still holds a pipe open;
/// whatever arrived by then is kept.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> io::Result<CommandResult> {
    let Some(stdout) = child.stdout.take() else {
        return Err(io::Error::other("child stdout was not captured"));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io::Error::other("child stderr was not captured"));
    };
    let (tx, rx) = mpsc::channel();
    spawn_reader(stdout, Stream::Stdout, tx.clone());
    spawn_reader(stderr, Stream::Stderr, tx);

    let start = Instant::now();
    let poll = Duration::from_millis(50);
    let mut timed_out = false;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            kill_process_tree(&mut child);
            break child.wait()?;
        }
        thread::sleep(poll.min(timeout.saturating_sub(start.elapsed())));
    };

    let grace_end = Instant::now() + KILL_GRACE;
    let deadline = start.checked_add(timeout).map_or(grace_end, |end| end.max(grace_end));
    let (stdout, stderr) = collect_output(&rx, deadline)?;

    Ok(CommandResult {
        status: exit_code(status),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
    })
}

fn spawn_reader(mut reader: impl Read + Send + 'static, stream: Stream, tx: Sender<Chunk>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    // Receiver gone: the deadline passed, nobody wants the rest
                    if tx.send((stream, Ok(buf[..n].to_vec()))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send((stream, Err(e)));
                    break;
                }
            }
        }
    });
}

/// Gather chunks until both readers hit EOF or `deadline` passes.
fn collect_output(rx: &Receiver<Chunk>, deadline: Instant) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let (stream, chunk) = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(message) => message,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("output pipes still open after the command was stopped, keeping partial output");
                break;
            }
        };
        match stream {
            Stream::Stdout => stdout.extend(chunk?),
            Stream::Stderr => stderr.extend(chunk?),
        }
    }

    Ok((stdout, stderr))
}

/// Kill `child` and, on Unix, every process in its group.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // Negative pid targets the process group, which `process_group(0)` set to the child's pid
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    // The child may exit between try_wait and kill
    let _ = child.kill();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_dirs(root: &Path, names: &[&str]) {
        for name in names {
            fs::create_dir_all(root.join(name)).unwrap();
        }
    }

    // ========================================
    // Discovery
    // ========================================

    #[test]
    fn test_discover_immediate_subdirectories_sorted() {
        let tmp = TempDir::new().unwrap();
        make_dirs(tmp.path(), &["zeta", "add_numbers", "loops"]);

        let tests = DirectoryDiscovery.discover(tmp.path());
        let names: Vec<_> = tests.iter().map(|t| t.raw_name()).collect();
        assert_eq!(names, vec!["add_numbers", "loops", "zeta"]);
    }

    #[test]
    fn test_discover_ignores_files_and_nested_dirs() {
        let tmp = TempDir::new().unwrap();
        make_dirs(tmp.path(), &["outer/inner"]);
        fs::write(tmp.path().join("README.md"), "not a test").unwrap();

        let tests = DirectoryDiscovery.discover(tmp.path());
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].raw_name(), "outer");
        assert_eq!(tests[0].dir(), tmp.path().join("outer"));
    }

    #[test]
    fn test_discover_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let tests = DirectoryDiscovery.discover(&tmp.path().join("tests").join("binary"));
        assert!(tests.is_empty());
    }

    #[test]
    fn test_discover_root_that_is_a_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("binary");
        fs::write(&file, "").unwrap();
        assert!(DirectoryDiscovery.discover(&file).is_empty());
    }

    #[test]
    fn test_discover_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        make_dirs(tmp.path(), &["b", "a", "c"]);
        let first: Vec<_> = DirectoryDiscovery.discover(tmp.path());
        let second: Vec<_> = DirectoryDiscovery.discover(tmp.path());
        assert_eq!(first, second);
    }

    // ========================================
    // CommandSpec / CommandResult
    // ========================================

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("cargo")
            .arg("build")
            .arg("--target")
            .arg("../../../jvm-unknown-unknown.json");
        assert_eq!(spec.to_string(), "cargo build --target ../../../jvm-unknown-unknown.json");

        let spaced = CommandSpec::new("java").arg("-jar").arg("my dir/app.jar");
        assert_eq!(spaced.to_string(), "java -jar \"my dir/app.jar\"");
    }

    #[test]
    fn test_command_result_success() {
        assert!(CommandResult::exited(0, "", "").success());
        assert!(!CommandResult::exited(2, "", "").success());

        let mut timed_out = CommandResult::exited(0, "", "");
        timed_out.timed_out = true;
        assert!(!timed_out.success());
    }

    // ========================================
    // ProcessInvoker
    // ========================================

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_captures_streams_and_status() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo out; echo err >&2; exit 3");
        let result = ProcessInvoker::default().invoke(&spec).unwrap();
        assert_eq!(result.status, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_respects_cwd() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("marker.txt"), "here").unwrap();
        let spec = CommandSpec::new("cat").arg("marker.txt").current_dir(tmp.path());
        let result = ProcessInvoker::default().invoke(&spec).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "here");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_with_timeout_on_fast_command() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo done");
        let result = ProcessInvoker::new(Some(Duration::from_secs(30))).invoke(&spec).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "done\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_kills_on_timeout() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo started; exec sleep 30");
        let start = Instant::now();
        let result = ProcessInvoker::new(Some(Duration::from_millis(200))).invoke(&spec).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
        assert_eq!(result.stdout, "started\n");
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_timeout_stops_grandchildren() {
        // `sh` forks `sleep`, which inherits the pipes; killing only `sh` would leave them open
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo started; sleep 6; echo never");
        let start = Instant::now();
        let result = ProcessInvoker::new(Some(Duration::from_millis(200))).invoke(&spec).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(result.timed_out);
        assert!(!result.success());
        assert_eq!(result.stdout, "started\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_passes_non_utf8_args_through() {
        use std::os::unix::ffi::OsStrExt;

        let raw = std::ffi::OsStr::from_bytes(b"caf\xe9");
        let spec = CommandSpec::new("sh").arg("-c").arg("printf %s \"$0\"").arg(raw);
        let result = ProcessInvoker::default().invoke(&spec).unwrap();
        assert!(result.success());
        // Lossy decoding happens only when reading the output back
        assert_eq!(result.stdout, "caf\u{FFFD}");
    }

    #[test]
    fn test_process_invoker_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("definitely-not-a-real-program-7f3a");
        let err = ProcessInvoker::default().invoke(&spec).unwrap_err();
        assert!(matches!(err, TestError::Spawn { ref program, .. } if program == "definitely-not-a-real-program-7f3a"));
    }
}
