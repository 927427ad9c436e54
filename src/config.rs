//! Harness configuration
//!
//! Every file name, program and path the harness relies on lives here, so the
//! runner never hardcodes them. Defaults match the layout of the JVM backend
//! repository: tests under `tests/binary/<name>/`, a target description three
//! levels above each test, and `java -jar` for running the linked output.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a harness run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Root directory whose immediate subdirectories are tests
    pub tests_dir: PathBuf,
    /// Build toolchain executable (clean + build)
    pub build_tool: String,
    /// Runtime executable used to run the produced archive
    pub runtime: String,
    /// Target name, also the directory under `target/` holding build output
    pub target_name: String,
    /// Target description path passed verbatim to `--target`, relative to the test dir
    pub target_spec: String,
    /// Extension of the produced archive
    pub artifact_ext: String,
    /// Baseline file name inside each test dir
    pub expected_file: String,
    /// Kill external commands that run longer than this
    pub timeout: Option<Duration>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            tests_dir: PathBuf::from("tests").join("binary"),
            build_tool: "cargo".to_string(),
            runtime: "java".to_string(),
            target_name: "jvm-unknown-unknown".to_string(),
            target_spec: "../../../jvm-unknown-unknown.json".to_string(),
            artifact_ext: "jar".to_string(),
            expected_file: "java_output.expected".to_string(),
            timeout: None,
        }
    }
}

impl HarnessConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the discovery root
    pub fn with_tests_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tests_dir = dir.into();
        self
    }

    /// Set the build toolchain executable
    pub fn with_build_tool(mut self, program: impl Into<String>) -> Self {
        self.build_tool = program.into();
        self
    }

    /// Set the runtime executable
    pub fn with_runtime(mut self, program: impl Into<String>) -> Self {
        self.runtime = program.into();
        self
    }

    /// Set the per-command timeout; `None` lets commands run unbounded
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = HarnessConfig::default();
        assert_eq!(config.tests_dir, PathBuf::from("tests").join("binary"));
        assert_eq!(config.target_spec, "../../../jvm-unknown-unknown.json");
        assert_eq!(config.target_name, "jvm-unknown-unknown");
        assert_eq!(config.artifact_ext, "jar");
        assert_eq!(config.expected_file, "java_output.expected");
    }

    #[test]
    fn test_default_tools() {
        let config = HarnessConfig::new();
        assert_eq!(config.build_tool, "cargo");
        assert_eq!(config.runtime, "java");
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_builder_overrides_single_field() {
        let config = HarnessConfig::new()
            .with_runtime("/opt/jdk/bin/java")
            .with_timeout(Some(Duration::from_secs(30)));

        assert_eq!(config.runtime, "/opt/jdk/bin/java");
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        // Other fields unchanged
        assert_eq!(config.build_tool, "cargo");
    }

    #[test]
    fn test_builder_override() {
        let config = HarnessConfig::new().with_tests_dir("a").with_tests_dir("b");
        assert_eq!(config.tests_dir, PathBuf::from("b")); // Last value wins
    }
}
