//! Render smoke test for the generated root component.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use sbx_runner::SandboxProvider;
use tracing::{debug, info, warn};

use crate::classifier::ErrorClassifier;
use crate::config::TestSettings;
use crate::types::{ClassifiedError, ErrorCategory, FixTier, TestResult, TestStatus};

pub const SMOKE_TEST_PATH: &str = "src/__smoke__/App.smoke.test.jsx";

const SMOKE_TEST: &str = r#"import React from 'react';
import { render } from '@testing-library/react';
import { describe, it, expect, vi } from 'vitest';
import App from '../App.jsx';

describe('App', () => {
  it('renders without throwing or logging errors', () => {
    const consoleError = vi.spyOn(console, 'error').mockImplementation(() => {});
    expect(() => render(<App />)).not.toThrow();
    expect(consoleError).not.toHaveBeenCalled();
    consoleError.mockRestore();
  });
});
"#;

const TEST_PACKAGES: &[&str] = &["vitest", "@testing-library/react", "jsdom"];

const MAX_TEST_ERRORS: usize = 5;

/// Counts parsed from a runner summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

pub struct SmokeTestRunner {
    classifier: Arc<ErrorClassifier>,
    settings: TestSettings,
    ansi: Regex,
    summary_line: Regex,
    passed: Regex,
    failed: Regex,
    total: Regex,
    error_line: Regex,
}

impl SmokeTestRunner {
    pub fn new(classifier: Arc<ErrorClassifier>, settings: TestSettings) -> Self {
        Self {
            classifier,
            settings,
            ansi: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ansi pattern"),
            // vitest: "Tests  1 failed | 2 passed (3)", jest: "Tests:  1 failed, 2 passed, 3 total"
            summary_line: Regex::new(r"(?m)^\s*Tests:?\s+.*$").expect("valid summary pattern"),
            passed: Regex::new(r"(\d+)\s+passed").expect("valid passed pattern"),
            failed: Regex::new(r"(\d+)\s+failed").expect("valid failed pattern"),
            total: Regex::new(r"\((\d+)\)|(\d+)\s+total").expect("valid total pattern"),
            error_line: Regex::new(r"\b(?:\w*Error|Uncaught)\b:?\s").expect("valid error pattern"),
        }
    }

    /// Whether `source` is long enough to be worth testing.
    pub fn should_run(&self, source: &str) -> bool {
        let lines = source.lines().filter(|l| !l.trim().is_empty()).count();
        self.settings.enabled && lines >= self.settings.min_lines
    }

    pub async fn run(&self, provider: &dyn SandboxProvider, source: &str) -> TestResult {
        if !self.settings.enabled {
            return TestResult::skipped("Smoke tests disabled");
        }
        if !self.should_run(source) {
            return TestResult::skipped(format!(
                "Source shorter than {} lines",
                self.settings.min_lines
            ));
        }

        if let Err(reason) = self.ensure_runner(provider).await {
            warn!("Skipping smoke test: {}", reason);
            return TestResult::skipped(reason);
        }
        if let Err(e) = provider.write_file(SMOKE_TEST_PATH, SMOKE_TEST).await {
            warn!("Skipping smoke test: {}", e);
            return TestResult::skipped(format!("Could not write smoke test: {}", e));
        }

        let command = format!("npx vitest run {} --environment jsdom", SMOKE_TEST_PATH);
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let result = match tokio::time::timeout(timeout, provider.run_command(&command)).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!("Smoke test timed out after {}s", self.settings.timeout_secs);
                return TestResult {
                    status: TestStatus::Failed,
                    passed: 0,
                    failed: 0,
                    total: 0,
                    errors: vec![ClassifiedError::new(ErrorCategory::Timeout, FixTier::Ai, &message)],
                    output: String::new(),
                    skip_reason: None,
                };
            }
        };

        let output = self.strip_ansi(&result.combined_output());
        let summary = self.parse_summary(&output);
        let passed = result.success && summary.failed == 0;
        info!(
            "Smoke test {}: {} passed, {} failed, {} total",
            if passed { "passed" } else { "failed" },
            summary.passed,
            summary.failed,
            summary.total
        );

        let errors = if passed { Vec::new() } else { self.extract_errors(&output) };
        TestResult {
            status: if passed { TestStatus::Passed } else { TestStatus::Failed },
            passed: summary.passed,
            failed: summary.failed,
            total: summary.total,
            errors,
            output,
            skip_reason: None,
        }
    }

    async fn ensure_runner(&self, provider: &dyn SandboxProvider) -> Result<(), String> {
        let manifest = provider.read_file("package.json").await.unwrap_or_default();
        let missing: Vec<String> = TEST_PACKAGES
            .iter()
            .filter(|name| !manifest.contains(&format!("\"{}\"", name)))
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        debug!("Installing test runner packages: {:?}", missing);
        let install = provider.install_dev_packages(&missing).await;
        if install.success {
            Ok(())
        } else {
            Err(format!("Test runner install failed: {}", install.stderr.trim()))
        }
    }

    fn strip_ansi(&self, text: &str) -> String {
        self.ansi.replace_all(text, "").into_owned()
    }

    /// Falls back to zero counts when no summary line is recognized.
    pub fn parse_summary(&self, output: &str) -> TestSummary {
        let output = self.strip_ansi(output);
        let Some(line) = self.summary_line.find(&output).map(|m| m.as_str()) else {
            return TestSummary::default();
        };

        let count = |re: &Regex| -> u32 {
            re.captures(line)
                .and_then(|c| c.iter().skip(1).flatten().next())
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let passed = count(&self.passed);
        let failed = count(&self.failed);
        let total = match count(&self.total) {
            0 => passed + failed,
            n => n,
        };
        TestSummary { passed, failed, total }
    }

    fn extract_errors(&self, output: &str) -> Vec<ClassifiedError> {
        let mut seen = HashSet::new();
        let errors: Vec<ClassifiedError> = output
            .lines()
            .map(str::trim)
            .filter(|line| self.error_line.is_match(line))
            .filter(|line| seen.insert(line.to_string()))
            .take(MAX_TEST_ERRORS)
            .map(|line| self.classifier.classify(line))
            .collect();

        if errors.is_empty() {
            vec![ClassifiedError::new(
                ErrorCategory::RuntimeError,
                FixTier::Ai,
                "Smoke test failed: App did not render cleanly",
            )]
        } else {
            errors
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_runner::{CommandResult, MockProvider};

    fn runner(min_lines: usize) -> SmokeTestRunner {
        SmokeTestRunner::new(
            Arc::new(ErrorClassifier::new()),
            TestSettings {
                enabled: true,
                min_lines,
                timeout_secs: 5,
            },
        )
    }

    fn long_source() -> String {
        (0..25).map(|i| format!("const line{} = {};\n", i, i)).collect()
    }

    #[test]
    fn test_parse_vitest_summary() {
        let output = " \x1b[2m Test Files \x1b[22m 1 failed (1)\n \x1b[2m     Tests \x1b[22m 1 failed | 2 passed (3)\n";
        let summary = runner(1).parse_summary(output);
        assert_eq!(summary, TestSummary { passed: 2, failed: 1, total: 3 });
    }

    #[test]
    fn test_parse_jest_summary() {
        let output = "Test Suites: 1 passed, 1 total\nTests:       4 passed, 4 total\n";
        let summary = runner(1).parse_summary(output);
        assert_eq!(summary, TestSummary { passed: 4, failed: 0, total: 4 });
    }

    #[test]
    fn test_unrecognized_summary_is_zero() {
        assert_eq!(runner(1).parse_summary("all good"), TestSummary::default());
    }

    #[tokio::test]
    async fn test_trivial_source_skipped() {
        let mock = MockProvider::new();
        mock.create().await.unwrap();
        let result = runner(20).run(&mock, "export default () => null;").await;
        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.tests_passed(), None);
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn test_installs_runner_and_passes() {
        let mock = MockProvider::new()
            .with_file("/app/package.json", r#"{"dependencies":{"react":"^18"}}"#)
            .on_command("vitest run", CommandResult::ok(" Tests  1 passed (1)"));
        mock.create().await.unwrap();

        let result = runner(20).run(&mock, &long_source()).await;
        assert_eq!(result.status, TestStatus::Passed);
        assert_eq!(result.total, 1);
        assert!(mock.file("/app/src/__smoke__/App.smoke.test.jsx").is_some());
        assert_eq!(mock.command_count("--save-dev"), 1);
    }

    #[tokio::test]
    async fn test_failure_yields_classified_errors() {
        let mock = MockProvider::new()
            .with_file(
                "/app/package.json",
                r#"{"devDependencies":{"vitest":"1","@testing-library/react":"14","jsdom":"24"}}"#,
            )
            .on_command(
                "vitest run",
                CommandResult::failed(
                    1,
                    "TypeError: Cannot read properties of undefined (reading 'map')\n Tests  1 failed (1)",
                ),
            );
        mock.create().await.unwrap();

        let result = runner(20).run(&mock, &long_source()).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::TypeError);
        assert_eq!(mock.command_count("npm install"), 0);
    }
}
