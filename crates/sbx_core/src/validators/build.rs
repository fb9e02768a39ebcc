//! Runs the project build and classifies its diagnostics.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use sbx_runner::SandboxProvider;
use tracing::{debug, info};

use crate::classifier::{ErrorClassifier, UNRESOLVED_IMPORT};
use crate::types::{BuildResult, ClassifiedError, ErrorCategory, FixTier};

pub const BUILD_COMMAND: &str = "npm run build";

/// Build output is scanned line by line; first matching pattern wins.
pub struct BuildValidator {
    classifier: Arc<ErrorClassifier>,
    line_patterns: Vec<Regex>,
    location: Regex,
    command: String,
}

impl BuildValidator {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        let location = r"([\w./@-]+\.(?:jsx?|tsx?|mjs|cjs)):(\d+):(\d+)";
        let line_patterns = [
            UNRESOLVED_IMPORT.to_string(),
            r"SyntaxError|Unexpected token|Unterminated".to_string(),
            r"TypeError|\bTS\d{4}\b".to_string(),
            r"\b[A-Za-z_$][\w$]* is not defined".to_string(),
            location.to_string(),
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        Self {
            classifier,
            line_patterns,
            location: Regex::new(location).expect("valid location pattern"),
            command: BUILD_COMMAND.to_string(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub async fn validate(&self, provider: &dyn SandboxProvider) -> BuildResult {
        let started = Instant::now();
        let result = provider.run_command(&self.command).await;
        let output = result.combined_output();
        let duration_ms = started.elapsed().as_millis() as u64;

        if result.success {
            info!("Build passed in {}ms", duration_ms);
            return BuildResult {
                passed: true,
                errors: Vec::new(),
                output,
                duration_ms,
            };
        }

        let errors = self.parse_output(&output);
        info!("Build failed with {} classified error(s)", errors.len());
        BuildResult {
            passed: false,
            errors,
            output,
            duration_ms,
        }
    }

    /// Classify every diagnostic line of a failed build.
    ///
    /// Never returns an empty list.
    pub fn parse_output(&self, output: &str) -> Vec<ClassifiedError> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !self.line_patterns.iter().any(|p| p.is_match(line)) {
                continue;
            }

            let mut error = self.classifier.classify(line);
            if error.category == ErrorCategory::Unknown {
                error.category = ErrorCategory::BuildError;
                error.fixable = FixTier::Ai;
            }
            if let Some(caps) = self.location.captures(line) {
                error = error.with_location(
                    &caps[1],
                    caps[2].parse().ok(),
                    caps[3].parse().ok(),
                );
            }

            if seen.insert((error.category, error.message.clone())) {
                debug!("Build diagnostic [{}]: {}", error.category, error.message);
                errors.push(error);
            }
        }

        if errors.is_empty() {
            let tail: Vec<&str> = output.lines().rev().take(5).collect();
            let detail = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
            let message = if detail.trim().is_empty() {
                "Build failed".to_string()
            } else {
                format!("Build failed: {}", detail.trim())
            };
            errors.push(ClassifiedError::new(ErrorCategory::BuildError, FixTier::User, message));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_runner::{CommandResult, MockProvider};

    fn validator() -> BuildValidator {
        BuildValidator::new(Arc::new(ErrorClassifier::new()))
    }

    #[test]
    fn test_missing_module_line() {
        let errors = validator().parse_output("> vite build\n\nError: Cannot find module 'left-pad'\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::MissingPackage);
        assert_eq!(errors[0].fixable, FixTier::Auto);
        assert_eq!(errors[0].suggestion.as_deref(), Some("npm install left-pad"));
    }

    #[test]
    fn test_location_extracted() {
        let output = "/app/src/App.jsx:12:5: ERROR: Unexpected token '}'";
        let errors = validator().parse_output(output);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::SyntaxError);
        assert_eq!(errors[0].file.as_deref(), Some("/app/src/App.jsx"));
        assert_eq!(errors[0].line, Some(12));
        assert_eq!(errors[0].column, Some(5));
    }

    #[test]
    fn test_location_only_line_is_build_error() {
        let errors = validator().parse_output("src/App.jsx:3:1: ERROR: something broke");
        assert_eq!(errors[0].category, ErrorCategory::BuildError);
        assert_eq!(errors[0].fixable, FixTier::Ai);
    }

    #[test]
    fn test_duplicates_collapse() {
        let output = "SyntaxError: Unexpected token\nSyntaxError: Unexpected token\nuseState is not defined";
        let errors = validator().parse_output(output);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].category, ErrorCategory::MissingImport);
    }

    #[test]
    fn test_unmatched_failure_is_never_empty() {
        let errors = validator().parse_output("npm ERR! code ELIFECYCLE\nnpm ERR! errno 1");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, ErrorCategory::BuildError);
        assert_eq!(errors[0].fixable, FixTier::User);
        assert!(errors[0].message.contains("ELIFECYCLE"));

        let errors = validator().parse_output("");
        assert_eq!(errors[0].message, "Build failed");
    }

    #[tokio::test]
    async fn test_validate_against_provider() {
        let mock = MockProvider::new().on_command_seq(
            BUILD_COMMAND,
            vec![
                CommandResult::failed(1, "Error: Cannot find module 'left-pad'"),
                CommandResult::ok("built in 1.2s"),
            ],
        );
        mock.create().await.unwrap();
        let validator = validator();

        let first = validator.validate(&mock).await;
        assert!(!first.passed);
        assert_eq!(first.errors.len(), 1);

        let second = validator.validate(&mock).await;
        assert!(second.passed);
        assert!(second.errors.is_empty());
    }
}
